//! REST API handlers.
//!
//! Handlers delegate to the coordinator / account manager and translate
//! domain errors through [`ApiError`]. Anything touching a named
//! application goes through [`accessible_app`] first, which enforces
//! the shared-team ownership rule.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use berth_apps::AppError;
use berth_core::{LogEntry, UnitState};
use berth_store::{AppRecord, UserKey};
use serde::{Deserialize, Serialize};

use crate::auth::Requester;
use crate::error::ApiError;
use crate::ApiState;

/// GET /healthcheck
pub async fn healthcheck() -> &'static str {
    "WORKING"
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ── Applications ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub framework: String,
}

/// POST /apps
pub async fn create_app(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Json(body): Json<CreateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .coordinator
        .create_app(&body.name, &body.framework, &requester.email)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Serialize)]
pub struct AppSummary {
    pub name: String,
    pub framework: String,
    pub state: UnitState,
    pub units: usize,
}

impl From<AppRecord> for AppSummary {
    fn from(app: AppRecord) -> Self {
        Self {
            units: app.units.len(),
            name: app.name,
            framework: app.framework,
            state: app.state,
        }
    }
}

/// GET /apps
pub async fn list_apps(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<AppSummary>>, ApiError> {
    let apps = state.coordinator.list_apps(&requester.email)?;
    Ok(Json(apps.into_iter().map(AppSummary::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct UnitView {
    pub name: String,
    pub state: UnitState,
    pub machine: u32,
    pub ip: String,
}

#[derive(Debug, Serialize)]
pub struct AppDetail {
    pub name: String,
    pub framework: String,
    pub state: UnitState,
    pub teams: Vec<String>,
    pub units: Vec<UnitView>,
    /// Variable values as shown to users; private values are `***`.
    pub env: BTreeMap<String, String>,
}

impl From<AppRecord> for AppDetail {
    fn from(app: AppRecord) -> Self {
        let units = app
            .units
            .iter()
            .map(|unit| UnitView {
                name: unit.name.clone(),
                state: unit.derived_state(),
                machine: unit.machine_id,
                ip: unit.ip.clone(),
            })
            .collect();
        let env = app
            .env
            .iter()
            .map(|(name, var)| (name.clone(), var.display_value().to_string()))
            .collect();
        Self {
            units,
            env,
            name: app.name,
            framework: app.framework,
            state: app.state,
            teams: app.teams,
        }
    }
}

/// GET /apps/{name}
pub async fn app_detail(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
) -> Result<Json<AppDetail>, ApiError> {
    let app = accessible_app(&state, &requester, &name)?;
    Ok(Json(app.into()))
}

/// DELETE /apps/{name}
pub async fn destroy_app(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    accessible_app(&state, &requester, &name)?;
    state.coordinator.destroy_app(&name).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub lines: Option<usize>,
    pub source: Option<String>,
}

/// GET /apps/{name}/log
pub async fn app_log(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    accessible_app(&state, &requester, &name)?;
    let entries = state
        .coordinator
        .app_log(&name, query.lines, query.source.as_deref())?;
    Ok(Json(entries))
}

// ── Environment variables ──────────────────────────────────────

/// POST /apps/{name}/env
pub async fn set_envs(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
    Json(vars): Json<BTreeMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    accessible_app(&state, &requester, &name)?;
    state.coordinator.set_envs(&name, vars, true).await?;
    Ok(StatusCode::OK)
}

/// DELETE /apps/{name}/env
pub async fn unset_envs(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
    Json(names): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    accessible_app(&state, &requester, &name)?;
    state.coordinator.unset_envs(&name, &names, true).await?;
    Ok(StatusCode::OK)
}

// ── Remote commands ────────────────────────────────────────────

/// POST /apps/{name}/run
///
/// The request body is the shell command itself; the response body is
/// the raw combined output of the started units.
pub async fn run_command(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    accessible_app(&state, &requester, &name)?;
    let command = String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::bad_request("command must be valid utf-8"))?;
    let command = command.trim();
    if command.is_empty() {
        return Err(ApiError::bad_request("you must provide the command to run"));
    }
    let output = state.coordinator.run_command(&name, command).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    ))
}

/// POST /apps/{name}/restart
pub async fn restart_app(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    accessible_app(&state, &requester, &name)?;
    let output = state.coordinator.restart_app(&name).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    ))
}

// ── Team access ────────────────────────────────────────────────

/// PUT /apps/{name}/{team}
pub async fn grant_team(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path((name, team)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    accessible_app(&state, &requester, &name)?;
    state.coordinator.grant_team(&name, &team).await?;
    Ok(StatusCode::OK)
}

/// DELETE /apps/{name}/{team}
pub async fn revoke_team(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Path((name, team)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    accessible_app(&state, &requester, &name)?;
    state.coordinator.revoke_team(&name, &team).await?;
    Ok(StatusCode::OK)
}

// ── SSH keys ───────────────────────────────────────────────────

/// GET /users/keys
pub async fn list_keys(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<UserKey>>, ApiError> {
    Ok(Json(state.accounts.list_keys(&requester.email)?))
}

#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub name: String,
    pub key: String,
}

/// POST /users/keys
pub async fn add_key(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Json(body): Json<KeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = state
        .accounts
        .add_key(&requester.email, &body.name, &body.key)
        .await?;
    Ok(Json(serde_json::json!({ "filename": key.filename })))
}

/// PUT /users/keys
pub async fn replace_key(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Json(body): Json<KeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = state
        .accounts
        .replace_key(&requester.email, &body.name, &body.key)
        .await?;
    Ok(Json(serde_json::json!({ "filename": key.filename })))
}

#[derive(Debug, Deserialize)]
pub struct RemoveKeyRequest {
    pub name: String,
}

/// DELETE /users/keys
pub async fn remove_key(
    State(state): State<ApiState>,
    Extension(requester): Extension<Requester>,
    Json(body): Json<RemoveKeyRequest>,
) -> Result<StatusCode, ApiError> {
    state.accounts.remove_key(&requester.email, &body.name).await?;
    Ok(StatusCode::OK)
}

/// Look up the app and require a team shared with the requester.
fn accessible_app(
    state: &ApiState,
    requester: &Requester,
    name: &str,
) -> Result<AppRecord, ApiError> {
    let app = state.coordinator.app_info(name)?;
    let teams = state
        .store
        .teams_for_user(&requester.email)
        .map_err(AppError::from)?;
    if !teams.iter().any(|team| app.has_team(&team.name)) {
        return Err(ApiError::forbidden(
            "user does not have access to this application",
        ));
    }
    Ok(app)
}
