//! berth-api — REST API for the berth control plane.
//!
//! Axum router plus the request pipeline: request-id propagation,
//! per-request span/metrics/access-log, bearer-token authentication and
//! the JSON error envelope. Trace sampling policy lives here too.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthcheck` | Liveness probe, no auth |
//! | GET | `/metrics` | Prometheus exposition, no auth |
//! | POST | `/apps` | Create an application |
//! | GET | `/apps` | List the requester's applications |
//! | GET | `/apps/{name}` | Application detail |
//! | DELETE | `/apps/{name}` | Destroy an application |
//! | GET | `/apps/{name}/log` | Recent log entries (`?lines=&source=`) |
//! | POST | `/apps/{name}/env` | Set environment variables |
//! | DELETE | `/apps/{name}/env` | Unset environment variables |
//! | POST | `/apps/{name}/run` | Run a command on started units |
//! | POST | `/apps/{name}/restart` | Run the restart hook on started units |
//! | PUT | `/apps/{name}/{team}` | Grant a team access |
//! | DELETE | `/apps/{name}/{team}` | Revoke a team's access |
//! | GET | `/users/keys` | List the requester's SSH keys |
//! | POST | `/users/keys` | Register an SSH key |
//! | PUT | `/users/keys` | Replace an SSH key |
//! | DELETE | `/users/keys` | Remove an SSH key |

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sampler;

use std::sync::Arc;

use axum::http::HeaderName;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post, put};
use axum::Router;
use berth_apps::{AccountManager, AppCoordinator};
use berth_store::Collections;
use metrics_exporter_prometheus::PrometheusHandle;

pub use auth::{AuthError, FixedTokenVerifier, Requester, StoreTokenVerifier, TokenVerifier};
pub use error::ApiError;
pub use middleware::{RequestId, RequestIdHeader};
pub use sampler::MutationSampler;

/// Shared state for the API handlers and middleware.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<AppCoordinator>,
    pub accounts: Arc<AccountManager>,
    pub store: Collections,
    pub verifier: Arc<dyn TokenVerifier>,
    pub metrics: Option<PrometheusHandle>,
    pub request_id_header: HeaderName,
}

impl ApiState {
    pub fn new(
        coordinator: Arc<AppCoordinator>,
        accounts: Arc<AccountManager>,
        store: Collections,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            coordinator,
            accounts,
            store,
            verifier,
            metrics: None,
            request_id_header: RequestIdHeader::default().0,
        }
    }

    /// Attach the Prometheus recorder handle rendered at `GET /metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_request_id_header(mut self, header: HeaderName) -> Self {
        self.request_id_header = header;
        self
    }
}

/// Build the complete router with the middleware pipeline applied.
pub fn build_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route(
            "/apps",
            get(handlers::list_apps).post(handlers::create_app),
        )
        .route(
            "/apps/{name}",
            get(handlers::app_detail).delete(handlers::destroy_app),
        )
        .route("/apps/{name}/log", get(handlers::app_log))
        .route(
            "/apps/{name}/env",
            post(handlers::set_envs).delete(handlers::unset_envs),
        )
        .route("/apps/{name}/run", post(handlers::run_command))
        .route("/apps/{name}/restart", post(handlers::restart_app))
        .route(
            "/apps/{name}/{team}",
            put(handlers::grant_team).delete(handlers::revoke_team),
        )
        .route(
            "/users/keys",
            get(handlers::list_keys)
                .post(handlers::add_key)
                .put(handlers::replace_key)
                .delete(handlers::remove_key),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::require_token));

    let request_id_header = RequestIdHeader(state.request_id_header.clone());
    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/metrics", get(handlers::prometheus_metrics))
        .merge(protected)
        .layer(from_fn(middleware::observe))
        .layer(from_fn_with_state(request_id_header, middleware::request_id))
        .with_state(state)
}
