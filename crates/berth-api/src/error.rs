//! HTTP error envelope.
//!
//! Every failed request renders the same body, `{"error": "<message>"}`,
//! with the status derived from the domain error. The rendered message is
//! also parked in the response extensions so the observe middleware can
//! log the chain alongside the access line.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use berth_apps::AppError;

use crate::auth::AuthError;

/// Failure message carried on the response for the access log.
#[derive(Debug, Clone)]
pub(crate) struct ErrorDetail(pub String);

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match &err {
            AppError::InvalidName(_)
            | AppError::InvalidParam(_)
            | AppError::NoTeams(_)
            | AppError::NoUnitsAvailable => StatusCode::BAD_REQUEST,
            AppError::AppNotFound(_)
            | AppError::TeamNotFound(_)
            | AppError::UnitNotFound { .. }
            | AppError::KeyNotFound { .. }
            | AppError::NotGranted { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::AlreadyGranted { .. } => StatusCode::CONFLICT,
            AppError::LastTeam | AppError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::WorkerGone
            | AppError::Broker(_)
            | AppError::Store(_)
            | AppError::Provision(_)
            | AppError::Acl(_)
            | AppError::EnvFile(_)
            | AppError::Chained(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::MissingHeader | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response();
        response.extensions_mut().insert(ErrorDetail(self.message));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_http_statuses() {
        let cases = [
            (ApiError::from(AppError::InvalidName("x".into())), 400),
            (ApiError::from(AppError::AppNotFound("blog".into())), 404),
            (ApiError::from(AppError::Conflict("dup".into())), 409),
            (ApiError::from(AppError::LastTeam), 403),
            (ApiError::from(AppError::WorkerGone), 500),
            (ApiError::from(AuthError::InvalidToken), 401),
        ];
        for (err, code) in cases {
            assert_eq!(err.status.as_u16(), code, "{}", err.message);
        }
    }

    #[test]
    fn response_carries_the_envelope_and_detail() {
        let response = ApiError::bad_request("invalid platform name").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let detail = response.extensions().get::<ErrorDetail>().unwrap();
        assert_eq!(detail.0, "invalid platform name");
    }
}
