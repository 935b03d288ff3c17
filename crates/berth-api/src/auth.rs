//! Bearer-token authentication.
//!
//! Protected routes pass through [`require_token`], which resolves the
//! `Authorization` header into a [`Requester`] and parks it in the
//! request extensions for the handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use berth_store::{Collections, StoreError};
use thiserror::Error;

use crate::error::ApiError;
use crate::ApiState;

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Requester {
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("you must provide the Authorization header")]
    MissingHeader,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Requester, AuthError>;
}

/// Verifier backed by the token records in the store.
pub struct StoreTokenVerifier {
    store: Collections,
}

impl StoreTokenVerifier {
    pub fn new(store: Collections) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenVerifier for StoreTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Requester, AuthError> {
        match self.store.find_token(token)? {
            Some(record) => Ok(Requester {
                email: record.user_email,
            }),
            None => Err(AuthError::InvalidToken),
        }
    }
}

/// Fixed token → email map for tests.
#[derive(Default)]
pub struct FixedTokenVerifier {
    tokens: HashMap<String, String>,
}

impl FixedTokenVerifier {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            tokens: pairs
                .iter()
                .map(|(token, email)| (token.to_string(), email.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for FixedTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Requester, AuthError> {
        match self.tokens.get(token) {
            Some(email) => Ok(Requester {
                email: email.clone(),
            }),
            None => Err(AuthError::InvalidToken),
        }
    }
}

/// Middleware guarding protected routes. Accepts the token bare or with
/// a `Bearer ` prefix.
pub async fn require_token(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        return ApiError::from(AuthError::MissingHeader).into_response();
    }
    match state.verifier.verify(token).await {
        Ok(requester) => {
            request.extensions_mut().insert(requester);
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_store::TokenRecord;

    #[tokio::test]
    async fn store_verifier_resolves_tokens() {
        let store = Collections::open_in_memory().unwrap();
        store
            .put_token(&TokenRecord::new("t0ken", "chico@example.com"))
            .unwrap();
        let verifier = StoreTokenVerifier::new(store);

        let requester = verifier.verify("t0ken").await.unwrap();
        assert_eq!(requester.email, "chico@example.com");
        assert!(matches!(
            verifier.verify("bogus").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn fixed_verifier_is_a_plain_map() {
        let verifier = FixedTokenVerifier::new(&[("t0ken", "chico@example.com")]);
        assert!(verifier.verify("t0ken").await.is_ok());
        assert!(verifier.verify("other").await.is_err());
    }
}
