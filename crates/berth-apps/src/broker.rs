//! Credential broker — per-application storage credentials.
//!
//! Each application gets an access/secret key pair and a control bucket
//! recorded in its environment-file entry. The real object-storage/IAM
//! integration sits behind [`CredentialBroker`]; [`ConfigBroker`] derives
//! deterministic credentials from the daemon's configured root pair, and
//! [`RecordingBroker`] scripts outcomes for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub control_bucket: String,
}

#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Allocate credentials for a new application.
    async fn provision(&self, app: &str) -> AppResult<AppCredentials>;

    /// Release whatever `provision` allocated. Idempotent.
    async fn revoke(&self, app: &str) -> AppResult<()>;
}

/// Broker that derives credentials from daemon configuration.
///
/// The secret key is the hex SHA-256 of `<root secret>:<app>`, so the same
/// app always gets the same material and nothing secret lands in the
/// store.
pub struct ConfigBroker {
    access_key: String,
    secret_root: String,
    bucket_prefix: String,
}

impl ConfigBroker {
    pub fn new(
        access_key: impl Into<String>,
        secret_root: impl Into<String>,
        bucket_prefix: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_root: secret_root.into(),
            bucket_prefix: bucket_prefix.into(),
        }
    }
}

#[async_trait]
impl CredentialBroker for ConfigBroker {
    async fn provision(&self, app: &str) -> AppResult<AppCredentials> {
        let mut hasher = Sha256::new();
        hasher.update(self.secret_root.as_bytes());
        hasher.update(b":");
        hasher.update(app.as_bytes());
        Ok(AppCredentials {
            access_key: self.access_key.clone(),
            secret_key: hex::encode(hasher.finalize()),
            control_bucket: format!("{}{}", self.bucket_prefix, app),
        })
    }

    async fn revoke(&self, _app: &str) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingInner {
    provisioned: Vec<String>,
    revoked: Vec<String>,
    fail_provision: VecDeque<String>,
    fail_revoke: VecDeque<String>,
}

/// Test broker that records calls and can fail on demand.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_provision(&self, message: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_provision
            .push_back(message.to_string());
    }

    pub fn fail_next_revoke(&self, message: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_revoke
            .push_back(message.to_string());
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.inner.lock().unwrap().provisioned.clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.inner.lock().unwrap().revoked.clone()
    }
}

#[async_trait]
impl CredentialBroker for RecordingBroker {
    async fn provision(&self, app: &str) -> AppResult<AppCredentials> {
        let mut inner = self.inner.lock().unwrap();
        inner.provisioned.push(app.to_string());
        if let Some(message) = inner.fail_provision.pop_front() {
            return Err(AppError::Broker(message));
        }
        Ok(AppCredentials {
            access_key: format!("access-{app}"),
            secret_key: format!("secret-{app}"),
            control_bucket: format!("bucket-{app}"),
        })
    }

    async fn revoke(&self, app: &str) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.revoked.push(app.to_string());
        if let Some(message) = inner.fail_revoke.pop_front() {
            return Err(AppError::Broker(message));
        }
        Ok(())
    }
}
