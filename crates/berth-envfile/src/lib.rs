//! berth-envfile — the provisioner bootstrap file.
//!
//! The provisioner CLI reads a YAML document mapping application names
//! to environment entries (credentials, bucket, machine defaults). The
//! control plane owns that file: one entry is written when an app is
//! created and removed when it is destroyed, always by rewriting the
//! whole document so concurrent entries never get duplicated or lost.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use berth_fs::{Fs, OpenFlags};

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed environments file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type EnvFileResult<T> = Result<T, EnvFileError>;

/// One per-application environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Environment {
    #[serde(rename = "type")]
    pub env_type: String,
    pub admin_secret: String,
    pub control_bucket: String,
    pub default_series: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_instance_type: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub juju_origin: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EnvDocument {
    #[serde(default)]
    environments: BTreeMap<String, Environment>,
}

/// Manages the environments file through the filesystem facade.
pub struct EnvFileManager {
    path: PathBuf,
    fs: Arc<dyn Fs>,
    lock: Mutex<()>,
}

fn io_err(path: &Path, source: std::io::Error) -> EnvFileError {
    EnvFileError::Io { path: path.display().to_string(), source }
}

impl EnvFileManager {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn Fs>) -> Self {
        Self {
            path: path.into(),
            fs,
            lock: Mutex::new(()),
        }
    }

    /// Insert or replace the entry for `app`.
    pub async fn write_entry(&self, app: &str, env: Environment) -> EnvFileResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load()?;
        doc.environments.insert(app.to_string(), env);
        self.store(&doc)?;
        debug!(%app, "environment entry written");
        Ok(())
    }

    /// Drop the entry for `app`. A missing entry is not an error.
    pub async fn remove_entry(&self, app: &str) -> EnvFileResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load()?;
        if doc.environments.remove(app).is_some() {
            self.store(&doc)?;
            debug!(%app, "environment entry removed");
        }
        Ok(())
    }

    pub async fn read_entry(&self, app: &str) -> EnvFileResult<Option<Environment>> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.environments.remove(app))
    }

    pub async fn entry_names(&self) -> EnvFileResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.environments.into_keys().collect())
    }

    fn load(&self) -> EnvFileResult<EnvDocument> {
        let mut file = match self.fs.open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(EnvDocument::default()),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_err(&self.path, e))?;
        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(EnvDocument::default());
        }
        Ok(serde_yaml::from_slice(&buf)?)
    }

    fn store(&self, doc: &EnvDocument) -> EnvFileResult<()> {
        let flags = OpenFlags { write: true, create: true, truncate: true, ..Default::default() };
        let mut file = self
            .fs
            .open_file(&self.path, flags, 0o600)
            .map_err(|e| io_err(&self.path, e))?;
        let bytes = serde_yaml::to_string(doc)?;
        file.write_all(bytes.as_bytes()).map_err(|e| io_err(&self.path, e))?;
        file.flush().map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_fs::RecordingFs;

    const PATH: &str = "/etc/provisioner/environments.yaml";

    fn test_env(access: &str) -> Environment {
        Environment {
            env_type: "ec2".to_string(),
            admin_secret: "101112131415161718191a1b1c1d1e1f".to_string(),
            control_bucket: "berth-101112131415161718191a1b1c1d1e1f".to_string(),
            default_series: "precise".to_string(),
            default_image_id: Some("ami-00000007".to_string()),
            default_instance_type: Some("m1.small".to_string()),
            access_key: access.to_string(),
            secret_key: "secret".to_string(),
            ec2_uri: Some("http://ec2.local:8773/services/Cloud".to_string()),
            s3_uri: Some("http://s3.local:3333".to_string()),
            juju_origin: None,
        }
    }

    fn test_manager() -> (EnvFileManager, RecordingFs) {
        let fs = RecordingFs::new();
        let manager = EnvFileManager::new(PATH, Arc::new(fs.clone()));
        (manager, fs)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (manager, fs) = test_manager();
        manager.write_entry("blog", test_env("access")).await.unwrap();

        let entry = manager.read_entry("blog").await.unwrap().unwrap();
        assert_eq!(entry, test_env("access"));
        assert!(fs.has_action(&format!("openfile {PATH} with mode 0600")));
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let (manager, _fs) = test_manager();
        assert!(manager.read_entry("blog").await.unwrap().is_none());
        assert!(manager.entry_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_other_entries_and_one_document() {
        let (manager, fs) = test_manager();
        manager.write_entry("foo", test_env("foo")).await.unwrap();
        manager.write_entry("blog", test_env("access")).await.unwrap();
        // Replacing an entry must not duplicate the top-level key.
        manager.write_entry("blog", test_env("rotated")).await.unwrap();

        let content = fs.file_bytes(PATH).unwrap();
        let text = String::from_utf8(content).unwrap();
        assert_eq!(text.matches("environments:").count(), 1);

        assert_eq!(manager.read_entry("foo").await.unwrap().unwrap(), test_env("foo"));
        assert_eq!(
            manager.read_entry("blog").await.unwrap().unwrap().access_key,
            "rotated"
        );
    }

    #[tokio::test]
    async fn remove_entry_is_selective_and_idempotent() {
        let (manager, _fs) = test_manager();
        manager.write_entry("foo", test_env("foo")).await.unwrap();
        manager.write_entry("bar", test_env("bar")).await.unwrap();

        manager.remove_entry("foo").await.unwrap();
        assert!(manager.read_entry("foo").await.unwrap().is_none());
        assert!(manager.read_entry("bar").await.unwrap().is_some());

        // Absent entry: no error, no rewrite.
        manager.remove_entry("foo").await.unwrap();
    }

    #[tokio::test]
    async fn yaml_uses_kebab_keys_and_omits_empty_optionals() {
        let (manager, fs) = test_manager();
        let mut env = test_env("access");
        env.default_image_id = None;
        env.ec2_uri = None;
        manager.write_entry("blog", env).await.unwrap();

        let text = String::from_utf8(fs.file_bytes(PATH).unwrap()).unwrap();
        assert!(text.contains("admin-secret:"));
        assert!(text.contains("control-bucket:"));
        assert!(text.contains("type: ec2"));
        assert!(!text.contains("default-image-id"));
        assert!(!text.contains("ec2-uri"));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let (manager, fs) = test_manager();
        fs.seed(PATH, b"environments: [not, a, map]".to_vec());

        let err = manager.read_entry("blog").await.unwrap_err();
        assert!(matches!(err, EnvFileError::Yaml(_)));
    }
}
