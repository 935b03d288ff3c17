//! berthd.toml configuration parser.
//!
//! Every field has a default, so a missing file (or an empty one) yields
//! a usable single-node dev config. A handful of settings can also be
//! overridden through the environment at load time.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the application database.
    pub data_dir: PathBuf,
    pub api: ApiSection,
    pub git: GitSection,
    pub environ: EnvironSection,
    pub provisioner: ProvisionerSection,
    pub workers: WorkersSection,
    pub tracing: TracingSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            data_dir: PathBuf::from("/var/lib/berth"),
            api: ApiSection::default(),
            git: GitSection::default(),
            environ: EnvironSection::default(),
            provisioner: ProvisionerSection::default(),
            workers: WorkersSection::default(),
            tracing: TracingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Socket address the API server binds.
    pub listen: String,
    /// Header carrying the client-supplied request id.
    pub request_id_header: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        ApiSection {
            listen: "0.0.0.0:8080".to_string(),
            request_id_header: "X-Request-ID".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitSection {
    /// Host written into the clone URLs handed to users.
    pub host: String,
    /// Local checkout of the gitosis-admin repository.
    pub repo_root: String,
}

impl Default for GitSection {
    fn default() -> Self {
        GitSection {
            host: "localhost".to_string(),
            repo_root: "/var/lib/berth/gitosis-admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironSection {
    /// Provisioner environments file managed on behalf of applications.
    pub path: String,
    /// Environment type stamped on new entries.
    #[serde(rename = "type")]
    pub env_type: String,
    /// Machine series stamped on new entries.
    pub default_series: String,
    /// Access key shared by every application entry.
    pub access_key: String,
    /// Root secret that per-application secrets derive from.
    pub secret_root: String,
    /// Prefix for per-application control buckets.
    pub bucket_prefix: String,
}

impl Default for EnvironSection {
    fn default() -> Self {
        EnvironSection {
            path: "/etc/berth/environments.yaml".to_string(),
            env_type: "ec2".to_string(),
            default_series: "precise".to_string(),
            access_key: String::new(),
            secret_root: String::new(),
            bucket_prefix: "berth-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionerSection {
    /// Orchestrator binary to invoke.
    pub command: String,
    /// Local charm repository passed to `deploy`.
    pub charms_path: String,
    /// OS series baked into charm URLs.
    pub series: String,
}

impl Default for ProvisionerSection {
    fn default() -> Self {
        ProvisionerSection {
            command: "juju".to_string(),
            charms_path: "/home/charms".to_string(),
            series: "precise".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Submission attempts per environment propagation message.
    pub run_attempts: u32,
    /// Seconds between propagation attempts.
    pub retry_delay_secs: u64,
    /// Seconds between reconciliation ticks.
    pub reconcile_interval_secs: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        WorkersSection {
            run_attempts: 5,
            retry_delay_secs: 1,
            reconcile_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingSection {
    /// Emit log lines as JSON instead of the human-readable format.
    pub json: bool,
    /// OTLP gRPC endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
    /// Fallback sample ratio for non-mutating spans.
    pub sample_ratio: f64,
    /// Span names excluded from mutation force-sampling.
    pub force_sample_deny: Vec<String>,
}

impl Default for TracingSection {
    fn default() -> Self {
        TracingSection {
            json: false,
            otlp_endpoint: None,
            sample_ratio: 0.001,
            force_sample_deny: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    /// Environment overrides apply either way.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            DaemonConfig::default()
        };
        config.apply_overrides(
            env_var("BERTH_REQUEST_ID_HEADER"),
            env_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            env_var("BERTH_TRACE_SAMPLE_RATIO"),
        );
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        request_id_header: Option<String>,
        otlp_endpoint: Option<String>,
        sample_ratio: Option<String>,
    ) {
        if let Some(header) = request_id_header {
            self.api.request_id_header = header;
        }
        if let Some(endpoint) = otlp_endpoint {
            self.tracing.otlp_endpoint = Some(endpoint);
        }
        // An unparseable ratio keeps the configured value.
        if let Some(ratio) = sample_ratio {
            if let Ok(value) = ratio.parse() {
                self.tracing.sample_ratio = value;
            }
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
