//! Error types for the application coordinator.

use berth_core::ChainedError;
use berth_envfile::EnvFileError;
use berth_gitacl::AclError;
use berth_provision::ProvisionError;
use berth_store::StoreError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid application name: {0}")]
    InvalidName(String),

    #[error("user {0} belongs to no team; a team is required to create an application")]
    NoTeams(String),

    /// Duplicate app name, duplicate key, membership already present.
    #[error("{0}")]
    Conflict(String),

    #[error("application {0} not found")]
    AppNotFound(String),

    #[error("team {0} not found")]
    TeamNotFound(String),

    #[error("unit {unit} of application {app} not found")]
    UnitNotFound { app: String, unit: String },

    #[error("user {user} has no key named {key}")]
    KeyNotFound { user: String, key: String },

    #[error("team {team} already has access to application {app}")]
    AlreadyGranted { team: String, app: String },

    #[error("team {team} has no access to application {app}")]
    NotGranted { team: String, app: String },

    #[error("cannot revoke the last team with access to an application")]
    LastTeam,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("application {app} is limited to {limit} units")]
    QuotaExceeded { app: String, limit: u32 },

    #[error("no started unit available to run commands on")]
    NoUnitsAvailable,

    /// The coordinator's workers are no longer running.
    #[error("coordinator is shut down")]
    WorkerGone,

    #[error("credential broker: {0}")]
    Broker(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error(transparent)]
    EnvFile(#[from] EnvFileError),

    #[error(transparent)]
    Chained(#[from] ChainedError),
}
