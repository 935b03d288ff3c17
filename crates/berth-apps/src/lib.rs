//! berth-apps — application lifecycle coordination.
//!
//! The coordinator owns every application mutation and the background
//! workers behind them: the serialized remote-command worker, the env
//! propagation worker and the status reconciliation ticker. Account
//! management (users, teams, keys, tokens) lives here too since it
//! shares the store and the ACL agent.

pub mod accounts;
pub mod broker;
pub mod commands;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod logs;
pub mod propagate;
mod reconcile;

pub use accounts::AccountManager;
pub use broker::{AppCredentials, ConfigBroker, CredentialBroker, RecordingBroker};
pub use commands::CommandRequest;
pub use coordinator::{AppCoordinator, CoordinatorConfig, CreatedApp};
pub use error::{AppError, AppResult};
pub use locks::AppLocks;
pub use logs::LogWriter;
pub use propagate::EnvMessage;
