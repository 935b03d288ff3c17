//! berth-core — shared domain types for the Berth control plane.
//!
//! Everything other crates agree on lives here: the unit state machine
//! and its derivation from provisioner observations, the unit and
//! environment-variable records embedded in application documents, the
//! chained error used by multi-step operations, and name validation.

pub mod error;
pub mod state;
pub mod types;
pub mod validate;

pub use error::ChainedError;
pub use state::{UnitState, derive_unit_state};
pub use types::{EnvVar, LogEntry, Quota, Unit};
pub use validate::{APP_NAME_RULE, valid_app_name};
