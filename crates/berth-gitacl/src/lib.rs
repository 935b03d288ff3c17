//! berth-gitacl — team access control materialized as a gitosis config.
//!
//! Team membership and repository access live in a `gitosis.conf` file
//! inside a managed Git checkout; public keys live under `keydir/`.
//! Every mutation rewrites the file and commits and pushes the result,
//! so the Git server's view always matches the control plane's.
//!
//! Three layers:
//! - [`conf::AclConfig`] — the parsed config model,
//! - [`manager::AclManager`] — file + git plumbing under a lock,
//! - [`agent`] — a single worker that serializes all mutations.

pub mod agent;
pub mod conf;
pub mod error;
pub mod manager;

pub use agent::{AclAgent, AclAgentHandle, ChangeOutcome, ChangeRequest};
pub use conf::AclConfig;
pub use error::{AclError, AclResult};
pub use manager::AclManager;
