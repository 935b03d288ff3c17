//! berth-store — embedded record store for the berth control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds the durable records the
//! coordinator and API work with: applications, users, teams, and access
//! tokens. All records are JSON-serialized into redb's `&[u8]` value
//! columns and keyed by their natural identifier.
//!
//! [`Collections`] is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is shared freely across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::{Collections, LOG_CAP};
pub use types::*;
