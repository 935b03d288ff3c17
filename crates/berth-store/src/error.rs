//! Error types for the berth store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Insert of a record whose key is already taken.
    #[error("{kind} {name} already exists")]
    Duplicate { kind: &'static str, name: String },

    /// Update or removal of a record that is not there.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
}

impl StoreError {
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::Duplicate { kind, name: name.into() }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::NotFound { kind, name: name.into() }
    }

    /// Whether this error means "the record is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
