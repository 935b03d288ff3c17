//! ACL error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AclError {
    #[error("group {0} not found")]
    GroupNotFound(String),

    #[error("group {0} already exists")]
    GroupExists(String),

    #[error("option {option} not set in group {group}")]
    OptionNotSet { group: String, option: String },

    #[error("value {value} for option {option} in group {group} has already been added")]
    DuplicateValue {
        group: String,
        option: String,
        value: String,
    },

    #[error("value {value} not found in option {option} of group {group}")]
    ValueNotFound {
        group: String,
        option: String,
        value: String,
    },

    #[error("key file {0} not found")]
    KeyFileNotFound(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git: {0}")]
    Git(#[from] berth_exec::ExecError),

    #[error("acl agent is not running")]
    AgentGone,
}

pub type AclResult<T> = Result<T, AclError>;
