//! berth-exec — subprocess execution behind a trait.
//!
//! Everything that shells out (git, the provisioner CLI, remote ssh
//! commands) goes through [`Executor`], so tests can record the argv of
//! every invocation and script outcomes without spawning processes.

pub mod filter;
pub mod os;
pub mod recording;

use async_trait::async_trait;
use thiserror::Error;

pub use filter::filter_noise;
pub use os::OsExecutor;
pub use recording::{RecordedCommand, RecordingExecutor};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{cmd} exited with status {status}: {}", String::from_utf8_lossy(.output))]
    NonZero {
        cmd: String,
        status: i32,
        output: Vec<u8>,
    },
}

impl ExecError {
    /// Combined output of the failed command, when there is one.
    pub fn output(&self) -> &[u8] {
        match self {
            ExecError::NonZero { output, .. } => output,
            ExecError::Spawn { .. } => &[],
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = self.stdout.clone();
        out.extend_from_slice(&self.stderr);
        out
    }
}

/// Runs commands with captured output. Non-zero exit is an error
/// carrying the combined output.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, cmd: &str, args: &[String]) -> ExecResult<Output>;
}

/// Build an argv vector from string literals.
///
/// `argv!["status", "-e", name]` reads better at call sites than a
/// chain of `to_string()` calls.
#[macro_export]
macro_rules! argv {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}
