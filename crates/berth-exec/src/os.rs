//! OS executor — tokio subprocess with captured output.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::{ExecError, ExecResult, Executor, Output};

/// Spawns real processes. Stdin is closed; stdout and stderr are
/// captured, never inherited from the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsExecutor;

#[async_trait]
impl Executor for OsExecutor {
    async fn run(&self, cmd: &str, args: &[String]) -> ExecResult<Output> {
        debug!(cmd, ?args, "running command");
        let out = tokio::process::Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExecError::Spawn { cmd: cmd.to_string(), source })?;

        if !out.status.success() {
            let mut combined = out.stdout;
            combined.extend_from_slice(&out.stderr);
            return Err(ExecError::NonZero {
                cmd: cmd.to_string(),
                status: out.status.code().unwrap_or(-1),
                output: combined,
            });
        }

        Ok(Output { stdout: out.stdout, stderr: out.stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argv;

    #[tokio::test]
    async fn captures_stdout() {
        let out = OsExecutor.run("echo", &argv!["hello"]).await.unwrap();
        assert_eq!(out.stdout, b"hello\n");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let err = OsExecutor.run("false", &[]).await.unwrap_err();
        match err {
            ExecError::NonZero { status, .. } => assert_ne!(status, 0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = OsExecutor
            .run("definitely-not-a-real-binary-xyz", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
