//! Recording executor — argv log plus scripted outcomes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ExecError, ExecResult, Executor, Output};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub cmd: String,
    pub args: Vec<String>,
}

impl RecordedCommand {
    /// `"git -C /repo add -A"` — the command joined for assertions.
    pub fn display(&self) -> String {
        let mut parts = vec![self.cmd.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

enum Outcome {
    Ok(Vec<u8>),
    Fail { status: i32, output: Vec<u8> },
}

#[derive(Default)]
struct Inner {
    commands: Vec<RecordedCommand>,
    script: VecDeque<Outcome>,
    default_stdout: Vec<u8>,
}

/// Records every invocation and replies from a script of queued
/// outcomes; once the script is drained, every run succeeds with the
/// default output.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose successful runs print `stdout`.
    pub fn with_output(stdout: impl Into<Vec<u8>>) -> Self {
        let exec = Self::default();
        exec.inner.lock().unwrap().default_stdout = stdout.into();
        exec
    }

    /// Queue one successful run with the given stdout.
    pub fn push_ok(&self, stdout: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().script.push_back(Outcome::Ok(stdout.into()));
    }

    /// Queue one failing run.
    pub fn push_fail(&self, status: i32, output: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .script
            .push_back(Outcome::Fail { status, output: output.into() });
    }

    /// Queue `n` failing runs; later runs fall back to the script or
    /// the default success.
    pub fn fail_times(&self, n: usize, output: impl Into<Vec<u8>>) {
        let output = output.into();
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..n {
            inner.script.push_back(Outcome::Fail { status: 1, output: output.clone() });
        }
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.inner.lock().unwrap().commands.len()
    }

    /// Whether any recorded invocation renders exactly as `display`.
    pub fn has_command(&self, display: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .commands
            .iter()
            .any(|c| c.display() == display)
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, cmd: &str, args: &[String]) -> ExecResult<Output> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(RecordedCommand {
            cmd: cmd.to_string(),
            args: args.to_vec(),
        });
        match inner.script.pop_front() {
            Some(Outcome::Ok(stdout)) => Ok(Output { stdout, stderr: Vec::new() }),
            Some(Outcome::Fail { status, output }) => Err(ExecError::NonZero {
                cmd: cmd.to_string(),
                status,
                output,
            }),
            None => Ok(Output {
                stdout: inner.default_stdout.clone(),
                stderr: Vec::new(),
            }),
        }
    }
}
