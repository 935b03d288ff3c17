//! Env propagation worker — pushes environment variables onto units.
//!
//! Units read their environment from `/home/application/apps/<app>/<app>.env`.
//! After a set/unset/bind the coordinator enqueues a message here; the
//! worker composes one heredoc append script and submits it through the
//! command channel, retrying the submission because fresh units often are
//! not ready to accept commands yet.

use std::time::Duration;

use berth_core::EnvVar;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::commands::CommandRequest;
use crate::error::{AppError, AppResult};

/// Capacity of the propagation channel; bursts beyond it apply
/// backpressure to the enqueuing request.
pub(crate) const PROPAGATION_QUEUE: usize = 10;

/// Default number of submission attempts per message.
pub(crate) const DEFAULT_RUN_ATTEMPTS: u32 = 5;

pub struct EnvMessage {
    pub app: String,
    /// Variables to (re)export on the units.
    pub vars: Vec<EnvVar>,
    /// Final outcome, when the enqueuer cares.
    pub success: Option<oneshot::Sender<bool>>,
}

/// The script appended to the unit's env file. One heredoc keeps the
/// whole update a single remote command.
pub(crate) fn compose_export_script(app: &str, vars: &[EnvVar]) -> String {
    let mut script = format!("cat >> /home/application/apps/{app}/{app}.env <<END\n");
    for var in vars {
        script.push_str(&format!("export {}=\"{}\"\n", var.name, var.value));
    }
    script.push_str("END\n");
    script
}

pub(crate) struct EnvPropagator {
    commands: mpsc::Sender<CommandRequest>,
    run_attempts: u32,
    retry_delay: Duration,
}

impl EnvPropagator {
    pub(crate) fn new(
        commands: mpsc::Sender<CommandRequest>,
        run_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self { commands, run_attempts, retry_delay }
    }

    pub(crate) async fn run(
        self,
        mut messages: mpsc::Receiver<EnvMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("env propagation worker started");
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("env propagation worker stopped");
    }

    async fn handle(&self, message: EnvMessage) {
        let ok = self.propagate(&message.app, &message.vars).await;
        if let Some(success) = message.success {
            let _ = success.send(ok);
        }
    }

    async fn propagate(&self, app: &str, vars: &[EnvVar]) -> bool {
        if vars.is_empty() {
            return true;
        }
        let script = compose_export_script(app, vars);
        for attempt in 1..=self.run_attempts {
            match self.submit(app, &script).await {
                Ok(()) => {
                    debug!(%app, attempt, "environment propagated");
                    return true;
                }
                Err(err) if attempt < self.run_attempts => {
                    warn!(%app, attempt, error = %err, "environment propagation failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    error!(
                        %app,
                        attempts = self.run_attempts,
                        error = %err,
                        "environment propagation gave up"
                    );
                }
            }
        }
        false
    }

    async fn submit(&self, app: &str, script: &str) -> AppResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(CommandRequest {
                app: app.to_string(),
                argv: vec![script.to_string()],
                reply,
            })
            .await
            .map_err(|_| AppError::WorkerGone)?;
        outcome.await.map_err(|_| AppError::WorkerGone)?.map(|_| ())
    }
}
