//! Command worker — serialized remote command execution.
//!
//! Every remote command (user `run` requests and env propagation scripts)
//! flows through one channel of capacity 1, so at most one command batch
//! is in flight per process and callers feel backpressure as soon as one
//! is queued. Replies travel on a per-request oneshot.

use std::sync::Arc;

use berth_provision::Provisioner;
use berth_store::Collections;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Capacity of the command channel. One queued message plus one in
/// flight mirrors an unbuffered rendezvous closely enough for callers.
pub(crate) const COMMAND_QUEUE: usize = 1;

pub struct CommandRequest {
    pub app: String,
    pub argv: Vec<String>,
    pub reply: oneshot::Sender<AppResult<Vec<u8>>>,
}

pub(crate) struct CommandRunner {
    store: Collections,
    provisioner: Arc<dyn Provisioner>,
}

impl CommandRunner {
    pub(crate) fn new(store: Collections, provisioner: Arc<dyn Provisioner>) -> Self {
        Self { store, provisioner }
    }

    pub(crate) async fn run(
        self,
        mut requests: mpsc::Receiver<CommandRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("command worker started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("command worker stopped");
    }

    async fn handle(&self, request: CommandRequest) {
        let result = self.execute(&request.app, &request.argv).await;
        // A caller that gave up on the reply is not an error here.
        let _ = request.reply.send(result);
    }

    /// Run `argv` on every started unit, concatenating filtered outputs.
    async fn execute(&self, app: &str, argv: &[String]) -> AppResult<Vec<u8>> {
        let record = self
            .store
            .find_app(app)?
            .ok_or_else(|| AppError::AppNotFound(app.to_string()))?;
        let started: Vec<_> = record.units.iter().filter(|u| u.is_started()).collect();
        if started.is_empty() {
            return Err(AppError::NoUnitsAvailable);
        }
        let mut output = Vec::new();
        for unit in started {
            output.extend(self.provisioner.execute(app, unit, argv).await?);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::Unit;
    use berth_exec::argv;
    use berth_provision::FakeProvisioner;
    use berth_store::AppRecord;

    fn started_unit(name: &str, machine_id: u32) -> Unit {
        let mut unit = Unit::new(name);
        unit.machine_id = machine_id;
        unit.instance_state = "running".to_string();
        unit.agent_state = "started".to_string();
        unit.machine_agent_state = "running".to_string();
        unit
    }

    fn spawn_runner(
        store: Collections,
        provisioner: FakeProvisioner,
    ) -> (mpsc::Sender<CommandRequest>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = CommandRunner::new(store, Arc::new(provisioner));
        tokio::spawn(runner.run(rx, shutdown_rx));
        (tx, shutdown_tx)
    }

    async fn send(
        tx: &mpsc::Sender<CommandRequest>,
        app: &str,
        argv: Vec<String>,
    ) -> AppResult<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        tx.send(CommandRequest { app: app.to_string(), argv, reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn runs_on_every_started_unit() {
        let store = Collections::open_in_memory().unwrap();
        let mut app = AppRecord::new("blog", "python");
        app.units.push(started_unit("blog/0", 105));
        app.units.push(Unit::new("blog/1"));
        app.units.push(started_unit("blog/2", 107));
        store.insert_app(&app).unwrap();

        let fake = FakeProvisioner::new();
        fake.set_exec_output(b"ok\n".to_vec());
        let (tx, _shutdown) = spawn_runner(store, fake.clone());

        let out = send(&tx, "blog", argv!["ls", "-la"]).await.unwrap();
        assert_eq!(out, b"ok\nok\n");
        assert!(fake.has_op("execute blog blog/0 ls -la"));
        assert!(fake.has_op("execute blog blog/2 ls -la"));
        assert_eq!(fake.count_ops("execute"), 2);
    }

    #[tokio::test]
    async fn no_started_units_is_an_error() {
        let store = Collections::open_in_memory().unwrap();
        let mut app = AppRecord::new("blog", "python");
        app.units.push(Unit::new("blog/0"));
        store.insert_app(&app).unwrap();

        let (tx, _shutdown) = spawn_runner(store, FakeProvisioner::new());
        let err = send(&tx, "blog", argv!["date"]).await.unwrap_err();
        assert!(matches!(err, AppError::NoUnitsAvailable));
    }

    #[tokio::test]
    async fn unknown_app_is_an_error() {
        let store = Collections::open_in_memory().unwrap();
        let (tx, _shutdown) = spawn_runner(store, FakeProvisioner::new());
        let err = send(&tx, "ghost", argv!["date"]).await.unwrap_err();
        assert!(matches!(err, AppError::AppNotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker() {
        let store = Collections::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = CommandRunner::new(store, Arc::new(FakeProvisioner::new()));
        let handle = tokio::spawn(runner.run(rx, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // The worker is gone; replies never arrive.
        let (reply, reply_rx) = oneshot::channel();
        let _ = tx
            .send(CommandRequest {
                app: "blog".to_string(),
                argv: argv!["date"],
                reply,
            })
            .await;
        assert!(reply_rx.await.is_err());
    }
}
