//! Application lifecycle coordinator.
//!
//! [`AppCoordinator`] is the front door for every application mutation:
//! create, destroy, env changes, team grants, unit management and remote
//! command execution. Multi-step operations hold the app's entry in the
//! lock registry so concurrent mutations of one application serialize
//! while distinct applications proceed in parallel.
//!
//! Construction wires the worker channels without spawning anything;
//! [`AppCoordinator::start`] brings up the command worker, the env
//! propagation worker and the reconciliation ticker, and
//! [`AppCoordinator::shutdown`] stops them again.

use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{valid_app_name, ChainedError, EnvVar, LogEntry, Unit, UnitState, APP_NAME_RULE};
use berth_envfile::{EnvFileManager, Environment};
use berth_gitacl::{AclAgentHandle, AclError};
use berth_provision::{hook_command, Provisioner};
use berth_store::{AppRecord, Collections, StoreError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::CredentialBroker;
use crate::commands::{CommandRequest, CommandRunner, COMMAND_QUEUE};
use crate::error::{AppError, AppResult};
use crate::locks::AppLocks;
use crate::logs::LogWriter;
use crate::propagate::{EnvMessage, EnvPropagator, DEFAULT_RUN_ATTEMPTS, PROPAGATION_QUEUE};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Host users clone application repositories from.
    pub git_host: String,
    /// Provisioner environment type written to new env-file entries.
    pub env_type: String,
    /// Machine series new units boot with.
    pub default_series: String,
    /// Submission attempts per env propagation message.
    pub run_attempts: u32,
    /// Pause between propagation attempts.
    pub retry_delay: Duration,
    /// Status reconciliation period.
    pub reconcile_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            git_host: "localhost".to_string(),
            env_type: "ec2".to_string(),
            default_series: "precise".to_string(),
            run_attempts: DEFAULT_RUN_ATTEMPTS,
            retry_delay: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

/// Reply body of a successful create.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApp {
    pub name: String,
    pub state: UnitState,
    /// Read-write clone URL (`git@<host>:<name>.git`).
    pub repository_url: String,
    /// Anonymous read-only clone URL (`git://<host>/<name>.git`).
    pub repository_ro_url: String,
}

/// Channel receivers parked until `start` hands them to the workers.
struct PendingWorkers {
    commands: mpsc::Receiver<CommandRequest>,
    env_updates: mpsc::Receiver<EnvMessage>,
    shutdown: watch::Receiver<bool>,
}

#[derive(Default)]
struct Workers {
    pending: Option<PendingWorkers>,
    running: Vec<JoinHandle<()>>,
}

pub struct AppCoordinator {
    store: Collections,
    provisioner: Arc<dyn Provisioner>,
    acl: AclAgentHandle,
    env_file: Arc<EnvFileManager>,
    broker: Arc<dyn CredentialBroker>,
    config: CoordinatorConfig,
    locks: AppLocks,
    commands: mpsc::Sender<CommandRequest>,
    env_updates: mpsc::Sender<EnvMessage>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Workers>,
}

impl AppCoordinator {
    /// Wire the coordinator without starting any background worker.
    pub fn new(
        store: Collections,
        provisioner: Arc<dyn Provisioner>,
        acl: AclAgentHandle,
        env_file: Arc<EnvFileManager>,
        broker: Arc<dyn CredentialBroker>,
        config: CoordinatorConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (env_tx, env_rx) = mpsc::channel(PROPAGATION_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            provisioner,
            acl,
            env_file,
            broker,
            config,
            locks: AppLocks::new(),
            commands: cmd_tx,
            env_updates: env_tx,
            shutdown: shutdown_tx,
            workers: Mutex::new(Workers {
                pending: Some(PendingWorkers {
                    commands: cmd_rx,
                    env_updates: env_rx,
                    shutdown: shutdown_rx,
                }),
                running: Vec::new(),
            }),
        }
    }

    /// Spawn the command, propagation and reconciliation workers.
    ///
    /// Calling it a second time is a no-op.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        let Some(pending) = workers.pending.take() else {
            return;
        };
        let runner = CommandRunner::new(self.store.clone(), self.provisioner.clone());
        let propagator = EnvPropagator::new(
            self.commands.clone(),
            self.config.run_attempts,
            self.config.retry_delay,
        );
        let reconciler = Reconciler::new(
            self.store.clone(),
            self.provisioner.clone(),
            self.locks.clone(),
            self.config.reconcile_interval,
        );
        workers.running.push(tokio::spawn(
            runner.run(pending.commands, pending.shutdown.clone()),
        ));
        workers.running.push(tokio::spawn(
            propagator.run(pending.env_updates, pending.shutdown.clone()),
        ));
        workers
            .running
            .push(tokio::spawn(reconciler.run(pending.shutdown)));
        info!("application coordinator started");
    }

    /// Signal the workers to stop and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.running.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "coordinator worker did not exit cleanly");
            }
        }
        info!("application coordinator stopped");
    }

    // ── Create / destroy ───────────────────────────────────────────

    pub async fn create_app(
        &self,
        name: &str,
        framework: &str,
        requester: &str,
    ) -> AppResult<CreatedApp> {
        if !valid_app_name(name) {
            return Err(AppError::InvalidName(APP_NAME_RULE.to_string()));
        }
        if !valid_app_name(framework) {
            return Err(AppError::InvalidParam(format!(
                "invalid platform name: {framework}"
            )));
        }
        let teams: Vec<String> = self
            .store
            .teams_for_user(requester)?
            .into_iter()
            .map(|t| t.name)
            .collect();
        if teams.is_empty() {
            return Err(AppError::NoTeams(requester.to_string()));
        }

        let _guard = self.locks.acquire(name).await;
        let mut app = AppRecord::new(name, framework);
        app.teams = teams;
        if let Err(err) = self.store.insert_app(&app) {
            return Err(match err {
                StoreError::Duplicate { .. } => {
                    AppError::Conflict(format!("application {name} already exists"))
                }
                other => other.into(),
            });
        }
        if let Err(err) = self.finish_create(&app).await {
            self.unwind_create(&app).await;
            return Err(
                ChainedError::because(format!("failed to create application {name}"), err).into(),
            );
        }
        info!(app = %name, platform = %framework, %requester, "application created");
        Ok(self.created(&app))
    }

    /// Steps after the record exists: credentials, ACL project, env
    /// entry, then the deploy. The deploy itself runs detached; only its
    /// submission is awaited.
    async fn finish_create(&self, app: &AppRecord) -> AppResult<()> {
        let creds = self.broker.provision(&app.name).await?;
        self.acl.add_project(&app.teams[0], &app.name).await?;
        let entry = Environment {
            env_type: self.config.env_type.clone(),
            admin_secret: hex::encode(Uuid::new_v4().as_bytes()),
            control_bucket: creds.control_bucket,
            default_series: self.config.default_series.clone(),
            default_image_id: None,
            default_instance_type: None,
            access_key: creds.access_key,
            secret_key: creds.secret_key,
            ec2_uri: None,
            s3_uri: None,
            juju_origin: None,
        };
        self.env_file.write_entry(&app.name, entry).await?;
        self.provisioner.provision(&app.name, &app.framework).await?;
        Ok(())
    }

    /// Best-effort removal of whatever a failed create left behind.
    async fn unwind_create(&self, app: &AppRecord) {
        if let Err(err) = self.env_file.remove_entry(&app.name).await {
            warn!(app = %app.name, error = %err, "create unwind: environment entry not removed");
        }
        match self.acl.remove_project(&app.teams[0], &app.name).await {
            Ok(())
            | Err(AclError::GroupNotFound(_))
            | Err(AclError::OptionNotSet { .. })
            | Err(AclError::ValueNotFound { .. }) => {}
            Err(err) => {
                warn!(app = %app.name, error = %err, "create unwind: acl project not removed");
            }
        }
        if let Err(err) = self.broker.revoke(&app.name).await {
            warn!(app = %app.name, error = %err, "create unwind: credentials not revoked");
        }
        if let Err(err) = self.store.remove_app(&app.name) {
            warn!(app = %app.name, error = %err, "create unwind: record not removed");
        }
    }

    fn created(&self, app: &AppRecord) -> CreatedApp {
        CreatedApp {
            name: app.name.clone(),
            state: app.state,
            repository_url: format!("git@{}:{}.git", self.config.git_host, app.name),
            repository_ro_url: format!("git://{}/{}.git", self.config.git_host, app.name),
        }
    }

    /// Tear everything down, collecting failures instead of stopping.
    ///
    /// The record deletion is always attempted; whatever failed along
    /// the way comes back as one chained error.
    pub async fn destroy_app(&self, name: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let app = self.app_info(name)?;

        let mut failures: Vec<Box<dyn Error + Send + Sync>> = Vec::new();
        if let Err(err) = self.provisioner.destroy(name, &app.units).await {
            failures.push(Box::new(err));
        }
        if let Err(err) = self.env_file.remove_entry(name).await {
            failures.push(Box::new(err));
        }
        for team in &app.teams {
            if let Err(err) = self.acl.remove_project(team, name).await {
                failures.push(Box::new(err));
            }
        }
        if let Err(err) = self.broker.revoke(name).await {
            failures.push(Box::new(err));
        }
        if let Err(err) = self.store.remove_app(name) {
            failures.push(Box::new(err));
        }

        match ChainedError::collect(format!("errors destroying application {name}"), failures) {
            Some(chain) => Err(chain.into()),
            None => {
                info!(app = %name, "application destroyed");
                Ok(())
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn app_info(&self, name: &str) -> AppResult<AppRecord> {
        self.store
            .find_app(name)?
            .ok_or_else(|| AppError::AppNotFound(name.to_string()))
    }

    /// Applications visible to the requester (any shared team).
    pub fn list_apps(&self, requester: &str) -> AppResult<Vec<AppRecord>> {
        let teams: Vec<String> = self
            .store
            .teams_for_user(requester)?
            .into_iter()
            .map(|t| t.name)
            .collect();
        Ok(self.store.list_apps_in_teams(&teams)?)
    }

    /// Newest log entries, optionally filtered by source.
    pub fn app_log(
        &self,
        name: &str,
        lines: Option<usize>,
        source: Option<&str>,
    ) -> AppResult<Vec<LogEntry>> {
        let app = self.app_info(name)?;
        let mut entries: Vec<LogEntry> = match source {
            Some(src) => app.logs.into_iter().filter(|e| e.source == src).collect(),
            None => app.logs,
        };
        if let Some(n) = lines {
            if entries.len() > n {
                entries.drain(..entries.len() - n);
            }
        }
        Ok(entries)
    }

    /// An `io::Write` sink appending to the app's log under `source`.
    pub fn log_writer(&self, app: &str, source: &str) -> LogWriter {
        LogWriter::new(self.store.clone(), app, source)
    }

    // ── Environment variables ──────────────────────────────────────

    /// Merge `vars` into the app environment and propagate the applied
    /// set to the units. A public set never overwrites a private
    /// (binding-injected) variable; those keys are skipped.
    pub async fn set_envs(
        &self,
        name: &str,
        vars: BTreeMap<String, String>,
        public: bool,
    ) -> AppResult<()> {
        if vars.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        let mut applied = Vec::new();
        for (key, value) in vars {
            if public && app.env.get(&key).is_some_and(|v| !v.public) {
                debug!(app = %name, var = %key, "private variable kept");
                continue;
            }
            let var = if public {
                EnvVar::public(&key, &value)
            } else {
                EnvVar::private(&key, &value)
            };
            app.env.insert(key, var.clone());
            applied.push(var);
        }
        if applied.is_empty() {
            return Ok(());
        }
        self.store.update_app(&app)?;
        self.enqueue_env(name, applied).await
    }

    /// Remove `names` from the app environment. With `public_only`,
    /// private variables are left in place. The units get the full
    /// remaining set re-exported.
    pub async fn unset_envs(
        &self,
        name: &str,
        names: &[String],
        public_only: bool,
    ) -> AppResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        let mut removed = false;
        for key in names {
            if public_only && app.env.get(key).is_some_and(|v| !v.public) {
                debug!(app = %name, var = %key, "private variable kept");
                continue;
            }
            removed |= app.env.remove(key).is_some();
        }
        if !removed {
            return Ok(());
        }
        self.store.update_app(&app)?;
        // The remote env file is append-only, so re-export what is left.
        let remaining: Vec<EnvVar> = app.env.values().cloned().collect();
        self.enqueue_env(name, remaining).await
    }

    async fn enqueue_env(&self, app: &str, vars: Vec<EnvVar>) -> AppResult<()> {
        let message = EnvMessage {
            app: app.to_string(),
            vars,
            success: None,
        };
        self.env_updates
            .send(message)
            .await
            .map_err(|_| AppError::WorkerGone)
    }

    // ── Service-instance binding ───────────────────────────────────

    /// Relate the app to a deployed service instance and inject its
    /// connection variables as private env vars.
    pub async fn bind_instance(
        &self,
        name: &str,
        instance: &str,
        vars: BTreeMap<String, String>,
    ) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        self.provisioner.add_relation(name, instance).await?;
        let mut added = Vec::new();
        for (key, value) in vars {
            let var = EnvVar::private(&key, &value);
            app.env.insert(key, var.clone());
            added.push(var);
        }
        info!(app = %name, %instance, vars = added.len(), "service instance bound");
        if added.is_empty() {
            return Ok(());
        }
        self.store.update_app(&app)?;
        self.enqueue_env(name, added).await
    }

    /// Break the relation and drop the variables the binding injected.
    pub async fn unbind_instance(
        &self,
        name: &str,
        instance: &str,
        var_names: &[String],
    ) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        self.provisioner.remove_relation(name, instance).await?;
        let mut removed = false;
        for key in var_names {
            removed |= app.env.remove(key).is_some();
        }
        info!(app = %name, %instance, "service instance unbound");
        if !removed {
            return Ok(());
        }
        self.store.update_app(&app)?;
        let remaining: Vec<EnvVar> = app.env.values().cloned().collect();
        self.enqueue_env(name, remaining).await
    }

    // ── Team access ────────────────────────────────────────────────

    /// Grant `team` access: the record gains the team, the team's ACL
    /// group gains the repository, and members reachable through no
    /// previously granted team gain git access.
    pub async fn grant_team(&self, name: &str, team: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        if self.store.find_team(team)?.is_none() {
            return Err(AppError::TeamNotFound(team.to_string()));
        }
        if app.has_team(team) {
            return Err(AppError::AlreadyGranted {
                team: team.to_string(),
                app: name.to_string(),
            });
        }
        let newcomers = self.store.uncovered_members(team, &app.teams)?;
        app.teams.push(team.to_string());
        self.store.update_app(&app)?;
        self.acl.add_project(team, name).await?;
        for member in &newcomers {
            tolerate_membership(self.acl.add_member(team, member).await)?;
        }
        info!(app = %name, %team, members = newcomers.len(), "team granted");
        Ok(())
    }

    /// Revoke `team`: refuse to orphan the app, strip the repository
    /// from the team's group, and drop git access for members not
    /// covered by a remaining team.
    pub async fn revoke_team(&self, name: &str, team: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        if !app.has_team(team) {
            return Err(AppError::NotGranted {
                team: team.to_string(),
                app: name.to_string(),
            });
        }
        if app.teams.len() == 1 {
            return Err(AppError::LastTeam);
        }
        let remaining: Vec<String> = app
            .teams
            .iter()
            .filter(|t| t.as_str() != team)
            .cloned()
            .collect();
        let leavers = self.store.uncovered_members(team, &remaining)?;
        self.acl.remove_project(team, name).await?;
        for member in &leavers {
            tolerate_membership(self.acl.remove_member(team, member).await)?;
        }
        app.teams = remaining;
        self.store.update_app(&app)?;
        info!(app = %name, %team, members = leavers.len(), "team revoked");
        Ok(())
    }

    // ── Units ──────────────────────────────────────────────────────

    pub async fn add_units(&self, name: &str, n: u32) -> AppResult<()> {
        if n == 0 {
            return Err(AppError::InvalidParam(
                "cannot add zero units".to_string(),
            ));
        }
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        if !app.quota.allows(app.units.len(), n as usize) {
            return Err(AppError::QuotaExceeded {
                app: name.to_string(),
                limit: app.quota.limit.unwrap_or_default(),
            });
        }
        self.provisioner.add_units(name, n).await?;
        for _ in 0..n {
            let unit_name = app.next_unit_name();
            app.units.push(Unit::new(unit_name));
        }
        app.refresh_state();
        self.store.update_app(&app)?;
        info!(app = %name, added = n, total = app.units.len(), "units added");
        Ok(())
    }

    pub async fn remove_unit(&self, name: &str, unit_name: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(name).await;
        let mut app = self.app_info(name)?;
        let Some(unit) = app.unit(unit_name).cloned() else {
            return Err(AppError::UnitNotFound {
                app: name.to_string(),
                unit: unit_name.to_string(),
            });
        };
        self.provisioner
            .remove_unit(name, unit_name, unit.machine_id)
            .await?;
        app.units.retain(|u| u.name != unit_name);
        app.refresh_state();
        self.store.update_app(&app)?;
        info!(app = %name, unit = %unit_name, "unit removed");
        Ok(())
    }

    // ── Remote commands ────────────────────────────────────────────

    /// Run a shell command on every started unit through the command
    /// channel. Output is returned and teed into the app log under the
    /// `app-run` source.
    pub async fn run_command(&self, name: &str, command: &str) -> AppResult<Vec<u8>> {
        self.app_info(name)?;
        let mut log = self.log_writer(name, "app-run");
        if let Err(err) = writeln!(log, "running '{command}'") {
            warn!(app = %name, error = %err, "command not logged");
        }

        let output = self
            .dispatch_command(name, wrap_command(name, command))
            .await?;

        if let Err(err) = log.write_all(&output).and_then(|()| log.flush()) {
            warn!(app = %name, error = %err, "command output not logged");
        }
        Ok(output)
    }

    /// Run the restart hook on every started unit. Hooks run bare, with
    /// no env sourcing or directory change: they manage their own
    /// environment.
    pub async fn restart_app(&self, name: &str) -> AppResult<Vec<u8>> {
        self.app_info(name)?;
        let mut log = self.log_writer(name, "berth");
        if let Err(err) = writeln!(log, "executing hook to restart") {
            warn!(app = %name, error = %err, "restart not logged");
        }

        let output = self.dispatch_command(name, hook_command("restart")).await?;

        if let Err(err) = log.write_all(&output).and_then(|()| log.flush()) {
            warn!(app = %name, error = %err, "restart output not logged");
        }
        Ok(output)
    }

    async fn dispatch_command(&self, name: &str, command: String) -> AppResult<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommandRequest {
            app: name.to_string(),
            argv: vec![command],
            reply: reply_tx,
        };
        self.commands
            .send(request)
            .await
            .map_err(|_| AppError::WorkerGone)?;
        reply_rx.await.map_err(|_| AppError::WorkerGone)?
    }
}

/// Wrap a user command so it runs with the app environment loaded and
/// the current release as working directory. Passed as a single argv
/// element for the remote shell to interpret.
fn wrap_command(app: &str, command: &str) -> String {
    let env_file = format!("/home/application/apps/{app}/{app}.env");
    format!(
        "[ -f {env_file} ] && source {env_file}; \
         [ -d /home/application/current ] && cd /home/application/current; {command}"
    )
}

/// Grant/revoke recompute git membership from team records, which move
/// independently of past grants; a member already present (or already
/// gone) is not a failure.
fn tolerate_membership(result: Result<(), AclError>) -> AppResult<()> {
    match result {
        Ok(())
        | Err(AclError::DuplicateValue { .. })
        | Err(AclError::ValueNotFound { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
