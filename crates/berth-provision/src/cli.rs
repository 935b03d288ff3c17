//! cli — production provisioner that shells out to the orchestrator binary.
//!
//! Every operation maps to one or more invocations of the configured
//! command (`juju` by default) with the application name doubling as the
//! orchestrator environment name, so each application lives in its own
//! isolated environment.

use std::sync::Arc;

use async_trait::async_trait;
use berth_core::{Unit, UnitState};
use berth_exec::{argv, filter_noise, Executor, Output};
use tracing::{error, info};

use crate::{ProvisionError, ProvisionResult, Provisioner, StatusReport};

/// Knobs for [`CliProvisioner`], normally filled from the daemon config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Orchestrator binary to invoke.
    pub command: String,
    /// Local charm repository passed to `deploy`.
    pub charms_path: String,
    /// OS series baked into the charm URL.
    pub series: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            command: "juju".to_string(),
            charms_path: "/home/charms".to_string(),
            series: "precise".to_string(),
        }
    }
}

pub struct CliProvisioner {
    executor: Arc<dyn Executor>,
    config: CliConfig,
}

impl CliProvisioner {
    pub fn new(executor: Arc<dyn Executor>, config: CliConfig) -> Self {
        CliProvisioner { executor, config }
    }

    async fn run(&self, args: &[String]) -> ProvisionResult<Output> {
        self.executor
            .run(&self.config.command, args)
            .await
            .map_err(ProvisionError::from_exec)
    }
}

#[async_trait]
impl Provisioner for CliProvisioner {
    /// `deploy` blocks until the first unit converges, which can take
    /// minutes on a cold machine pool. It runs detached here; callers watch
    /// progress through status collection like every other state change.
    async fn provision(&self, app: &str, platform: &str) -> ProvisionResult<()> {
        let args = argv![
            "deploy",
            "-e",
            app,
            format!("--repository={}", self.config.charms_path),
            format!("local:{}/{}", self.config.series, platform),
            app,
        ];
        let executor = self.executor.clone();
        let command = self.config.command.clone();
        let app = app.to_string();
        tokio::spawn(async move {
            match executor.run(&command, &args).await {
                Ok(_) => info!(%app, "deploy finished"),
                Err(err) => error!(%app, error = %err, "deploy failed"),
            }
        });
        Ok(())
    }

    async fn destroy(&self, app: &str, units: &[Unit]) -> ProvisionResult<()> {
        self.run(&argv!["destroy-service", "-e", app, app]).await?;
        for unit in units {
            if unit.machine_id == 0 {
                continue;
            }
            self.run(&argv!["terminate-machine", "-e", app, unit.machine_id])
                .await?;
        }
        Ok(())
    }

    async fn add_units(&self, app: &str, n: u32) -> ProvisionResult<()> {
        self.run(&argv!["add-unit", "-e", app, app, "--num-units", n])
            .await?;
        Ok(())
    }

    async fn remove_unit(&self, app: &str, unit_name: &str, machine_id: u32) -> ProvisionResult<()> {
        self.run(&argv!["remove-unit", "-e", app, unit_name]).await?;
        if machine_id != 0 {
            self.run(&argv!["terminate-machine", "-e", app, machine_id])
                .await?;
        }
        Ok(())
    }

    async fn execute(&self, app: &str, unit: &Unit, cmd: &[String]) -> ProvisionResult<Vec<u8>> {
        let state = unit.derived_state();
        if state != UnitState::Started {
            return Err(ProvisionError::UnitNotStarted {
                unit: unit.name.clone(),
                state,
            });
        }
        let mut args = argv![
            "ssh",
            "-o",
            "StrictHostKeyChecking no",
            "-q",
            "-e",
            app,
            unit.machine_id,
        ];
        args.extend(cmd.iter().cloned());
        let output = self.run(&args).await?;
        Ok(filter_noise(&output.combined()))
    }

    async fn add_relation(&self, app: &str, other: &str) -> ProvisionResult<()> {
        self.run(&argv!["add-relation", "-e", app, app, other]).await?;
        Ok(())
    }

    async fn remove_relation(&self, app: &str, other: &str) -> ProvisionResult<()> {
        self.run(&argv!["remove-relation", "-e", app, app, other])
            .await?;
        Ok(())
    }

    async fn collect_status(&self) -> ProvisionResult<StatusReport> {
        let output = self.run(&argv!["status"]).await?;
        crate::parse_status(&output.stdout)
    }
}
