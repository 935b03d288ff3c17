//! berth-provision — the seam between the control plane and the machinery
//! that actually creates and destroys compute.
//!
//! The [`Provisioner`] trait is the only surface the rest of berth talks to.
//! [`CliProvisioner`] drives an external orchestrator binary over its CLI and
//! is the production implementation; [`FakeProvisioner`] records calls for
//! tests. Status output from the orchestrator is parsed into a
//! [`StatusReport`] by the `status` module.

mod cli;
mod fake;
mod status;

pub use cli::{CliConfig, CliProvisioner};
pub use fake::FakeProvisioner;
pub use status::{parse_status, MachineStatus, ServiceStatus, StatusReport, UnitReport};

use async_trait::async_trait;
use berth_core::{Unit, UnitState};
use berth_exec::ExecError;
use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Command execution is only allowed on units whose derived state is
    /// `started`; anything earlier and the unit has no agent to talk to.
    #[error("unit {unit} is not started (current state: {state:?})")]
    UnitNotStarted { unit: String, state: UnitState },

    /// The orchestrator CLI exited non-zero. `output` carries the combined
    /// stdout/stderr with provisioner noise already stripped.
    #[error("provisioner command failed: {}", String::from_utf8_lossy(.output).trim())]
    Cli {
        #[source]
        source: ExecError,
        output: Vec<u8>,
    },

    /// The orchestrator binary could not be spawned at all.
    #[error("provisioner unavailable: {0}")]
    Unavailable(#[source] ExecError),

    /// `status` printed something that does not parse as a status document.
    #[error("malformed status output: {0}")]
    MalformedStatus(String),
}

impl ProvisionError {
    pub(crate) fn from_exec(err: ExecError) -> Self {
        match err {
            ExecError::Spawn { .. } => ProvisionError::Unavailable(err),
            ExecError::NonZero { .. } => {
                let output = berth_exec::filter_noise(err.output());
                ProvisionError::Cli { source: err, output }
            }
        }
    }
}

/// Absolute path of a lifecycle hook as installed on every unit.
pub fn hook_command(hook: &str) -> String {
    format!("/var/lib/berth/hooks/{hook}")
}

/// Operations the coordinator needs from the compute backend.
///
/// Implementations are expected to be cheap to clone behind an `Arc` and
/// safe to call concurrently; the coordinator serializes per-application
/// work itself but status collection runs on an independent ticker.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start provisioning the first unit of `app`. Long-running; returns as
    /// soon as the request is underway, with progress observable through
    /// [`Provisioner::collect_status`].
    async fn provision(&self, app: &str, platform: &str) -> ProvisionResult<()>;

    /// Tear down `app` and release the machines its units occupy.
    async fn destroy(&self, app: &str, units: &[Unit]) -> ProvisionResult<()>;

    /// Grow `app` by `n` units.
    async fn add_units(&self, app: &str, n: u32) -> ProvisionResult<()>;

    /// Remove one named unit and release its machine.
    async fn remove_unit(&self, app: &str, unit_name: &str, machine_id: u32) -> ProvisionResult<()>;

    /// Run `cmd` on the machine hosting `unit`, returning combined output
    /// with provisioner noise filtered out. Refused unless the unit's
    /// derived state is [`UnitState::Started`].
    async fn execute(&self, app: &str, unit: &Unit, cmd: &[String]) -> ProvisionResult<Vec<u8>>;

    /// Run the named lifecycle hook on the machine hosting `unit`. Goes
    /// through [`Provisioner::execute`], so the started gate and noise
    /// filtering apply.
    async fn execute_hook(&self, app: &str, unit: &Unit, hook: &str) -> ProvisionResult<Vec<u8>> {
        self.execute(app, unit, &[hook_command(hook)]).await
    }

    /// Relate `app` to another deployed service (e.g. a service instance).
    async fn add_relation(&self, app: &str, other: &str) -> ProvisionResult<()>;

    /// Break the relation between `app` and `other`.
    async fn remove_relation(&self, app: &str, other: &str) -> ProvisionResult<()>;

    /// Fetch the orchestrator's view of every service and machine.
    async fn collect_status(&self) -> ProvisionResult<StatusReport>;
}
