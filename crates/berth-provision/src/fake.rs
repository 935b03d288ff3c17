//! fake — scriptable in-memory provisioner for tests.
//!
//! Records every operation as a display string and can be told to fail the
//! next N calls of a given verb, mirroring how the recording executor
//! scripts outcomes one level down.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use berth_core::{Unit, UnitState};
use berth_exec::ExecError;

use crate::{ProvisionError, ProvisionResult, Provisioner, StatusReport};

#[derive(Default)]
struct Inner {
    ops: Vec<String>,
    failures: HashMap<String, VecDeque<String>>,
    status: StatusReport,
    exec_output: Vec<u8>,
}

/// Provisioner double shared by cloning; all clones see the same log.
#[derive(Clone, Default)]
pub struct FakeProvisioner {
    inner: Arc<Mutex<Inner>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded operation, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub fn has_op(&self, op: &str) -> bool {
        self.inner.lock().unwrap().ops.iter().any(|o| o == op)
    }

    /// How many recorded operations start with `prefix`.
    pub fn count_ops(&self, prefix: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    /// Fail the next call of `verb` ("deploy", "destroy", "add-units",
    /// "remove-unit", "execute", "add-relation", "remove-relation",
    /// "status") with the given message.
    pub fn fail_next(&self, verb: &str, message: &str) {
        self.fail_times(verb, 1, message);
    }

    /// Fail the next `n` calls of `verb`.
    pub fn fail_times(&self, verb: &str, n: usize, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.failures.entry(verb.to_string()).or_default();
        for _ in 0..n {
            queue.push_back(message.to_string());
        }
    }

    /// Report to hand out from `collect_status`.
    pub fn set_status(&self, report: StatusReport) {
        self.inner.lock().unwrap().status = report;
    }

    /// Output returned by successful `execute` calls.
    pub fn set_exec_output(&self, output: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().exec_output = output.into();
    }

    fn record(&self, verb: &str, op: String) -> ProvisionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.ops.push(op);
        if let Some(queue) = inner.failures.get_mut(verb) {
            if let Some(message) = queue.pop_front() {
                return Err(scripted_failure(verb, &message));
            }
        }
        Ok(())
    }
}

fn scripted_failure(verb: &str, message: &str) -> ProvisionError {
    let output = message.as_bytes().to_vec();
    ProvisionError::Cli {
        source: ExecError::NonZero {
            cmd: verb.to_string(),
            status: 1,
            output: output.clone(),
        },
        output,
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(&self, app: &str, platform: &str) -> ProvisionResult<()> {
        self.record("deploy", format!("deploy {app} {platform}"))
    }

    async fn destroy(&self, app: &str, units: &[Unit]) -> ProvisionResult<()> {
        self.record("destroy", format!("destroy {app}"))?;
        for unit in units {
            if unit.machine_id != 0 {
                self.record("terminate", format!("terminate {app} {}", unit.machine_id))?;
            }
        }
        Ok(())
    }

    async fn add_units(&self, app: &str, n: u32) -> ProvisionResult<()> {
        self.record("add-units", format!("add-units {app} {n}"))
    }

    async fn remove_unit(&self, app: &str, unit_name: &str, machine_id: u32) -> ProvisionResult<()> {
        self.record("remove-unit", format!("remove-unit {app} {unit_name}"))?;
        if machine_id != 0 {
            self.record("terminate", format!("terminate {app} {machine_id}"))?;
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
        self.record(
            "execute",
            format!("execute {app} {} {}", unit.name, cmd.join(" ")),
        )?;
        Ok(self.inner.lock().unwrap().exec_output.clone())
    }

    async fn add_relation(&self, app: &str, other: &str) -> ProvisionResult<()> {
        self.record("add-relation", format!("add-relation {app} {other}"))
    }

    async fn remove_relation(&self, app: &str, other: &str) -> ProvisionResult<()> {
        self.record("remove-relation", format!("remove-relation {app} {other}"))
    }

    async fn collect_status(&self) -> ProvisionResult<StatusReport> {
        self.record("status", "status".to_string())?;
        Ok(self.inner.lock().unwrap().status.clone())
    }
}
