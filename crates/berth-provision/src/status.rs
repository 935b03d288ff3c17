//! status — parsing of the orchestrator's YAML status document.
//!
//! The document has two top-level maps, `services` and `machines`. Real
//! output carries far more detail than we care about; parsing is
//! deliberately permissive, unknown keys are ignored and absent sections
//! become empty maps so a half-formed report from a young deployment still
//! parses.

use std::collections::BTreeMap;

use berth_core::Unit;
use serde::Deserialize;

use crate::{ProvisionError, ProvisionResult};

/// One unit row under a service, joined to its machine by number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnitReport {
    #[serde(default)]
    pub machine: u32,
    #[serde(default)]
    pub agent_state: String,
}

/// One deployed service and its units, keyed by unit name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub units: BTreeMap<String, UnitReport>,
}

/// One machine row, keyed by machine number at the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineStatus {
    #[serde(default)]
    pub dns_name: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub instance_state: String,
    #[serde(default)]
    pub agent_state: String,
}

/// The orchestrator's view of the world at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceStatus>,
    #[serde(default)]
    pub machines: BTreeMap<u32, MachineStatus>,
}

impl StatusReport {
    /// Units of `service` with their machine rows folded in, in unit-name
    /// order. Units pointing at a machine the report does not list get
    /// empty machine fields rather than an error.
    pub fn units_of(&self, service: &str) -> Vec<Unit> {
        let Some(svc) = self.services.get(service) else {
            return Vec::new();
        };
        svc.units
            .iter()
            .map(|(name, report)| {
                let machine = self.machines.get(&report.machine).cloned().unwrap_or_default();
                Unit {
                    name: name.clone(),
                    machine_id: report.machine,
                    instance_id: machine.instance_id,
                    ip: machine.dns_name,
                    agent_state: report.agent_state.clone(),
                    machine_agent_state: machine.agent_state,
                    instance_state: machine.instance_state,
                }
            })
            .collect()
    }
}

/// Parse raw `status` output. Whitespace-only output is an empty report;
/// anything else must be a YAML mapping.
pub fn parse_status(output: &[u8]) -> ProvisionResult<StatusReport> {
    let text = String::from_utf8_lossy(output);
    if text.trim().is_empty() {
        return Ok(StatusReport::default());
    }
    serde_yaml::from_str(&text)
        .map_err(|err| ProvisionError::MalformedStatus(format!("{err}: {}", text.trim())))
}
