//! Unit state machine — derivation from provisioner observations.
//!
//! A unit reports three raw fields through the provisioner status
//! report: the machine's instance state, the unit agent's state, and
//! the machine agent's state. The derived [`UnitState`] collapses those
//! into the lifecycle vocabulary the rest of the control plane uses.
//!
//! The enum is declared best-to-worst so the application aggregate is
//! simply the `max()` over its units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Derived lifecycle state of a single unit.
///
/// Ordering matters: variants are declared best first, so comparing two
/// states with `<` / `max()` answers "which is worse".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Agent running and the workload started.
    Started,
    /// Machine up, agent installing the workload.
    Installing,
    /// Machine or agent still coming up.
    Creating,
    /// Nothing observed yet, or an unrecognized combination.
    #[default]
    Pending,
    /// Instance, machine agent, or workload reported an error.
    Error,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Started => "started",
            UnitState::Installing => "installing",
            UnitState::Creating => "creating",
            UnitState::Pending => "pending",
            UnitState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Derive a unit's state from the three raw provisioner fields.
///
/// First match wins, checked top-down. Empty strings mean the field was
/// absent from the status report.
pub fn derive_unit_state(
    instance_state: &str,
    agent_state: &str,
    machine_agent_state: &str,
) -> UnitState {
    if instance_state == "error" || machine_agent_state == "error" {
        return UnitState::Error;
    }

    let instance_pending = instance_state == "pending" || instance_state.is_empty();
    let agent_not_started =
        agent_state == "pending" || agent_state == "not-started" || agent_state.is_empty();
    if instance_pending && agent_not_started {
        return UnitState::Creating;
    }

    if instance_state == "running"
        && agent_state == "not-started"
        && (machine_agent_state == "pending" || machine_agent_state.is_empty())
    {
        return UnitState::Creating;
    }

    if instance_state == "running" && machine_agent_state == "running" {
        return match agent_state {
            "pending" | "installed" => UnitState::Installing,
            "started" => UnitState::Started,
            "down" => UnitState::Error,
            _ => UnitState::Pending,
        };
    }

    UnitState::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_states_dominate() {
        assert_eq!(derive_unit_state("error", "started", "running"), UnitState::Error);
        assert_eq!(derive_unit_state("running", "started", "error"), UnitState::Error);
        assert_eq!(derive_unit_state("running", "down", "running"), UnitState::Error);
    }

    #[test]
    fn creating_while_machine_comes_up() {
        assert_eq!(derive_unit_state("pending", "pending", ""), UnitState::Creating);
        assert_eq!(derive_unit_state("", "not-started", ""), UnitState::Creating);
        assert_eq!(derive_unit_state("pending", "", "pending"), UnitState::Creating);
        assert_eq!(derive_unit_state("running", "not-started", "pending"), UnitState::Creating);
        assert_eq!(derive_unit_state("running", "not-started", ""), UnitState::Creating);
    }

    #[test]
    fn installing_once_machine_agent_runs() {
        assert_eq!(derive_unit_state("running", "pending", "running"), UnitState::Installing);
        assert_eq!(derive_unit_state("running", "installed", "running"), UnitState::Installing);
    }

    #[test]
    fn started_when_everything_runs() {
        assert_eq!(derive_unit_state("running", "started", "running"), UnitState::Started);
    }

    #[test]
    fn unknown_combinations_are_pending() {
        assert_eq!(derive_unit_state("running", "started", "pending"), UnitState::Pending);
        assert_eq!(derive_unit_state("stopped", "started", "running"), UnitState::Pending);
        assert_eq!(derive_unit_state("running", "weird", "running"), UnitState::Pending);
    }

    #[test]
    fn ordering_is_best_to_worst() {
        assert!(UnitState::Started < UnitState::Installing);
        assert!(UnitState::Installing < UnitState::Creating);
        assert!(UnitState::Creating < UnitState::Pending);
        assert!(UnitState::Pending < UnitState::Error);

        let worst = [UnitState::Started, UnitState::Error, UnitState::Creating]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, UnitState::Error);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&UnitState::Started).unwrap(), "\"started\"");
        let back: UnitState = serde_json::from_str("\"installing\"").unwrap();
        assert_eq!(back, UnitState::Installing);
    }
}
