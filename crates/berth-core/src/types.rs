//! Core record types embedded in application documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{UnitState, derive_unit_state};

/// A single compute unit of an application.
///
/// Units are named `<app>/<ordinal>`. A `machine_id` of 0 means the
/// provisioner has not yet assigned a machine (machine 0 is the
/// bootstrap node and never hosts application units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Unit {
    pub name: String,
    #[serde(default)]
    pub machine_id: u32,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub agent_state: String,
    #[serde(default)]
    pub machine_agent_state: String,
    #[serde(default)]
    pub instance_state: String,
}

impl Unit {
    /// A fresh unit with no observations yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The application this unit belongs to (`blog/0` → `blog`).
    pub fn app_name(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// Lifecycle state derived from the raw observation fields.
    pub fn derived_state(&self) -> UnitState {
        derive_unit_state(&self.instance_state, &self.agent_state, &self.machine_agent_state)
    }

    pub fn is_started(&self) -> bool {
        self.derived_state() == UnitState::Started
    }
}

/// An environment variable attached to an application.
///
/// Private variables (injected by service bindings) are masked as `***`
/// wherever the record is rendered for users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    pub public: bool,
}

impl EnvVar {
    pub fn public(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), public: true }
    }

    pub fn private(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), public: false }
    }

    /// The value as shown to users: real for public vars, `***` otherwise.
    pub fn display_value(&self) -> &str {
        if self.public { &self.value } else { "***" }
    }
}

/// One line of application log, kept in a capped ring on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

impl LogEntry {
    pub fn now(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Per-application unit quota. `limit` of `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Quota {
    pub limit: Option<u32>,
}

impl Quota {
    pub fn limited(limit: u32) -> Self {
        Self { limit: Some(limit) }
    }

    /// Whether `adding` more units on top of `in_use` stays within quota.
    pub fn allows(&self, in_use: usize, adding: usize) -> bool {
        match self.limit {
            Some(limit) => in_use + adding <= limit as usize,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_app_name_strips_ordinal() {
        assert_eq!(Unit::new("blog/0").app_name(), "blog");
        assert_eq!(Unit::new("blog/12").app_name(), "blog");
        assert_eq!(Unit::new("blog").app_name(), "blog");
    }

    #[test]
    fn unit_started_requires_all_running() {
        let mut unit = Unit::new("blog/0");
        assert!(!unit.is_started());

        unit.instance_state = "running".into();
        unit.agent_state = "started".into();
        unit.machine_agent_state = "running".into();
        assert!(unit.is_started());
        assert_eq!(unit.derived_state(), UnitState::Started);
    }

    #[test]
    fn fresh_unit_is_creating() {
        // All observation fields empty: machine not even requested yet.
        assert_eq!(Unit::new("blog/0").derived_state(), UnitState::Creating);
    }

    #[test]
    fn private_vars_are_masked() {
        let var = EnvVar::private("DATABASE_PASSWORD", "hunter2");
        assert_eq!(var.display_value(), "***");
        assert_eq!(EnvVar::public("PORT", "8888").display_value(), "8888");
    }

    #[test]
    fn quota_limits_unit_growth() {
        let quota = Quota::limited(4);
        assert!(quota.allows(1, 3));
        assert!(!quota.allows(2, 3));
        assert!(Quota::default().allows(100, 100));
    }
}
