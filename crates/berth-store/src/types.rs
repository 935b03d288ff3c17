//! Persisted record types for the berth control plane.
//!
//! Everything is JSON in redb value columns, so records stay plain serde
//! structs. The embedded unit/env/log types live in `berth-core` because
//! the coordinator and provisioner work with them directly.

use std::collections::BTreeMap;

use berth_core::{EnvVar, LogEntry, Quota, Unit, UnitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One hosted application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    /// Platform the application runs on ("python", "ruby", ...). Picks
    /// the charm the provisioner deploys.
    pub framework: String,
    /// Aggregate lifecycle state, the worst derived state over `units`.
    pub state: UnitState,
    /// Teams with access; never empty after creation.
    pub teams: Vec<String>,
    pub env: BTreeMap<String, EnvVar>,
    pub units: Vec<Unit>,
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub quota: Quota,
    pub created_at: DateTime<Utc>,
}

impl AppRecord {
    pub fn new(name: impl Into<String>, framework: impl Into<String>) -> Self {
        AppRecord {
            name: name.into(),
            framework: framework.into(),
            state: UnitState::Pending,
            teams: Vec::new(),
            env: BTreeMap::new(),
            units: Vec::new(),
            logs: Vec::new(),
            quota: Quota::default(),
            created_at: Utc::now(),
        }
    }

    /// Worst derived state across units; `Pending` when unitless.
    pub fn aggregate_state(&self) -> UnitState {
        self.units
            .iter()
            .map(Unit::derived_state)
            .max()
            .unwrap_or_default()
    }

    /// Recompute `state` from the current units.
    pub fn refresh_state(&mut self) {
        self.state = self.aggregate_state();
    }

    /// First unit whose derived state is `Started`, if any. Commands run
    /// against this unit.
    pub fn started_unit(&self) -> Option<&Unit> {
        self.units.iter().find(|u| u.is_started())
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn has_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }

    /// Next unused unit ordinal (`blog/0`, `blog/1`, ...).
    pub fn next_unit_name(&self) -> String {
        let next = self
            .units
            .iter()
            .filter_map(|u| u.name.rsplit('/').next()?.parse::<u32>().ok())
            .max()
            .map_or(0, |n| n + 1);
        format!("{}/{next}", self.name)
    }
}

/// An SSH public key registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKey {
    /// User-chosen label, unique per user.
    pub name: String,
    /// Raw public key material.
    pub content: String,
    /// File name assigned in the ACL keydir when the key was stored.
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub keys: Vec<UserKey>,
}

impl UserRecord {
    pub fn new(email: impl Into<String>) -> Self {
        UserRecord { email: email.into(), keys: Vec::new() }
    }

    pub fn key(&self, name: &str) -> Option<&UserKey> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn has_key_content(&self, content: &str) -> bool {
        self.keys.iter().any(|k| k.content == content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub name: String,
    pub users: Vec<String>,
}

impl TeamRecord {
    pub fn new(name: impl Into<String>) -> Self {
        TeamRecord { name: name.into(), users: Vec::new() }
    }

    pub fn has_user(&self, email: &str) -> bool {
        self.users.iter().any(|u| u == email)
    }
}

/// Opaque bearer token tied to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub user_email: String,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>, user_email: impl Into<String>) -> Self {
        TokenRecord {
            token: token.into(),
            user_email: user_email.into(),
            created_at: Utc::now(),
        }
    }
}

/// Filter for app listings; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppFilter {
    pub team: Option<String>,
    pub framework: Option<String>,
}

impl AppFilter {
    pub fn matches(&self, app: &AppRecord) -> bool {
        if let Some(team) = &self.team {
            if !app.has_team(team) {
                return false;
            }
        }
        if let Some(framework) = &self.framework {
            if &app.framework != framework {
                return false;
            }
        }
        true
    }

    /// Apps visible to a member of any of `teams`.
    pub fn any_team(app: &AppRecord, teams: &[String]) -> bool {
        app.teams.iter().any(|t| teams.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_units(states: &[(&str, &str, &str)]) -> AppRecord {
        let mut app = AppRecord::new("blog", "python");
        for (i, (instance, agent, machine)) in states.iter().enumerate() {
            let mut unit = Unit::new(format!("blog/{i}"));
            unit.instance_state = instance.to_string();
            unit.agent_state = agent.to_string();
            unit.machine_agent_state = machine.to_string();
            app.units.push(unit);
        }
        app
    }

    #[test]
    fn aggregate_is_worst_unit_state() {
        let mut app = record_with_units(&[
            ("running", "started", "running"),
            ("running", "pending", "running"),
        ]);
        app.refresh_state();
        assert_eq!(app.state, UnitState::Installing);

        let mut app = record_with_units(&[("running", "started", "running"), ("error", "", "")]);
        app.refresh_state();
        assert_eq!(app.state, UnitState::Error);
    }

    #[test]
    fn unitless_app_is_pending() {
        assert_eq!(AppRecord::new("blog", "python").aggregate_state(), UnitState::Pending);
    }

    #[test]
    fn started_unit_skips_unstarted() {
        let app = record_with_units(&[
            ("pending", "pending", ""),
            ("running", "started", "running"),
        ]);
        assert_eq!(app.started_unit().unwrap().name, "blog/1");
        assert!(record_with_units(&[("pending", "", "")]).started_unit().is_none());
    }

    #[test]
    fn next_unit_name_follows_highest_ordinal() {
        let mut app = AppRecord::new("blog", "python");
        assert_eq!(app.next_unit_name(), "blog/0");
        app.units.push(Unit::new("blog/0"));
        app.units.push(Unit::new("blog/4"));
        assert_eq!(app.next_unit_name(), "blog/5");
    }

    #[test]
    fn filter_matches_team_and_framework() {
        let mut app = AppRecord::new("blog", "python");
        app.teams.push("cobrateam".to_string());

        let filter = AppFilter { team: Some("cobrateam".to_string()), framework: None };
        assert!(filter.matches(&app));

        let filter = AppFilter {
            team: Some("cobrateam".to_string()),
            framework: Some("ruby".to_string()),
        };
        assert!(!filter.matches(&app));
        assert!(AppFilter::default().matches(&app));
    }

    #[test]
    fn user_key_lookup_by_name() {
        let mut user = UserRecord::new("ssteinberg@example.com");
        user.keys.push(UserKey {
            name: "laptop".to_string(),
            content: "ssh-rsa AAAA1".to_string(),
            filename: "ssteinberg@example.com_key1.pub".to_string(),
        });
        assert!(user.key("laptop").is_some());
        assert!(user.key("desktop").is_none());
        assert!(user.has_key_content("ssh-rsa AAAA1"));
        assert!(!user.has_key_content("ssh-rsa AAAA2"));
    }
}
