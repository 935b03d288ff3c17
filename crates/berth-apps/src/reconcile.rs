//! Status reconciliation — folds provisioner observations into records.
//!
//! A ticker collects the orchestrator's status report and updates every
//! matching application: units are matched by machine id, observation
//! fields are copied in, and the aggregate state is recomputed. Running
//! the same report twice leaves records untouched.

use std::sync::Arc;
use std::time::Duration;

use berth_provision::{Provisioner, StatusReport};
use berth_store::{AppRecord, Collections};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::locks::AppLocks;

pub(crate) struct Reconciler {
    store: Collections,
    provisioner: Arc<dyn Provisioner>,
    locks: AppLocks,
    interval: Duration,
}

impl Reconciler {
    pub(crate) fn new(
        store: Collections,
        provisioner: Arc<dyn Provisioner>,
        locks: AppLocks,
        interval: Duration,
    ) -> Self {
        Self { store, provisioner, locks, interval }
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(interval = ?self.interval, "reconciliation worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged and retried on the next tick; they
                    // never surface to users.
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "status reconciliation failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("reconciliation worker stopped");
    }

    pub(crate) async fn tick(&self) -> AppResult<()> {
        let report = self.provisioner.collect_status().await?;
        for service in report.services.keys() {
            let _guard = self.locks.acquire(service).await;
            let Some(mut app) = self.store.find_app(service)? else {
                continue;
            };
            if apply_report(&mut app, &report) {
                self.store.update_app(&app)?;
                debug!(app = %app.name, state = %app.state, "application reconciled");
            }
        }
        Ok(())
    }
}

/// Fold the report's view of `app` into the record.
///
/// Report units are matched to stored units by machine id; a stored unit
/// that never got a machine (id 0) is claimed by the report unit with its
/// name instead of being duplicated. Stored units absent from the report
/// are dropped. Returns whether anything changed.
pub(crate) fn apply_report(app: &mut AppRecord, report: &StatusReport) -> bool {
    let observed = report.units_of(&app.name);
    if observed.is_empty() {
        // Nothing observed yet; keep placeholders until the deploy shows up.
        return false;
    }

    let mut remaining = app.units.clone();
    let mut next = Vec::with_capacity(observed.len());
    let mut changed = false;

    for unit in observed {
        let matched = remaining
            .iter()
            .position(|u| u.machine_id != 0 && u.machine_id == unit.machine_id)
            .or_else(|| {
                remaining
                    .iter()
                    .position(|u| u.machine_id == 0 && u.name == unit.name)
            });
        match matched {
            Some(i) => {
                let stored = remaining.remove(i);
                if stored != unit {
                    changed = true;
                }
            }
            None => changed = true,
        }
        next.push(unit);
    }
    if !remaining.is_empty() {
        changed = true;
    }

    if changed {
        app.units = next;
    }
    let state = app.aggregate_state();
    if state != app.state {
        app.state = state;
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{Unit, UnitState};
    use berth_provision::{parse_status, FakeProvisioner};

    const RUNNING_REPORT: &str = "\
machines:
  105:
    agent-state: running
    dns-name: blog-1.example.com
    instance-id: i-0105
    instance-state: running
services:
  blog:
    units:
      blog/0:
        agent-state: started
        machine: 105
";

    fn pending_app(name: &str) -> AppRecord {
        let mut app = AppRecord::new(name, "python");
        app.units.push(Unit::new(format!("{name}/0")));
        app.refresh_state();
        app
    }

    fn reconciler(store: &Collections, fake: &FakeProvisioner) -> Reconciler {
        Reconciler::new(
            store.clone(),
            Arc::new(fake.clone()),
            AppLocks::new(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn claims_placeholder_by_name() {
        let mut app = pending_app("blog");
        let report = parse_status(RUNNING_REPORT.as_bytes()).unwrap();

        assert!(apply_report(&mut app, &report));
        assert_eq!(app.units.len(), 1);
        let unit = &app.units[0];
        assert_eq!(unit.name, "blog/0");
        assert_eq!(unit.machine_id, 105);
        assert_eq!(unit.ip, "blog-1.example.com");
        assert_eq!(unit.instance_id, "i-0105");
        assert_eq!(app.state, UnitState::Started);
    }

    #[test]
    fn matches_by_machine_id_and_updates_fields() {
        let mut app = pending_app("blog");
        app.units[0].machine_id = 105;
        app.units[0].agent_state = "pending".to_string();

        let report = parse_status(RUNNING_REPORT.as_bytes()).unwrap();
        assert!(apply_report(&mut app, &report));
        assert_eq!(app.units[0].agent_state, "started");
        assert_eq!(app.state, UnitState::Started);
    }

    #[test]
    fn drops_units_gone_from_the_report() {
        let mut app = pending_app("blog");
        app.units[0].machine_id = 105;
        let mut stale = Unit::new("blog/1");
        stale.machine_id = 199;
        app.units.push(stale);

        let report = parse_status(RUNNING_REPORT.as_bytes()).unwrap();
        assert!(apply_report(&mut app, &report));
        assert_eq!(app.units.len(), 1);
        assert_eq!(app.units[0].machine_id, 105);
    }

    #[test]
    fn creates_units_present_only_in_the_report() {
        let text = "\
machines:
  105:
    agent-state: running
    instance-state: running
  106:
    agent-state: running
    instance-state: running
services:
  blog:
    units:
      blog/0:
        agent-state: started
        machine: 105
      blog/1:
        agent-state: installed
        machine: 106
";
        let mut app = pending_app("blog");
        app.units[0].machine_id = 105;
        let report = parse_status(text.as_bytes()).unwrap();

        assert!(apply_report(&mut app, &report));
        assert_eq!(app.units.len(), 2);
        assert_eq!(app.units[1].name, "blog/1");
        assert_eq!(app.state, UnitState::Installing);
    }

    #[test]
    fn empty_observation_keeps_placeholders() {
        let mut app = pending_app("blog");
        let before = app.clone();
        let report = parse_status(b"services:\n  blog:\n    units: {}\n").unwrap();

        assert!(!apply_report(&mut app, &report));
        assert_eq!(app, before);
    }

    #[tokio::test]
    async fn tick_is_idempotent() {
        let store = Collections::open_in_memory().unwrap();
        store.insert_app(&pending_app("blog")).unwrap();

        let fake = FakeProvisioner::new();
        fake.set_status(parse_status(RUNNING_REPORT.as_bytes()).unwrap());
        let reconciler = reconciler(&store, &fake);

        reconciler.tick().await.unwrap();
        let first = store.get_app("blog").unwrap();
        assert_eq!(first.state, UnitState::Started);

        reconciler.tick().await.unwrap();
        let second = store.get_app("blog").unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_services_are_skipped() {
        let store = Collections::open_in_memory().unwrap();
        let fake = FakeProvisioner::new();
        fake.set_status(parse_status(RUNNING_REPORT.as_bytes()).unwrap());

        // No "blog" record in the store; the tick must not error.
        reconciler(&store, &fake).tick().await.unwrap();
    }

    #[tokio::test]
    async fn status_failure_surfaces_from_tick() {
        let store = Collections::open_in_memory().unwrap();
        let fake = FakeProvisioner::new();
        fake.fail_next("status", "environment not bootstrapped");

        assert!(reconciler(&store, &fake).tick().await.is_err());
    }
}
