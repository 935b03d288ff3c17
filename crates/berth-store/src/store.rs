//! Collections — redb-backed persistence for control-plane records.
//!
//! Typed CRUD over applications, users, teams, and tokens. All values are
//! JSON-serialized into redb's `&[u8]` value columns. Supports on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use berth_core::LogEntry;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Newest log entries kept per application.
pub const LOG_CAP: usize = 1000;

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct Collections {
    db: Arc<Database>,
}

impl Collections {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(TEAMS).map_err(map_err!(Table))?;
        txn.open_table(TOKENS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Applications ───────────────────────────────────────────────

    /// Insert a new application. The name must be free.
    pub fn insert_app(&self, app: &AppRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(app).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            if table.get(app.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::duplicate("app", &app.name));
            }
            table
                .insert(app.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %app.name, "app record inserted");
        Ok(())
    }

    /// Overwrite an existing application record.
    pub fn update_app(&self, app: &AppRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(app).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            if table.get(app.name.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::not_found("app", &app.name));
            }
            table
                .insert(app.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_app(&self, name: &str) -> StoreResult<Option<AppRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let app: AppRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(app))
            }
            None => Ok(None),
        }
    }

    /// `find_app` that treats absence as an error.
    pub fn get_app(&self, name: &str) -> StoreResult<AppRecord> {
        self.find_app(name)?
            .ok_or_else(|| StoreError::not_found("app", name))
    }

    /// Delete an application record.
    pub fn remove_app(&self, name: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !existed {
            return Err(StoreError::not_found("app", name));
        }
        debug!(app = %name, "app record removed");
        Ok(())
    }

    /// List applications matching `filter`, in name order.
    pub fn list_apps(&self, filter: &AppFilter) -> StoreResult<Vec<AppRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let app: AppRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if filter.matches(&app) {
                results.push(app);
            }
        }
        Ok(results)
    }

    /// Applications visible to a member of any of `teams`, in name order.
    pub fn list_apps_in_teams(&self, teams: &[String]) -> StoreResult<Vec<AppRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let app: AppRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if AppFilter::any_team(&app, teams) {
                results.push(app);
            }
        }
        Ok(results)
    }

    /// Append log entries to an app, keeping only the newest [`LOG_CAP`].
    pub fn append_logs(&self, name: &str, entries: &[LogEntry]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            let mut app: AppRecord = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StoreError::not_found("app", name)),
            };
            app.logs.extend_from_slice(entries);
            if app.logs.len() > LOG_CAP {
                let overflow = app.logs.len() - LOG_CAP;
                app.logs.drain(..overflow);
            }
            let value = serde_json::to_vec(&app).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn insert_user(&self, user: &UserRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(user).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            if table.get(user.email.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::duplicate("user", &user.email));
            }
            table
                .insert(user.email.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn update_user(&self, user: &UserRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(user).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            if table.get(user.email.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::not_found("user", &user.email));
            }
            table
                .insert(user.email.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_user(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USERS).map_err(map_err!(Table))?;
        match table.get(email).map_err(map_err!(Read))? {
            Some(guard) => {
                let user: UserRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn get_user(&self, email: &str) -> StoreResult<UserRecord> {
        self.find_user(email)?
            .ok_or_else(|| StoreError::not_found("user", email))
    }

    pub fn remove_user(&self, email: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(USERS).map_err(map_err!(Table))?;
            existed = table.remove(email).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !existed {
            return Err(StoreError::not_found("user", email));
        }
        Ok(())
    }

    // ── Teams ──────────────────────────────────────────────────────

    pub fn insert_team(&self, team: &TeamRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(team).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TEAMS).map_err(map_err!(Table))?;
            if table.get(team.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::duplicate("team", &team.name));
            }
            table
                .insert(team.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn update_team(&self, team: &TeamRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(team).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TEAMS).map_err(map_err!(Table))?;
            if table.get(team.name.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::not_found("team", &team.name));
            }
            table
                .insert(team.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_team(&self, name: &str) -> StoreResult<Option<TeamRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEAMS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let team: TeamRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(team))
            }
            None => Ok(None),
        }
    }

    pub fn get_team(&self, name: &str) -> StoreResult<TeamRecord> {
        self.find_team(name)?
            .ok_or_else(|| StoreError::not_found("team", name))
    }

    pub fn remove_team(&self, name: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TEAMS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !existed {
            return Err(StoreError::not_found("team", name));
        }
        Ok(())
    }

    pub fn list_teams(&self) -> StoreResult<Vec<TeamRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEAMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let team: TeamRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(team);
        }
        Ok(results)
    }

    /// Teams the given user belongs to, in name order.
    pub fn teams_for_user(&self, email: &str) -> StoreResult<Vec<TeamRecord>> {
        Ok(self
            .list_teams()?
            .into_iter()
            .filter(|team| team.has_user(email))
            .collect())
    }

    /// Members of `team` covered by none of `other_teams`.
    ///
    /// Access control: when a team is granted or revoked on an app, only
    /// these members gain or lose repository access; everyone else is
    /// already reachable through another granted team.
    pub fn uncovered_members(
        &self,
        team: &str,
        other_teams: &[String],
    ) -> StoreResult<Vec<String>> {
        let team = self.get_team(team)?;
        let mut covered: Vec<String> = Vec::new();
        for name in other_teams {
            if name == &team.name {
                continue;
            }
            if let Some(other) = self.find_team(name)? {
                covered.extend(other.users);
            }
        }
        Ok(team
            .users
            .into_iter()
            .filter(|email| !covered.contains(email))
            .collect())
    }

    // ── Tokens ─────────────────────────────────────────────────────

    /// Store a token, replacing any previous record under the same string.
    pub fn put_token(&self, token: &TokenRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(token).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TOKENS).map_err(map_err!(Table))?;
            table
                .insert(token.token.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn find_token(&self, token: &str) -> StoreResult<Option<TokenRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TOKENS).map_err(map_err!(Table))?;
        match table.get(token).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: TokenRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn remove_token(&self, token: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TOKENS).map_err(map_err!(Table))?;
            existed = table.remove(token).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{EnvVar, Unit};

    fn test_app(name: &str) -> AppRecord {
        let mut app = AppRecord::new(name, "python");
        app.teams = vec!["cobrateam".to_string()];
        app.units.push(Unit::new(format!("{name}/0")));
        app
    }

    fn test_team(name: &str, users: &[&str]) -> TeamRecord {
        TeamRecord {
            name: name.to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    // ── App CRUD ───────────────────────────────────────────────────

    #[test]
    fn app_insert_and_find() {
        let store = Collections::open_in_memory().unwrap();
        let app = test_app("blog");

        store.insert_app(&app).unwrap();
        assert_eq!(store.find_app("blog").unwrap(), Some(app));
    }

    #[test]
    fn app_insert_duplicate_fails_without_clobbering() {
        let store = Collections::open_in_memory().unwrap();
        let mut app = test_app("blog");
        store.insert_app(&app).unwrap();

        app.framework = "ruby".to_string();
        let err = store.insert_app(&app).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { kind: "app", .. }));
        assert_eq!(store.get_app("blog").unwrap().framework, "python");
    }

    #[test]
    fn app_update_requires_existence() {
        let store = Collections::open_in_memory().unwrap();
        let err = store.update_app(&test_app("blog")).unwrap_err();
        assert!(err.is_not_found());

        store.insert_app(&test_app("blog")).unwrap();
        let mut app = store.get_app("blog").unwrap();
        app.env.insert("PORT".to_string(), EnvVar::public("PORT", "8888"));
        store.update_app(&app).unwrap();
        assert_eq!(store.get_app("blog").unwrap().env.len(), 1);
    }

    #[test]
    fn app_remove() {
        let store = Collections::open_in_memory().unwrap();
        store.insert_app(&test_app("blog")).unwrap();

        store.remove_app("blog").unwrap();
        assert!(store.find_app("blog").unwrap().is_none());
        assert!(store.remove_app("blog").unwrap_err().is_not_found());
    }

    #[test]
    fn app_list_with_filter() {
        let store = Collections::open_in_memory().unwrap();
        store.insert_app(&test_app("blog")).unwrap();
        let mut wiki = test_app("wiki");
        wiki.framework = "ruby".to_string();
        wiki.teams = vec!["pythonistas".to_string()];
        store.insert_app(&wiki).unwrap();

        let all = store.list_apps(&AppFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "blog");

        let filter = AppFilter { team: Some("cobrateam".to_string()), framework: None };
        let mine = store.list_apps(&filter).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "blog");

        let teams = vec!["pythonistas".to_string(), "absent".to_string()];
        let visible = store.list_apps_in_teams(&teams).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "wiki");
    }

    #[test]
    fn append_logs_caps_at_newest() {
        let store = Collections::open_in_memory().unwrap();
        store.insert_app(&test_app("blog")).unwrap();

        let batch: Vec<LogEntry> = (0..LOG_CAP + 10)
            .map(|i| LogEntry::now("app", format!("line {i}")))
            .collect();
        store.append_logs("blog", &batch).unwrap();

        let app = store.get_app("blog").unwrap();
        assert_eq!(app.logs.len(), LOG_CAP);
        assert_eq!(app.logs[0].message, "line 10");
        assert_eq!(app.logs.last().unwrap().message, format!("line {}", LOG_CAP + 9));

        store
            .append_logs("blog", &[LogEntry::now("app", "newest")])
            .unwrap();
        let app = store.get_app("blog").unwrap();
        assert_eq!(app.logs.len(), LOG_CAP);
        assert_eq!(app.logs.last().unwrap().message, "newest");
    }

    #[test]
    fn append_logs_to_missing_app_fails() {
        let store = Collections::open_in_memory().unwrap();
        let err = store
            .append_logs("ghost", &[LogEntry::now("app", "hi")])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    // ── Users and teams ────────────────────────────────────────────

    #[test]
    fn user_crud_round_trip() {
        let store = Collections::open_in_memory().unwrap();
        let mut user = UserRecord::new("timeredbull@example.com");
        store.insert_user(&user).unwrap();

        assert!(matches!(
            store.insert_user(&user).unwrap_err(),
            StoreError::Duplicate { kind: "user", .. }
        ));

        user.keys.push(UserKey {
            name: "laptop".to_string(),
            content: "ssh-rsa AAAA".to_string(),
            filename: "timeredbull@example.com_key1.pub".to_string(),
        });
        store.update_user(&user).unwrap();
        assert_eq!(store.get_user("timeredbull@example.com").unwrap().keys.len(), 1);

        store.remove_user("timeredbull@example.com").unwrap();
        assert!(store.find_user("timeredbull@example.com").unwrap().is_none());
    }

    #[test]
    fn teams_for_user_scans_membership() {
        let store = Collections::open_in_memory().unwrap();
        store
            .insert_team(&test_team("cobrateam", &["a@x.com", "b@x.com"]))
            .unwrap();
        store.insert_team(&test_team("pythonistas", &["b@x.com"])).unwrap();

        let teams = store.teams_for_user("b@x.com").unwrap();
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0].name, "cobrateam");

        assert!(store.teams_for_user("nobody@x.com").unwrap().is_empty());
    }

    #[test]
    fn uncovered_members_respects_other_teams() {
        let store = Collections::open_in_memory().unwrap();
        store
            .insert_team(&test_team("cobrateam", &["a@x.com", "b@x.com", "c@x.com"]))
            .unwrap();
        store.insert_team(&test_team("pythonistas", &["b@x.com"])).unwrap();

        let others = vec!["pythonistas".to_string()];
        let uncovered = store.uncovered_members("cobrateam", &others).unwrap();
        assert_eq!(uncovered, vec!["a@x.com", "c@x.com"]);

        // A team never covers itself.
        let uncovered = store
            .uncovered_members("cobrateam", &["cobrateam".to_string()])
            .unwrap();
        assert_eq!(uncovered.len(), 3);
    }

    // ── Tokens ─────────────────────────────────────────────────────

    #[test]
    fn token_round_trip() {
        let store = Collections::open_in_memory().unwrap();
        let token = TokenRecord::new("t0ken", "timeredbull@example.com");
        store.put_token(&token).unwrap();

        let found = store.find_token("t0ken").unwrap().unwrap();
        assert_eq!(found.user_email, "timeredbull@example.com");

        assert!(store.remove_token("t0ken").unwrap());
        assert!(!store.remove_token("t0ken").unwrap());
        assert!(store.find_token("t0ken").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("berth.redb");

        {
            let store = Collections::open(&db_path).unwrap();
            store.insert_app(&test_app("blog")).unwrap();
        }

        let store = Collections::open(&db_path).unwrap();
        let app = store.find_app("blog").unwrap();
        assert!(app.is_some());
        assert_eq!(app.unwrap().units[0].name, "blog/0");
    }

    #[test]
    fn empty_store_operations() {
        let store = Collections::open_in_memory().unwrap();

        assert!(store.list_apps(&AppFilter::default()).unwrap().is_empty());
        assert!(store.list_teams().unwrap().is_empty());
        assert!(store.find_user("nope@x.com").unwrap().is_none());
        assert!(store.find_token("nope").unwrap().is_none());
        assert!(store.remove_app("nope").unwrap_err().is_not_found());
    }
}
