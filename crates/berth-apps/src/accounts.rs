//! Account management — users, teams, SSH keys and tokens.
//!
//! Team and membership changes cascade into the Git ACL agent so the
//! gitosis configuration tracks the store: a team is a group, members
//! are group members, and registered keys land in `keydir/`.

use berth_core::valid_app_name;
use berth_gitacl::AclAgentHandle;
use berth_store::{Collections, TeamRecord, TokenRecord, UserKey, UserRecord};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub struct AccountManager {
    store: Collections,
    acl: AclAgentHandle,
}

impl AccountManager {
    pub fn new(store: Collections, acl: AclAgentHandle) -> Self {
        Self { store, acl }
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn create_user(&self, email: &str) -> AppResult<UserRecord> {
        if email.trim().is_empty() || !email.contains('@') {
            return Err(AppError::InvalidParam(format!(
                "invalid email address: {email}"
            )));
        }
        let user = UserRecord::new(email);
        self.store.insert_user(&user)?;
        info!(%email, "user created");
        Ok(user)
    }

    // ── Teams ──────────────────────────────────────────────────────

    /// Create a team and its ACL group. Every listed member must be a
    /// registered user; members become group members right away.
    pub async fn create_team(&self, name: &str, members: &[String]) -> AppResult<TeamRecord> {
        if !valid_app_name(name) {
            return Err(AppError::InvalidParam(format!("invalid team name: {name}")));
        }
        let mut team = TeamRecord::new(name);
        for member in members {
            self.store.get_user(member)?;
            team.users.push(member.clone());
        }
        self.store.insert_team(&team)?;
        self.acl.add_group(name).await?;
        for member in &team.users {
            self.acl.add_member(name, member).await?;
        }
        info!(team = %name, members = team.users.len(), "team created");
        Ok(team)
    }

    /// Remove a team and its ACL group. Refused while any application
    /// still grants the team access.
    pub async fn remove_team(&self, name: &str) -> AppResult<()> {
        self.store.get_team(name)?;
        let apps = self.store.list_apps_in_teams(&[name.to_string()])?;
        if !apps.is_empty() {
            let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
            return Err(AppError::Conflict(format!(
                "team {name} still has access to applications: {}",
                names.join(", ")
            )));
        }
        self.acl.remove_group(name).await?;
        self.store.remove_team(name)?;
        info!(team = %name, "team removed");
        Ok(())
    }

    pub async fn add_team_member(&self, team: &str, email: &str) -> AppResult<()> {
        let mut record = self
            .store
            .find_team(team)?
            .ok_or_else(|| AppError::TeamNotFound(team.to_string()))?;
        self.store.get_user(email)?;
        if record.has_user(email) {
            return Err(AppError::Conflict(format!(
                "user {email} is already a member of team {team}"
            )));
        }
        record.users.push(email.to_string());
        self.store.update_team(&record)?;
        self.acl.add_member(team, email).await?;
        info!(%team, user = %email, "member added");
        Ok(())
    }

    pub async fn remove_team_member(&self, team: &str, email: &str) -> AppResult<()> {
        let mut record = self
            .store
            .find_team(team)?
            .ok_or_else(|| AppError::TeamNotFound(team.to_string()))?;
        if !record.has_user(email) {
            return Err(AppError::InvalidParam(format!(
                "user {email} is not a member of team {team}"
            )));
        }
        self.acl.remove_member(team, email).await?;
        record.users.retain(|u| u != email);
        self.store.update_team(&record)?;
        info!(%team, user = %email, "member removed");
        Ok(())
    }

    // ── SSH keys ───────────────────────────────────────────────────

    pub fn list_keys(&self, email: &str) -> AppResult<Vec<UserKey>> {
        Ok(self.store.get_user(email)?.keys)
    }

    /// Register a key under a user-chosen label and store the key file
    /// through the agent. Returns the stored key with its assigned
    /// `keydir/` filename.
    pub async fn add_key(&self, email: &str, name: &str, content: &str) -> AppResult<UserKey> {
        let content = valid_key_body(content)?;
        let mut user = self.store.get_user(email)?;
        if user.key(name).is_some() {
            return Err(AppError::Conflict(format!(
                "user {email} already has a key named {name}"
            )));
        }
        if user.has_key_content(content) {
            return Err(AppError::Conflict(format!(
                "key is already registered for user {email}"
            )));
        }
        let filename = self.acl.add_key(email, content).await?;
        let key = UserKey {
            name: name.to_string(),
            content: content.to_string(),
            filename,
        };
        user.keys.push(key.clone());
        self.store.update_user(&user)?;
        info!(user = %email, key = %name, file = %key.filename, "key added");
        Ok(key)
    }

    /// Swap the key material stored under `name`: the old key file is
    /// deleted and the new content gets a fresh filename.
    pub async fn replace_key(&self, email: &str, name: &str, content: &str) -> AppResult<UserKey> {
        let content = valid_key_body(content)?;
        let mut user = self.store.get_user(email)?;
        let Some(old) = user.key(name).cloned() else {
            return Err(AppError::KeyNotFound {
                user: email.to_string(),
                key: name.to_string(),
            });
        };
        self.acl.remove_key(&old.filename).await?;
        let filename = self.acl.add_key(email, content).await?;
        let key = UserKey {
            name: name.to_string(),
            content: content.to_string(),
            filename,
        };
        user.keys.retain(|k| k.name != name);
        user.keys.push(key.clone());
        self.store.update_user(&user)?;
        info!(user = %email, key = %name, file = %key.filename, "key replaced");
        Ok(key)
    }

    pub async fn remove_key(&self, email: &str, name: &str) -> AppResult<()> {
        let mut user = self.store.get_user(email)?;
        let Some(key) = user.key(name).cloned() else {
            return Err(AppError::KeyNotFound {
                user: email.to_string(),
                key: name.to_string(),
            });
        };
        self.acl.remove_key(&key.filename).await?;
        user.keys.retain(|k| k.name != name);
        self.store.update_user(&user)?;
        info!(user = %email, key = %name, "key removed");
        Ok(())
    }

    // ── Tokens ─────────────────────────────────────────────────────

    /// Mint a bearer token for a registered user.
    pub fn issue_token(&self, email: &str) -> AppResult<TokenRecord> {
        self.store.get_user(email)?;
        let token = TokenRecord::new(Uuid::new_v4().simple().to_string(), email);
        self.store.put_token(&token)?;
        info!(user = %email, "token issued");
        Ok(token)
    }
}

/// Keys live one per line in `keydir/` files; reject anything that
/// would smuggle extra lines in.
fn valid_key_body(content: &str) -> AppResult<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.contains('\n') {
        return Err(AppError::InvalidParam("invalid public key".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use berth_exec::RecordingExecutor;
    use berth_fs::RecordingFs;
    use berth_gitacl::{AclAgent, AclManager};

    const KEY: &str = "ssh-rsa AAAAB3NzaC1yc2E chico@keyboard";

    fn rig() -> (AccountManager, Collections, RecordingFs, RecordingExecutor) {
        let fs = RecordingFs::new();
        let executor = RecordingExecutor::new();
        let manager = Arc::new(AclManager::new(
            "/repo",
            Arc::new(fs.clone()),
            Arc::new(executor.clone()),
        ));
        let (acl, _join) = AclAgent::spawn(manager);
        let store = Collections::open_in_memory().unwrap();
        (AccountManager::new(store.clone(), acl), store, fs, executor)
    }

    #[tokio::test]
    async fn team_creation_registers_group_and_members() {
        let (accounts, store, fs, executor) = rig();
        accounts.create_user("chico@example.com").unwrap();
        accounts
            .create_team("cobrateam", &["chico@example.com".to_string()])
            .await
            .unwrap();

        let team = store.get_team("cobrateam").unwrap();
        assert!(team.has_user("chico@example.com"));
        let conf = fs.file_bytes("/repo/gitosis.conf").expect("conf written");
        let conf = String::from_utf8(conf).unwrap();
        assert!(conf.contains("[group cobrateam]"));
        assert!(conf.contains("chico@example.com"));
        assert!(
            executor.has_command("git -C /repo commit -m Adding member chico@example.com to group cobrateam")
        );
    }

    #[tokio::test]
    async fn team_members_must_be_registered() {
        let (accounts, _store, _fs, _executor) = rig();
        let err = accounts
            .create_team("cobrateam", &["ghost@example.com".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost@example.com"));
    }

    #[tokio::test]
    async fn team_with_app_access_cannot_be_removed() {
        let (accounts, store, _fs, _executor) = rig();
        accounts.create_user("chico@example.com").unwrap();
        accounts
            .create_team("cobrateam", &["chico@example.com".to_string()])
            .await
            .unwrap();
        let mut app = berth_store::AppRecord::new("blog", "python");
        app.teams.push("cobrateam".to_string());
        store.insert_app(&app).unwrap();

        let err = accounts.remove_team("cobrateam").await.unwrap_err();
        assert!(err.to_string().contains("blog"));
        assert!(store.find_team("cobrateam").unwrap().is_some());
    }

    #[tokio::test]
    async fn key_round_trip_updates_record_and_keydir() {
        let (accounts, store, fs, _executor) = rig();
        accounts.create_user("chico@example.com").unwrap();

        let key = accounts
            .add_key("chico@example.com", "laptop", KEY)
            .await
            .unwrap();
        assert_eq!(key.filename, "chico@example.com_key1.pub");
        assert!(fs
            .file_bytes("/repo/keydir/chico@example.com_key1.pub")
            .is_some());
        assert!(store
            .get_user("chico@example.com")
            .unwrap()
            .key("laptop")
            .is_some());

        accounts
            .remove_key("chico@example.com", "laptop")
            .await
            .unwrap();
        assert!(store
            .get_user("chico@example.com")
            .unwrap()
            .keys
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_key_name_is_a_conflict() {
        let (accounts, _store, _fs, _executor) = rig();
        accounts.create_user("chico@example.com").unwrap();
        accounts
            .add_key("chico@example.com", "laptop", KEY)
            .await
            .unwrap();
        let err = accounts
            .add_key("chico@example.com", "laptop", "ssh-rsa BBBB other")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn replace_key_swaps_the_stored_file() {
        let (accounts, store, fs, _executor) = rig();
        accounts.create_user("chico@example.com").unwrap();
        accounts
            .add_key("chico@example.com", "laptop", KEY)
            .await
            .unwrap();

        let replaced = accounts
            .replace_key("chico@example.com", "laptop", "ssh-ed25519 CCCC chico@new")
            .await
            .unwrap();
        assert!(fs.file_bytes("/repo/keydir/chico@example.com_key1.pub").is_none());
        assert!(fs
            .file_bytes(&format!("/repo/keydir/{}", replaced.filename))
            .is_some());
        let user = store.get_user("chico@example.com").unwrap();
        assert_eq!(user.keys.len(), 1);
        assert_eq!(user.keys[0].content, "ssh-ed25519 CCCC chico@new");
    }

    #[tokio::test]
    async fn token_issue_requires_a_user() {
        let (accounts, store, _fs, _executor) = rig();
        assert!(accounts.issue_token("ghost@example.com").is_err());

        accounts.create_user("chico@example.com").unwrap();
        let token = accounts.issue_token("chico@example.com").unwrap();
        let found = store.find_token(&token.token).unwrap().expect("stored");
        assert_eq!(found.user_email, "chico@example.com");
    }

    #[test]
    fn key_bodies_are_single_line() {
        assert!(valid_key_body("  ssh-rsa AAAA x  ").is_ok());
        assert!(valid_key_body("").is_err());
        assert!(valid_key_body("ssh-rsa AAAA\nssh-rsa BBBB").is_err());
    }
}
