//! ACL repository manager — file rewrites plus git plumbing.
//!
//! The manager owns a checkout of the ACL admin repository. Reads take
//! a shared lock; every mutation takes the exclusive lock, rewrites the
//! affected file, then runs `git add -A`, `git commit -m <msg>` and
//! `git push origin master` through the executor. Preconditions are
//! checked against the on-disk config before anything is written, so a
//! failed operation leaves no commit behind.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use berth_exec::{Executor, argv};
use berth_fs::{Fs, OpenFlags};

use crate::conf::AclConfig;
use crate::error::{AclError, AclResult};

pub struct AclManager {
    root: PathBuf,
    fs: Arc<dyn Fs>,
    executor: Arc<dyn Executor>,
    lock: RwLock<()>,
}

fn io_err(path: &Path, source: std::io::Error) -> AclError {
    AclError::Io { path: path.display().to_string(), source }
}

impl AclManager {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn Fs>, executor: Arc<dyn Executor>) -> Self {
        Self {
            root: root.into(),
            fs,
            executor,
            lock: RwLock::new(()),
        }
    }

    pub fn conf_path(&self) -> PathBuf {
        self.root.join("gitosis.conf")
    }

    fn keydir(&self) -> PathBuf {
        self.root.join("keydir")
    }

    /// Snapshot of the current config.
    pub async fn config(&self) -> AclResult<AclConfig> {
        let _guard = self.lock.read().await;
        self.load_config()
    }

    pub async fn has_group(&self, name: &str) -> AclResult<bool> {
        Ok(self.config().await?.has_group(name))
    }

    pub async fn add_group(&self, group: &str) -> AclResult<()> {
        self.mutate(format!("Defining gitosis group for group {group}"), |conf| {
            conf.add_group(group)
        })
        .await
    }

    pub async fn remove_group(&self, group: &str) -> AclResult<()> {
        self.mutate(format!("Removing group {group} from gitosis.conf"), |conf| {
            conf.remove_group(group)
        })
        .await
    }

    pub async fn add_project(&self, group: &str, project: &str) -> AclResult<()> {
        self.mutate(format!("Added project {project} to group {group}"), |conf| {
            conf.add_option_value(group, "writable", project)
        })
        .await
    }

    pub async fn remove_project(&self, group: &str, project: &str) -> AclResult<()> {
        self.mutate(format!("Removing project {project} from group {group}"), |conf| {
            conf.remove_option_value(group, "writable", project)
        })
        .await
    }

    pub async fn add_member(&self, group: &str, member: &str) -> AclResult<()> {
        self.mutate(format!("Adding member {member} to group {group}"), |conf| {
            conf.add_option_value(group, "members", member)
        })
        .await
    }

    pub async fn remove_member(&self, group: &str, member: &str) -> AclResult<()> {
        self.mutate(format!("Removing member {member} from group {group}"), |conf| {
            conf.remove_option_value(group, "members", member)
        })
        .await
    }

    /// Store a public key under `keydir/` and return the generated
    /// filename (`<member>_key<N>.pub`, smallest free N).
    pub async fn add_key(&self, member: &str, key: &str) -> AclResult<String> {
        let _guard = self.lock.write().await;
        let keydir = self.keydir();
        self.fs.mkdir_all(&keydir, 0o755).map_err(|e| io_err(&keydir, e))?;

        let filename = self.next_available_key(member)?;
        let path = keydir.join(&filename);
        let mut file = self.fs.create(&path).map_err(|e| io_err(&path, e))?;
        file.write_all(key.as_bytes()).map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))?;

        self.commit_push(&format!("Added {filename} keyfile.")).await?;
        Ok(filename)
    }

    pub async fn remove_key(&self, filename: &str) -> AclResult<()> {
        let _guard = self.lock.write().await;
        let path = self.keydir().join(filename);
        match self.fs.remove(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AclError::KeyFileNotFound(filename.to_string()));
            }
            Err(e) => return Err(io_err(&path, e)),
        }
        self.commit_push(&format!("Deleted {filename} keyfile.")).await
    }

    /// Commit and push the working tree as-is, without a config edit.
    pub async fn commit(&self, message: &str) -> AclResult<()> {
        let _guard = self.lock.write().await;
        self.commit_push(message).await
    }

    async fn mutate(
        &self,
        message: String,
        apply: impl FnOnce(&mut AclConfig) -> AclResult<()>,
    ) -> AclResult<()> {
        let _guard = self.lock.write().await;
        let mut conf = self.load_config()?;
        apply(&mut conf)?;
        self.store_config(&conf)?;
        self.commit_push(&message).await
    }

    fn load_config(&self) -> AclResult<AclConfig> {
        let path = self.conf_path();
        let mut file = match self.fs.open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AclConfig::new()),
            Err(e) => return Err(io_err(&path, e)),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_err(&path, e))?;
        Ok(AclConfig::parse(&buf))
    }

    fn store_config(&self, conf: &AclConfig) -> AclResult<()> {
        let path = self.conf_path();
        let flags = OpenFlags { write: true, create: true, truncate: true, ..Default::default() };
        let mut file = self.fs.open_file(&path, flags, 0o644).map_err(|e| io_err(&path, e))?;
        file.write_all(&conf.to_bytes()).map_err(|e| io_err(&path, e))?;
        file.flush().map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    async fn commit_push(&self, message: &str) -> AclResult<()> {
        let root = self.root.display().to_string();
        self.executor.run("git", &argv!["-C", root, "add", "-A"]).await?;
        self.executor
            .run("git", &argv!["-C", root, "commit", "-m", message])
            .await?;
        self.executor
            .run("git", &argv!["-C", root, "push", "origin", "master"])
            .await?;
        debug!(%message, "acl change committed");
        Ok(())
    }

    fn next_available_key(&self, member: &str) -> AclResult<String> {
        let keydir = self.keydir();
        let mut n: u32 = 1;
        loop {
            let filename = format!("{member}_key{n}.pub");
            let path = keydir.join(&filename);
            match self.fs.stat(&path) {
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(filename),
                Ok(()) => n += 1,
                Err(e) => return Err(io_err(&path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_exec::RecordingExecutor;
    use berth_fs::RecordingFs;

    fn test_manager() -> (AclManager, RecordingFs, RecordingExecutor) {
        let fs = RecordingFs::new();
        let executor = RecordingExecutor::new();
        let manager = AclManager::new("/repo", Arc::new(fs.clone()), Arc::new(executor.clone()));
        (manager, fs, executor)
    }

    #[tokio::test]
    async fn add_group_writes_and_commits() {
        let (manager, fs, executor) = test_manager();
        manager.add_group("myteam").await.unwrap();

        assert_eq!(fs.file_bytes("/repo/gitosis.conf").unwrap(), b"[group myteam]\n");
        assert!(executor.has_command("git -C /repo add -A"));
        assert!(executor.has_command(
            "git -C /repo commit -m Defining gitosis group for group myteam"
        ));
        assert!(executor.has_command("git -C /repo push origin master"));
        assert_eq!(executor.command_count(), 3);
    }

    #[tokio::test]
    async fn full_round_trip_has_exact_commit_messages() {
        let (manager, fs, executor) = test_manager();
        manager.add_group("myteam").await.unwrap();
        manager.add_project("myteam", "blog").await.unwrap();
        manager.add_member("myteam", "alice@example.com").await.unwrap();

        for message in [
            "Defining gitosis group for group myteam",
            "Added project blog to group myteam",
            "Adding member alice@example.com to group myteam",
        ] {
            assert!(
                executor.has_command(&format!("git -C /repo commit -m {message}")),
                "missing commit: {message}"
            );
        }
        assert_eq!(executor.command_count(), 9);

        let conf = AclConfig::parse(&fs.file_bytes("/repo/gitosis.conf").unwrap());
        assert_eq!(conf.option_values("myteam", "writable").unwrap(), &["blog".to_string()]);
        assert_eq!(
            conf.option_values("myteam", "members").unwrap(),
            &["alice@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn add_then_remove_group_restores_file_bytes() {
        let (manager, fs, _executor) = test_manager();
        manager.add_group("stable").await.unwrap();
        let before = fs.file_bytes("/repo/gitosis.conf").unwrap();

        manager.add_group("fleeting").await.unwrap();
        manager.remove_group("fleeting").await.unwrap();

        assert_eq!(fs.file_bytes("/repo/gitosis.conf").unwrap(), before);
    }

    #[tokio::test]
    async fn failed_precondition_commits_nothing() {
        let (manager, fs, executor) = test_manager();
        let err = manager.add_member("ghosts", "alice").await.unwrap_err();
        assert!(matches!(err, AclError::GroupNotFound(_)));
        assert_eq!(executor.command_count(), 0);
        assert!(fs.file_bytes("/repo/gitosis.conf").is_none());
    }

    #[tokio::test]
    async fn remove_project_drops_option_with_last_value() {
        let (manager, fs, executor) = test_manager();
        manager.add_group("myteam").await.unwrap();
        manager.add_project("myteam", "blog").await.unwrap();
        manager.remove_project("myteam", "blog").await.unwrap();

        assert_eq!(fs.file_bytes("/repo/gitosis.conf").unwrap(), b"[group myteam]\n");
        assert!(executor.has_command("git -C /repo commit -m Removing project blog from group myteam"));
    }

    #[tokio::test]
    async fn add_key_stores_file_and_returns_filename() {
        let (manager, fs, executor) = test_manager();
        let filename = manager.add_key("tolices", "ssh-rsa AAAA...").await.unwrap();

        assert_eq!(filename, "tolices_key1.pub");
        assert_eq!(fs.file_bytes("/repo/keydir/tolices_key1.pub").unwrap(), b"ssh-rsa AAAA...");
        assert!(fs.has_action("mkdirall /repo/keydir with mode 0755"));
        assert!(executor.has_command("git -C /repo commit -m Added tolices_key1.pub keyfile."));
    }

    #[tokio::test]
    async fn next_key_fills_smallest_gap() {
        let (manager, fs, _executor) = test_manager();
        fs.seed("/repo/keydir/bob_key1.pub", b"old".to_vec());

        let filename = manager.add_key("bob", "new-key").await.unwrap();
        assert_eq!(filename, "bob_key2.pub");

        // Removing key1 frees the slot for the next add.
        manager.remove_key("bob_key1.pub").await.unwrap();
        let filename = manager.add_key("bob", "third-key").await.unwrap();
        assert_eq!(filename, "bob_key1.pub");
    }

    #[tokio::test]
    async fn remove_key_requires_the_file() {
        let (manager, _fs, executor) = test_manager();
        let err = manager.remove_key("dont_know.pub").await.unwrap_err();
        assert!(matches!(err, AclError::KeyFileNotFound(_)));
        assert_eq!(executor.command_count(), 0);
    }

    #[tokio::test]
    async fn remove_key_deletes_and_commits() {
        let (manager, fs, executor) = test_manager();
        let filename = manager.add_key("carol", "key-body").await.unwrap();
        manager.remove_key(&filename).await.unwrap();

        assert!(fs.file_bytes("/repo/keydir/carol_key1.pub").is_none());
        assert!(executor.has_command("git -C /repo commit -m Deleted carol_key1.pub keyfile."));
    }

    #[tokio::test]
    async fn git_failure_surfaces_as_error() {
        let (manager, _fs, executor) = test_manager();
        executor.push_fail(128, b"fatal: not a git repository".to_vec());

        let err = manager.add_group("myteam").await.unwrap_err();
        assert!(matches!(err, AclError::Git(_)));
        assert!(err.to_string().contains("not a git repository"));
    }

    #[tokio::test]
    async fn commit_runs_the_git_trio() {
        let (manager, _fs, executor) = test_manager();
        manager.commit("bulk key import").await.unwrap();

        assert_eq!(executor.command_count(), 3);
        assert!(executor.has_command("git -C /repo commit -m bulk key import"));
    }
}
