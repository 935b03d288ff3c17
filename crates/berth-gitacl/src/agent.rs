//! Serialized ACL change agent.
//!
//! All mutations from concurrent API calls funnel through one worker,
//! so git operations never interleave. Requests are tagged variants
//! with an optional one-shot reply channel; a request without a reply
//! is executed and its result discarded (logged on failure). FIFO order
//! over the queue is total.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AclError, AclResult};
use crate::manager::AclManager;

const QUEUE_CAPACITY: usize = 32;

/// Result payload of a change. Only `AddKey` produces a key file name;
/// everything else completes with `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Done,
    KeyFile(String),
}

pub type Reply = Option<oneshot::Sender<AclResult<ChangeOutcome>>>;

#[derive(Debug)]
pub enum ChangeRequest {
    AddKey { member: String, key: String, reply: Reply },
    RemoveKey { filename: String, reply: Reply },
    AddMember { group: String, member: String, reply: Reply },
    RemoveMember { group: String, member: String, reply: Reply },
    AddGroup { group: String, reply: Reply },
    RemoveGroup { group: String, reply: Reply },
    AddProject { group: String, project: String, reply: Reply },
    RemoveProject { group: String, project: String, reply: Reply },
    Commit { message: String, reply: Reply },
}

/// The worker side. Runs until every [`AclAgentHandle`] is dropped.
pub struct AclAgent {
    manager: Arc<AclManager>,
    rx: mpsc::Receiver<ChangeRequest>,
}

impl AclAgent {
    pub fn spawn(manager: Arc<AclManager>) -> (AclAgentHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let agent = AclAgent { manager, rx };
        let join = tokio::spawn(agent.run());
        (AclAgentHandle { tx }, join)
    }

    async fn run(mut self) {
        info!("acl agent started");
        while let Some(request) = self.rx.recv().await {
            self.handle(request).await;
        }
        info!("acl agent stopped");
    }

    async fn handle(&self, request: ChangeRequest) {
        let (result, reply) = match request {
            ChangeRequest::AddKey { member, key, reply } => (
                self.manager.add_key(&member, &key).await.map(ChangeOutcome::KeyFile),
                reply,
            ),
            ChangeRequest::RemoveKey { filename, reply } => (
                self.manager.remove_key(&filename).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::AddMember { group, member, reply } => (
                self.manager.add_member(&group, &member).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::RemoveMember { group, member, reply } => (
                self.manager.remove_member(&group, &member).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::AddGroup { group, reply } => (
                self.manager.add_group(&group).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::RemoveGroup { group, reply } => (
                self.manager.remove_group(&group).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::AddProject { group, project, reply } => (
                self.manager.add_project(&group, &project).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::RemoveProject { group, project, reply } => (
                self.manager.remove_project(&group, &project).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
            ChangeRequest::Commit { message, reply } => (
                self.manager.commit(&message).await.map(|_| ChangeOutcome::Done),
                reply,
            ),
        };

        match reply {
            // The caller may have given up; a dropped receiver is fine.
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(error = %e, "discarded acl change failed");
                }
            }
        }
    }
}

/// Cloneable sender side with typed wrappers per operation.
#[derive(Clone)]
pub struct AclAgentHandle {
    tx: mpsc::Sender<ChangeRequest>,
}

impl AclAgentHandle {
    /// Enqueue a raw request, typically one with `reply: None`.
    pub async fn enqueue(&self, request: ChangeRequest) -> AclResult<()> {
        self.tx.send(request).await.map_err(|_| AclError::AgentGone)
    }

    pub async fn add_group(&self, group: &str) -> AclResult<()> {
        let group = group.to_string();
        self.request(|reply| ChangeRequest::AddGroup { group, reply }).await.map(|_| ())
    }

    pub async fn remove_group(&self, group: &str) -> AclResult<()> {
        let group = group.to_string();
        self.request(|reply| ChangeRequest::RemoveGroup { group, reply }).await.map(|_| ())
    }

    pub async fn add_project(&self, group: &str, project: &str) -> AclResult<()> {
        let (group, project) = (group.to_string(), project.to_string());
        self.request(|reply| ChangeRequest::AddProject { group, project, reply })
            .await
            .map(|_| ())
    }

    pub async fn remove_project(&self, group: &str, project: &str) -> AclResult<()> {
        let (group, project) = (group.to_string(), project.to_string());
        self.request(|reply| ChangeRequest::RemoveProject { group, project, reply })
            .await
            .map(|_| ())
    }

    pub async fn add_member(&self, group: &str, member: &str) -> AclResult<()> {
        let (group, member) = (group.to_string(), member.to_string());
        self.request(|reply| ChangeRequest::AddMember { group, member, reply })
            .await
            .map(|_| ())
    }

    pub async fn remove_member(&self, group: &str, member: &str) -> AclResult<()> {
        let (group, member) = (group.to_string(), member.to_string());
        self.request(|reply| ChangeRequest::RemoveMember { group, member, reply })
            .await
            .map(|_| ())
    }

    /// Store a key and return the generated `keydir/` filename.
    pub async fn add_key(&self, member: &str, key: &str) -> AclResult<String> {
        let (member, key) = (member.to_string(), key.to_string());
        match self.request(|reply| ChangeRequest::AddKey { member, key, reply }).await? {
            ChangeOutcome::KeyFile(filename) => Ok(filename),
            ChangeOutcome::Done => unreachable!("add_key always yields a key file"),
        }
    }

    pub async fn remove_key(&self, filename: &str) -> AclResult<()> {
        let filename = filename.to_string();
        self.request(|reply| ChangeRequest::RemoveKey { filename, reply })
            .await
            .map(|_| ())
    }

    pub async fn commit(&self, message: &str) -> AclResult<()> {
        let message = message.to_string();
        self.request(|reply| ChangeRequest::Commit { message, reply }).await.map(|_| ())
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> ChangeRequest,
    ) -> AclResult<ChangeOutcome> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(Some(tx)))
            .await
            .map_err(|_| AclError::AgentGone)?;
        rx.await.map_err(|_| AclError::AgentGone)?
    }
}
