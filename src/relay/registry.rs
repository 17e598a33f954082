//! Approver Registry — in-memory directory of connected approvers.
//!
//! Tracks every accepted connection, the identity and repositories it
//! registered with, a repo → connections index used for routing, and a
//! per-identity presence counter (one person may hold several
//! connections).
//!
//! All state lives behind a single lock so the index can never disagree
//! with the connection records. Reads hand out snapshot copies; no lock is
//! held once a method returns.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

use super::connection::{ConnectionHandle, ConnectionId};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registration without a github user")]
    MissingIdentity,
}

/// A routable approver connection, as seen in an eligibility snapshot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub handle: ConnectionHandle,
    pub github_user: String,
}

struct ConnectionRecord {
    handle: ConnectionHandle,
    /// `None` until the connection registers.
    github_user: Option<String>,
    repos: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    repo_index: HashMap<String, Vec<ConnectionId>>,
    presence: HashMap<String, usize>,
}

impl RegistryState {
    /// Drop `id` from every repo index entry and release its presence.
    fn detach(&mut self, id: ConnectionId, user: Option<&str>, repos: &HashSet<String>) {
        for repo in repos {
            if let Some(ids) = self.repo_index.get_mut(repo) {
                ids.retain(|c| *c != id);
                if ids.is_empty() {
                    self.repo_index.remove(repo);
                }
            }
        }
        if let Some(user) = user {
            if let Some(count) = self.presence.get_mut(user) {
                *count -= 1;
                if *count == 0 {
                    self.presence.remove(user);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct ApproverRegistry {
    state: RwLock<RegistryState>,
}

impl ApproverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly accepted connection that has not registered yet.
    pub async fn attach(&self, handle: ConnectionHandle) {
        let mut state = self.state.write().await;
        state
            .connections
            .entry(handle.id())
            .or_insert_with(|| ConnectionRecord {
                handle,
                github_user: None,
                repos: HashSet::new(),
            });
    }

    /// Register `handle` as `github_user` for `repos`.
    ///
    /// A second registration on the same connection replaces the first:
    /// index entries are rebuilt from scratch.
    pub async fn register(
        &self,
        handle: &ConnectionHandle,
        github_user: &str,
        repos: &[String],
    ) -> Result<(), RegistryError> {
        if github_user.is_empty() {
            return Err(RegistryError::MissingIdentity);
        }

        let id = handle.id();
        let mut state = self.state.write().await;

        if let Some(previous) = state.connections.remove(&id) {
            state.detach(id, previous.github_user.as_deref(), &previous.repos);
        }

        let repos: HashSet<String> = repos.iter().cloned().collect();
        for repo in &repos {
            state.repo_index.entry(repo.clone()).or_default().push(id);
        }
        *state.presence.entry(github_user.to_string()).or_insert(0) += 1;
        state.connections.insert(
            id,
            ConnectionRecord {
                handle: handle.clone(),
                github_user: Some(github_user.to_string()),
                repos,
            },
        );

        Ok(())
    }

    /// Forget a connection entirely. Returns `false` if it was unknown.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        match state.connections.remove(&id) {
            Some(record) => {
                state.detach(id, record.github_user.as_deref(), &record.repos);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the connections registered for `repo_key`.
    pub async fn eligible_for(&self, repo_key: &str) -> Vec<Candidate> {
        let state = self.state.read().await;
        state
            .repo_index
            .get(repo_key)
            .into_iter()
            .flatten()
            .filter_map(|id| state.connections.get(id))
            .filter_map(|record| {
                record.github_user.as_ref().map(|user| Candidate {
                    handle: record.handle.clone(),
                    github_user: user.clone(),
                })
            })
            .collect()
    }

    /// Number of distinct approvers currently connected.
    pub async fn approver_count(&self) -> usize {
        self.state.read().await.presence.len()
    }

    /// Distinct approver identities, sorted.
    pub async fn approvers(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut users: Vec<String> = state.presence.keys().cloned().collect();
        users.sort();
        users
    }

    /// Live connections, registered or not.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outbox;

    fn conn() -> ConnectionHandle {
        let (outbox, _rx) = Outbox::channel();
        ConnectionHandle::new(outbox)
    }

    fn repos(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unregister_prunes_every_index() {
        let registry = ApproverRegistry::new();
        let a = conn();
        let b = conn();
        registry.attach(a.clone()).await;
        registry
            .register(&a, "alice", &repos(&["acme/widgets", "acme/gears"]))
            .await
            .unwrap();
        registry
            .register(&b, "bob", &repos(&["acme/widgets"]))
            .await
            .unwrap();

        assert_eq!(registry.eligible_for("acme/widgets").await.len(), 2);
        assert!(registry.unregister(a.id()).await);

        let widgets = registry.eligible_for("acme/widgets").await;
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].github_user, "bob");
        assert!(registry.eligible_for("acme/gears").await.is_empty());
        assert_eq!(registry.approvers().await, vec!["bob".to_string()]);
        assert!(!registry.unregister(a.id()).await);
    }

    #[tokio::test]
    async fn test_presence_counts_connections_per_person() {
        let registry = ApproverRegistry::new();
        let laptop = conn();
        let desktop = conn();
        registry.register(&laptop, "alice", &repos(&["x/y"])).await.unwrap();
        registry.register(&desktop, "alice", &repos(&["x/y"])).await.unwrap();

        assert_eq!(registry.approver_count().await, 1);
        assert_eq!(registry.eligible_for("x/y").await.len(), 2);

        registry.unregister(laptop.id()).await;
        assert_eq!(registry.approver_count().await, 1);

        registry.unregister(desktop.id()).await;
        assert_eq!(registry.approver_count().await, 0);
        assert!(registry.approvers().await.is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_previous_state() {
        let registry = ApproverRegistry::new();
        let a = conn();
        registry.register(&a, "alice", &repos(&["x/old"])).await.unwrap();
        registry.register(&a, "alice2", &repos(&["x/new"])).await.unwrap();

        assert!(registry.eligible_for("x/old").await.is_empty());
        assert_eq!(registry.eligible_for("x/new").await.len(), 1);
        assert_eq!(registry.approvers().await, vec!["alice2".to_string()]);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_never_eligible() {
        let registry = ApproverRegistry::new();
        let a = conn();
        registry.attach(a.clone()).await;

        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.approver_count().await, 0);
        assert!(registry.unregister(a.id()).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let registry = ApproverRegistry::new();
        let a = conn();
        let err = registry.register(&a, "", &repos(&["x/y"])).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingIdentity));
        assert!(registry.eligible_for("x/y").await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_registry() {
        let registry = ApproverRegistry::new();
        let a = conn();
        registry.register(&a, "alice", &repos(&["x/y"])).await.unwrap();

        let mut snapshot = registry.eligible_for("x/y").await;
        snapshot.clear();
        assert_eq!(registry.eligible_for("x/y").await.len(), 1);

        let snapshot = registry.eligible_for("x/y").await;
        registry.unregister(a.id()).await;
        assert_eq!(snapshot.len(), 1);
        assert!(registry.eligible_for("x/y").await.is_empty());
    }
}
