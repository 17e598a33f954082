//! GitHub side of an approver: who am I, what can I approve, and acting on
//! a pull request.

use async_trait::async_trait;

use crate::protocol::ApproveOutcome;

pub mod client;
pub mod link;

pub use client::{GithubClient, GithubError};
pub use link::{LinkError, PrLink};

/// Decision-making collaborator consulted by an approver agent.
#[async_trait]
pub trait ApprovalBackend: Send + Sync {
    /// GitHub login the agent registers under.
    async fn current_identity(&self) -> Result<String, GithubError>;

    /// Repositories ("owner/repo") the agent declares it can approve for.
    async fn reachable_repositories(&self) -> Result<Vec<String>, GithubError>;

    /// Approve `link` unless the current identity authored it.
    async fn decide_and_act(&self, link: &PrLink) -> ApproveOutcome;
}
