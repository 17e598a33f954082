//! Approval Router — picks an approver for a pull request and drives the
//! request/response exchange with it.
//!
//! Selection is uniformly random among the eligible connections. The only
//! retry is the same-author case: every connection of the author is
//! dropped from the candidate list and another approver is tried. The list
//! strictly shrinks on each retry, so the loop ends after at most one
//! round per distinct approver. Timeouts and other failures are terminal
//! to avoid two approvers acting on the same PR.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::correlator::{Correlator, RpcError};
use super::registry::ApproverRegistry;
use crate::github::PrLink;
use crate::protocol::{ApproveOutcome, ApproveRequest, MessageKind, Payload};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no eligible approver")]
    NoEligibleApprover,

    #[error("approval request to {approver} failed: {source}")]
    Rpc {
        approver: String,
        #[source]
        source: RpcError,
    },

    #[error("{approver} could not approve: {reason}")]
    Rejected { approver: String, reason: String },

    #[error("{approver} replied with unexpected {kind} message")]
    UnexpectedReply { approver: String, kind: MessageKind },
}

/// A successful approval and who granted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub pr: PrLink,
    pub approver: String,
}

pub struct ApprovalRouter {
    registry: Arc<ApproverRegistry>,
    correlator: Arc<Correlator>,
    request_timeout: Duration,
}

impl ApprovalRouter {
    pub fn new(
        registry: Arc<ApproverRegistry>,
        correlator: Arc<Correlator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            correlator,
            request_timeout,
        }
    }

    pub async fn route_approval(&self, link: &PrLink) -> Result<Approval, RouteError> {
        let mut candidates = self.registry.eligible_for(&link.repo_key()).await;

        loop {
            if candidates.is_empty() {
                tracing::info!(pr = %link, "no eligible approver");
                return Err(RouteError::NoEligibleApprover);
            }

            let idx = rand::thread_rng().gen_range(0..candidates.len());
            let selected = candidates[idx].clone();
            tracing::info!(
                pr = %link,
                approver = %selected.github_user,
                remaining = candidates.len(),
                "forwarding approval request"
            );

            let rpc_failed = |source| RouteError::Rpc {
                approver: selected.github_user.clone(),
                source,
            };
            let call = self
                .correlator
                .send(
                    &selected.handle,
                    Payload::ApproveRequest(ApproveRequest { link: link.clone() }),
                )
                .map_err(rpc_failed)?;
            let reply = self
                .correlator
                .await_reply(call, self.request_timeout)
                .await
                .map_err(rpc_failed)?;

            let outcome = match reply {
                Payload::ApproveResponse(resp) => resp.response,
                other => {
                    return Err(RouteError::UnexpectedReply {
                        approver: selected.github_user,
                        kind: other.kind(),
                    })
                }
            };

            match outcome {
                ApproveOutcome::Success => {
                    tracing::info!(pr = %link, approver = %selected.github_user, "approved");
                    return Ok(Approval {
                        pr: link.clone(),
                        approver: selected.github_user,
                    });
                }
                ApproveOutcome::ErrorSameAuthor => {
                    tracing::info!(
                        pr = %link,
                        author = %selected.github_user,
                        "approver is the author, excluding and retrying"
                    );
                    candidates.retain(|c| c.github_user != selected.github_user);
                }
                ApproveOutcome::Failed(reason) => {
                    tracing::warn!(pr = %link, approver = %selected.github_user, reason = %reason, "approval failed");
                    return Err(RouteError::Rejected {
                        approver: selected.github_user,
                        reason,
                    });
                }
            }
        }
    }
}
