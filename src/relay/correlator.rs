//! Request/response correlation over approver connections.
//!
//! `send` registers a one-shot reply slot under a fresh request id *before*
//! the frame is queued, so a reply can never arrive ahead of its slot.
//! Slots are removed on first resolution: delivery, timeout, shutdown or
//! the loss of the connection the request went out on.

use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::{Envelope, Payload, SendError};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to send request: {0}")]
    Transport(#[from] SendError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("approver disconnected before replying")]
    ConnectionClosed,
}

/// An outstanding call, returned by [`Correlator::send`].
#[derive(Debug)]
pub struct PendingCall {
    request_id: String,
    reply: oneshot::Receiver<Payload>,
}

impl PendingCall {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Result of handing an inbound correlated message to the correlator.
#[derive(Debug)]
pub enum Delivery {
    Delivered,
    /// No call is waiting on that id; the payload is handed back.
    Unmatched(Payload),
}

struct Slot {
    connection: ConnectionId,
    reply: oneshot::Sender<Payload>,
}

pub struct Correlator {
    pending: DashMap<String, Slot>,
    shutdown: CancellationToken,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue `payload` on `conn` as a correlated request.
    pub fn send(&self, conn: &ConnectionHandle, payload: Payload) -> Result<PendingCall, RpcError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcError::Cancelled);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            Slot {
                connection: conn.id(),
                reply: tx,
            },
        );

        if let Err(e) = conn.send(&Envelope::correlated(request_id.clone(), payload)) {
            self.pending.remove(&request_id);
            return Err(e.into());
        }

        tracing::debug!(request_id = %request_id, connection_id = %conn.id(), "rpc request sent");
        Ok(PendingCall {
            request_id,
            reply: rx,
        })
    }

    /// Wait for the reply to `call`, at most `timeout`.
    pub async fn await_reply(&self, call: PendingCall, timeout: Duration) -> Result<Payload, RpcError> {
        let PendingCall { request_id, reply } = call;

        let result = tokio::select! {
            res = tokio::time::timeout(timeout, reply) => match res {
                Ok(Ok(payload)) => Ok(payload),
                // Sender dropped: the slot was cleared by shutdown or by
                // its connection going away.
                Ok(Err(_)) if self.shutdown.is_cancelled() => Err(RpcError::Cancelled),
                Ok(Err(_)) => Err(RpcError::ConnectionClosed),
                Err(_) => Err(RpcError::Timeout(timeout)),
            },
            _ = self.shutdown.cancelled() => Err(RpcError::Cancelled),
        };

        if result.is_err() {
            self.pending.remove(&request_id);
            tracing::warn!(request_id = %request_id, "rpc call abandoned");
        }
        result
    }

    /// Resolve the call waiting on `request_id`, if any.
    pub fn deliver(&self, request_id: &str, payload: Payload) -> Delivery {
        match self.pending.remove(request_id) {
            Some((_, slot)) => {
                if slot.reply.send(payload).is_err() {
                    tracing::debug!(request_id = %request_id, "reply arrived after caller gave up");
                }
                Delivery::Delivered
            }
            None => {
                tracing::debug!(request_id = %request_id, "no call waiting on request id");
                Delivery::Unmatched(payload)
            }
        }
    }

    /// Resolve every outstanding call with [`RpcError::Cancelled`] and refuse
    /// new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let cancelled = self.pending.len();
        self.pending.clear();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled pending rpc calls");
        }
    }

    /// Fail every call still waiting on `connection`. Returns how many were
    /// dropped.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, slot| slot.connection != connection);
        let dropped = before.saturating_sub(self.pending.len());
        if dropped > 0 {
            tracing::info!(connection_id = %connection, dropped, "failed calls on closed connection");
        }
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}
