//! Outbound frame queue shared by everything that writes to one socket.
//!
//! Envelopes are encoded before they are queued, so an encoding failure is
//! reported to the caller and nothing reaches the wire. A single writer
//! task drains the receiver into the socket, which keeps frames on one
//! connection in the order they were queued.

use thiserror::Error;
use tokio::sync::mpsc;

use super::codec::{self, ProtocolError};
use super::types::Envelope;

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Create an outbox and the receiving end its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = codec::encode(envelope)?;
        self.tx.send(frame).map_err(|_| SendError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Payload};

    #[tokio::test]
    async fn test_frames_are_queued_in_order() {
        let (outbox, mut rx) = Outbox::channel();
        outbox.send(&Envelope::correlated("1", Payload::Ping)).unwrap();
        outbox.send(&Envelope::correlated("2", Payload::Ping)).unwrap();

        let first = decode(&rx.recv().await.unwrap()).unwrap();
        let second = decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.request_id, "1");
        assert_eq!(second.request_id, "2");
    }

    #[test]
    fn test_send_after_writer_gone_fails() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(outbox.is_closed());
        let err = outbox.send(&Envelope::unsolicited(Payload::Ping)).unwrap_err();
        assert!(matches!(err, SendError::Closed));
    }
}
