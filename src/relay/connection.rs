use uuid::Uuid;

use crate::protocol::{Envelope, Outbox, SendError};

pub type ConnectionId = Uuid;

/// Cheap, cloneable handle to one accepted approver connection.
///
/// The handle only knows how to queue frames; the socket itself is owned by
/// the connection handler's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: Outbox,
}

impl ConnectionHandle {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbox,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        self.outbox.send(envelope)
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
