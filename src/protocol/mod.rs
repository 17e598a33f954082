//! Wire protocol spoken between the relay and approver agents.

pub mod codec;
pub mod outbox;
pub mod types;

pub use codec::{decode, encode, ProtocolError};
pub use outbox::{Outbox, SendError};
pub use types::*;
