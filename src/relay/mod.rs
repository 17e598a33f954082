//! Relay side: accepts approver connections and routes approval requests
//! to them.

pub mod connection;
pub mod correlator;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;

pub use connection::{ConnectionHandle, ConnectionId};
pub use correlator::{Correlator, Delivery, PendingCall, RpcError};
pub use registry::{ApproverRegistry, Candidate, RegistryError};
pub use router::{Approval, ApprovalRouter, RouteError, DEFAULT_REQUEST_TIMEOUT};
pub use server::{app, serve, Relay, RelayConfig};
