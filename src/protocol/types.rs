//! Relay protocol message catalog.
//!
//! Every frame exchanged between the relay and an approver agent is an
//! [`Envelope`]: a message kind, an optional correlation id and a typed
//! payload. The payload is a closed enum, so the kind of a reply is known
//! as soon as the frame is decoded.

use serde::{Deserialize, Serialize};

use crate::github::PrLink;

// ── Message kinds ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RegisterRequest,
    ApproveRequest,
    ApproveResponse,
    Ping,
}

impl MessageKind {
    /// Wire name carried in the envelope's `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RegisterRequest => "register_request",
            MessageKind::ApproveRequest => "approve_request",
            MessageKind::ApproveResponse => "approve_response",
            MessageKind::Ping => "ping",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "register_request" => Some(MessageKind::RegisterRequest),
            "approve_request" => Some(MessageKind::ApproveRequest),
            "approve_response" => Some(MessageKind::ApproveResponse),
            "ping" => Some(MessageKind::Ping),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payloads ──────────────────────────────────────────────────

/// Sent by an agent to declare itself as an approver for a set of
/// repositories ("owner/repo").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub repos: Vec<String>,
    pub github_user: String,
}

/// Sent by the relay to ask an approver to act on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub link: PrLink,
}

/// Reply to an [`ApproveRequest`], tagged with the same request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub response: ApproveOutcome,
}

/// Decision reported by an approver.
///
/// Anything other than the two well-known values is kept verbatim in
/// [`ApproveOutcome::Failed`] so the relay can report it to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApproveOutcome {
    Success,
    ErrorSameAuthor,
    Failed(String),
}

const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_SAME_AUTHOR: &str = "error_same_author";

impl ApproveOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ApproveOutcome::Failed(reason.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApproveOutcome::Success => OUTCOME_SUCCESS,
            ApproveOutcome::ErrorSameAuthor => OUTCOME_SAME_AUTHOR,
            ApproveOutcome::Failed(reason) => reason,
        }
    }
}

impl From<String> for ApproveOutcome {
    fn from(value: String) -> Self {
        match value.as_str() {
            OUTCOME_SUCCESS => ApproveOutcome::Success,
            OUTCOME_SAME_AUTHOR => ApproveOutcome::ErrorSameAuthor,
            _ => ApproveOutcome::Failed(value),
        }
    }
}

impl From<ApproveOutcome> for String {
    fn from(value: ApproveOutcome) -> Self {
        match value {
            ApproveOutcome::Failed(reason) => reason,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ApproveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed message body. `Ping` carries nothing; it only proves liveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    RegisterRequest(RegisterRequest),
    ApproveRequest(ApproveRequest),
    ApproveResponse(ApproveResponse),
    Ping,
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::RegisterRequest(_) => MessageKind::RegisterRequest,
            Payload::ApproveRequest(_) => MessageKind::ApproveRequest,
            Payload::ApproveResponse(_) => MessageKind::ApproveResponse,
            Payload::Ping => MessageKind::Ping,
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation id. Empty for unsolicited messages.
    pub request_id: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn unsolicited(payload: Payload) -> Self {
        Self {
            request_id: String::new(),
            payload,
        }
    }

    pub fn correlated(request_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
        }
    }

    pub fn is_unsolicited(&self) -> bool {
        self.request_id.is_empty()
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_are_stable() {
        for kind in [
            MessageKind::RegisterRequest,
            MessageKind::ApproveRequest,
            MessageKind::ApproveResponse,
            MessageKind::Ping,
        ] {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire("approve"), None);
    }

    #[test]
    fn test_outcome_keeps_unknown_values_verbatim() {
        let outcome = ApproveOutcome::from("error_rate_limited".to_string());
        assert_eq!(outcome, ApproveOutcome::Failed("error_rate_limited".into()));
        assert_eq!(String::from(outcome), "error_rate_limited");
    }

    #[test]
    fn test_outcome_serializes_as_plain_string() {
        let resp = ApproveResponse {
            response: ApproveOutcome::ErrorSameAuthor,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"response": "error_same_author"}));
    }

    #[test]
    fn test_envelope_constructors() {
        let ping = Envelope::unsolicited(Payload::Ping);
        assert!(ping.is_unsolicited());
        assert_eq!(ping.kind(), MessageKind::Ping);

        let reply = Envelope::correlated(
            "req-1",
            Payload::ApproveResponse(ApproveResponse {
                response: ApproveOutcome::Success,
            }),
        );
        assert!(!reply.is_unsolicited());
        assert_eq!(reply.kind(), MessageKind::ApproveResponse);
    }
}
