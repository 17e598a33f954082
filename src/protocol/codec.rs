//! JSON text framing for [`Envelope`]s.
//!
//! Wire shape: `{"type": "...", "request_id": "...", "message": {...}}`.
//! The `type` field is matched against the closed catalog before the
//! `message` body is deserialized; an unknown type is a protocol error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::types::*;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unsupported message type: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind} message: {source}")]
    Encode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
}

#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    message: Value,
}

/// Serialize an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let kind = envelope.kind();
    let message = match &envelope.payload {
        Payload::RegisterRequest(m) => serde_json::to_value(m),
        Payload::ApproveRequest(m) => serde_json::to_value(m),
        Payload::ApproveResponse(m) => serde_json::to_value(m),
        Payload::Ping => Ok(Value::Object(serde_json::Map::new())),
    }
    .map_err(|source| ProtocolError::Encode { kind, source })?;

    let raw = RawEnvelope {
        kind: kind.as_str().to_string(),
        request_id: envelope.request_id.clone(),
        message,
    };
    serde_json::to_string(&raw).map_err(|source| ProtocolError::Encode { kind, source })
}

/// Parse a text frame into an envelope.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let kind =
        MessageKind::from_wire(&raw.kind).ok_or_else(|| ProtocolError::UnknownKind(raw.kind.clone()))?;

    let invalid = |source| ProtocolError::InvalidPayload { kind, source };
    let payload = match kind {
        MessageKind::RegisterRequest => {
            Payload::RegisterRequest(serde_json::from_value(raw.message).map_err(invalid)?)
        }
        MessageKind::ApproveRequest => {
            Payload::ApproveRequest(serde_json::from_value(raw.message).map_err(invalid)?)
        }
        MessageKind::ApproveResponse => {
            Payload::ApproveResponse(serde_json::from_value(raw.message).map_err(invalid)?)
        }
        // Liveness only; whatever body came along is ignored.
        MessageKind::Ping => Payload::Ping,
    };

    Ok(Envelope {
        request_id: raw.request_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PrLink;
    use serde_json::json;

    #[test]
    fn test_approve_request_roundtrip_preserves_link() {
        let link = PrLink::new("foo", "bar", 42);
        let envelope = Envelope::correlated(
            "abc",
            Payload::ApproveRequest(ApproveRequest { link: link.clone() }),
        );

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.request_id, "abc");
        match decoded.payload {
            Payload::ApproveRequest(req) => assert_eq!(req.link, link),
            other => panic!("expected approve_request, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_wire_shape() {
        let envelope = Envelope::unsolicited(Payload::RegisterRequest(RegisterRequest {
            repos: vec!["foo/bar".into()],
            github_user: "octocat".into(),
        }));
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "register_request",
                "request_id": "",
                "message": {"repos": ["foo/bar"], "github_user": "octocat"}
            })
        );
    }

    #[test]
    fn test_approve_request_link_fields() {
        let envelope = Envelope::correlated(
            "r1",
            Payload::ApproveRequest(ApproveRequest {
                link: PrLink::new("acme", "widgets", 7),
            }),
        );
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(
            value["message"],
            json!({"link": {"owner": "acme", "repo": "widgets", "number": 7}})
        );
    }

    #[test]
    fn test_decode_unknown_kind_is_error() {
        let err = decode(r#"{"type":"unknown","message":{"foo":"bar"}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(ref k) if k == "unknown"));
    }

    #[test]
    fn test_decode_ping_without_message_or_request_id() {
        let envelope = decode(r#"{"type":"ping"}"#).unwrap();
        assert!(envelope.is_unsolicited());
        assert_eq!(envelope.payload, Payload::Ping);
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"request_id":"x"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_invalid_payload_for_known_kind() {
        let err = decode(r#"{"type":"register_request","message":{"repos":"nope"}}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                kind: MessageKind::RegisterRequest,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_approve_response_outcomes() {
        let ok = decode(r#"{"type":"approve_response","request_id":"1","message":{"response":"success"}}"#)
            .unwrap();
        assert_eq!(
            ok.payload,
            Payload::ApproveResponse(ApproveResponse {
                response: ApproveOutcome::Success
            })
        );

        let failed = decode(
            r#"{"type":"approve_response","request_id":"2","message":{"response":"error_github"}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.payload,
            Payload::ApproveResponse(ApproveResponse {
                response: ApproveOutcome::failed("error_github")
            })
        );
    }
}
