//! Tasks that live for exactly one agent connection.
//!
//! Three tasks share a per-connection cancellation token: the writer, the
//! read loop and the heartbeat. Each holds a drop guard on the token, so
//! whichever finishes first (socket closed, write failure, protocol error,
//! shutdown) brings the other two down with it.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::AgentError;
use crate::github::ApprovalBackend;
use crate::protocol::{decode, ApproveResponse, Envelope, Outbox, Payload, ProtocolError};

/// Drain queued frames into the socket.
pub(crate) async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<String>,
    session: CancellationToken,
) -> Result<(), AgentError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let _guard = session.clone().drop_guard();
    let result = loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = session.cancelled() => break Ok(()),
        };
        let Some(frame) = frame else { break Ok(()) };
        if let Err(e) = sink.send(Message::Text(frame)).await {
            break Err(AgentError::Transport(e));
        }
    };
    let _ = sink.close().await;
    result
}

/// Answer approval requests until the connection or the session ends.
pub(crate) async fn read_loop<S>(
    mut stream: S,
    outbox: Outbox,
    backend: Arc<dyn ApprovalBackend>,
    session: CancellationToken,
) -> Result<(), AgentError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let _guard = session.clone().drop_guard();
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = session.cancelled() => return Ok(()),
        };

        let text = match frame {
            None | Some(Ok(Message::Close(_))) => return Err(AgentError::Disconnected),
            Some(Err(e)) => return Err(AgentError::Transport(e)),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes).map_err(|_| {
                AgentError::Protocol(ProtocolError::UnexpectedFrame("non-utf8 binary frame"))
            })?,
            Some(Ok(_)) => continue,
        };

        let Envelope { request_id, payload } = decode(&text)?;
        match payload {
            Payload::ApproveRequest(req) => {
                tracing::info!(pr = %req.link, request_id = %request_id, "approval requested");
                let response = tokio::select! {
                    outcome = backend.decide_and_act(&req.link) => outcome,
                    _ = session.cancelled() => return Ok(()),
                };
                tracing::info!(pr = %req.link, outcome = %response, "replying to relay");
                outbox
                    .send(&Envelope::correlated(
                        request_id,
                        Payload::ApproveResponse(ApproveResponse { response }),
                    ))
                    .map_err(AgentError::Send)?;
            }
            Payload::Ping => tracing::debug!("ping from relay"),
            other => tracing::warn!(kind = %other.kind(), "ignoring unexpected message"),
        }
    }
}

/// Send a `ping` every `interval` until the session ends.
pub(crate) async fn heartbeat(
    outbox: Outbox,
    interval: Duration,
    session: CancellationToken,
) -> Result<(), AgentError> {
    let _guard = session.clone().drop_guard();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = session.cancelled() => return Ok(()),
        }
        outbox
            .send(&Envelope::unsolicited(Payload::Ping))
            .map_err(AgentError::Send)?;
        tracing::debug!("ping sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{GithubError, PrLink};
    use crate::protocol::{encode, ApproveOutcome, ApproveRequest};
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;

    struct AlwaysApprove;

    #[async_trait]
    impl ApprovalBackend for AlwaysApprove {
        async fn current_identity(&self) -> Result<String, GithubError> {
            Ok("bob".into())
        }
        async fn reachable_repositories(&self) -> Result<Vec<String>, GithubError> {
            Ok(vec!["acme/widgets".into()])
        }
        async fn decide_and_act(&self, _link: &PrLink) -> ApproveOutcome {
            ApproveOutcome::Success
        }
    }

    fn text(envelope: &Envelope) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(encode(envelope).unwrap()))
    }

    #[tokio::test]
    async fn test_read_loop_answers_with_same_request_id() {
        let (frames_tx, frames_rx) = fmpsc::unbounded();
        let (outbox, mut outbound) = Outbox::channel();
        let session = CancellationToken::new();

        frames_tx
            .unbounded_send(text(&Envelope::correlated(
                "req-42",
                Payload::ApproveRequest(ApproveRequest {
                    link: PrLink::new("acme", "widgets", 7),
                }),
            )))
            .unwrap();

        let task = tokio::spawn(read_loop(
            frames_rx,
            outbox,
            Arc::new(AlwaysApprove),
            session.clone(),
        ));

        let reply = decode(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply.request_id, "req-42");
        assert_eq!(
            reply.payload,
            Payload::ApproveResponse(ApproveResponse {
                response: ApproveOutcome::Success
            })
        );

        drop(frames_tx);
        let result = task.await.unwrap();
        assert!(matches!(result, Err(AgentError::Disconnected)));
        assert!(session.is_cancelled(), "ending the read loop cancels the session");
    }

    #[tokio::test]
    async fn test_read_loop_rejects_unknown_kind() {
        let (frames_tx, frames_rx) = fmpsc::unbounded();
        let (outbox, _outbound) = Outbox::channel();
        frames_tx
            .unbounded_send(Ok(Message::Text(r#"{"type":"bogus"}"#.into())))
            .unwrap();

        let result = read_loop(frames_rx, outbox, Arc::new(AlwaysApprove), CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(AgentError::Protocol(ProtocolError::UnknownKind(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_on_interval_until_cancelled() {
        let (outbox, mut outbound) = Outbox::channel();
        let session = CancellationToken::new();
        let task = tokio::spawn(heartbeat(outbox, Duration::from_secs(5), session.clone()));

        for _ in 0..3 {
            let ping = decode(&outbound.recv().await.unwrap()).unwrap();
            assert_eq!(ping.payload, Payload::Ping);
            assert!(ping.is_unsolicited());
        }

        session.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_failure_cancels_session() {
        let (outbox, outbound) = Outbox::channel();
        drop(outbound);
        let session = CancellationToken::new();

        let result = heartbeat(outbox, Duration::from_millis(5), session.clone()).await;
        assert!(matches!(result, Err(AgentError::Send(_))));
        assert!(session.is_cancelled());
    }
}
