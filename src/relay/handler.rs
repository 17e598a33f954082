//! Connection Handler — one task per accepted approver websocket.
//!
//! The handler:
//!   1. Attaches the connection to the registry
//!   2. Spawns a writer task draining the connection's outbox to the socket
//!   3. Reads frames in order, routing correlated replies to the correlator
//!      and everything else through kind dispatch
//!   4. On any exit path, unregisters the connection exactly once and fails
//!      any call still waiting on it

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};

use super::connection::ConnectionHandle;
use super::correlator::Delivery;
use super::server::Relay;
use crate::protocol::{decode, Envelope, Outbox, Payload, ProtocolError};

/// GET /ws
///
/// Bearer authentication is enforced by the router middleware before the
/// upgrade happens.
pub async fn ws_handler(State(relay): State<Arc<Relay>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, relay))
}

/// Why a read loop stopped.
#[derive(Debug)]
enum Exit {
    Closed,
    Shutdown,
    Transport(axum::Error),
    Protocol(ProtocolError),
}

pub async fn handle_connection(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbound) = Outbox::channel();
    let handle = ConnectionHandle::new(outbox);
    let connection_id = handle.id();

    relay.registry.attach(handle.clone()).await;
    tracing::info!(connection_id = %connection_id, "approver connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                tracing::debug!(connection_id = %connection_id, error = %e, "write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let exit = read_loop(&mut stream, &handle, &relay).await;

    relay.registry.unregister(connection_id).await;
    relay.correlator.cancel_connection(connection_id);
    writer.abort();

    match exit {
        Exit::Closed | Exit::Shutdown => {
            tracing::info!(connection_id = %connection_id, "approver disconnected")
        }
        Exit::Transport(e) => {
            tracing::info!(connection_id = %connection_id, error = %e, "approver connection lost")
        }
        Exit::Protocol(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "closing connection on protocol error")
        }
    }
}

async fn read_loop<S>(stream: &mut S, handle: &ConnectionHandle, relay: &Relay) -> Exit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = relay.shutdown_token().cancelled() => return Exit::Shutdown,
        };

        let text = match frame {
            None | Some(Ok(Message::Close(_))) => return Exit::Closed,
            Some(Err(e)) => return Exit::Transport(e),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Exit::Protocol(ProtocolError::UnexpectedFrame("non-utf8 binary frame")),
            },
            // Transport-level keep-alives are answered by the websocket layer.
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
        };

        let envelope = match decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => return Exit::Protocol(e),
        };
        dispatch(envelope, handle, relay).await;
    }
}

async fn dispatch(envelope: Envelope, handle: &ConnectionHandle, relay: &Relay) {
    let Envelope { request_id, payload } = envelope;

    let payload = if request_id.is_empty() {
        payload
    } else {
        match relay.correlator.deliver(&request_id, payload) {
            Delivery::Delivered => return,
            Delivery::Unmatched(payload) => payload,
        }
    };

    match payload {
        Payload::RegisterRequest(req) => {
            match relay
                .registry
                .register(handle, &req.github_user, &req.repos)
                .await
            {
                Ok(()) => tracing::info!(
                    connection_id = %handle.id(),
                    github_user = %req.github_user,
                    repos = ?req.repos,
                    "approver registered"
                ),
                Err(e) => tracing::warn!(
                    connection_id = %handle.id(),
                    error = %e,
                    "ignoring registration"
                ),
            }
        }
        Payload::Ping => {
            tracing::debug!(connection_id = %handle.id(), "ping");
        }
        Payload::ApproveResponse(resp) if !request_id.is_empty() => {
            tracing::warn!(
                connection_id = %handle.id(),
                request_id = %request_id,
                response = %resp.response,
                "discarding reply to a call that is no longer waiting"
            );
        }
        other => {
            tracing::warn!(
                connection_id = %handle.id(),
                request_id = %request_id,
                kind = %other.kind(),
                "ignoring unexpected message"
            );
        }
    }
}
