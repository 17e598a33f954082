//! Approver agent: keeps one connection to the relay alive and answers the
//! approval requests it receives.
//!
//! Lifecycle per attempt:
//!   Connecting → Authenticating → Registering → Listening → Disconnected
//!
//! Dial failures and dropped connections are retried every
//! `reconnect_interval` forever. A 401 from the relay is terminal.

mod session;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{header, HeaderValue, StatusCode},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::github::{ApprovalBackend, GithubError};
use crate::protocol::{Envelope, Outbox, Payload, ProtocolError, RegisterRequest, SendError};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("relay rejected the auth token")]
    Unauthorized,

    #[error("invalid relay url {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("auth token is not a valid header value")]
    InvalidToken,

    #[error("dial failed: {0}")]
    Dial(tungstenite::Error),

    #[error("dial timed out after {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    Transport(tungstenite::Error),

    #[error("github: {0}")]
    Github(#[from] GithubError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("send failed: {0}")]
    Send(SendError),

    #[error("relay closed the connection")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connecting,
    Authenticating,
    Registering,
    Listening,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Disconnected => "disconnected",
            AgentState::Connecting => "connecting",
            AgentState::Authenticating => "authenticating",
            AgentState::Registering => "registering",
            AgentState::Listening => "listening",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay base url. `http(s)://` is rewritten to `ws(s)://` and the
    /// `/ws` path is appended when missing.
    pub server_url: String,
    pub auth_token: Option<String>,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
}

impl AgentConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            auth_token: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Websocket endpoint derived from `server_url`.
    pub fn websocket_url(&self) -> Result<Url, AgentError> {
        let invalid = |reason: &str| AgentError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(&self.server_url).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return Err(invalid("scheme must be http, https, ws or wss")),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot switch to websocket scheme"))?;

        let path = url.path().trim_end_matches('/').to_string();
        if !path.ends_with("/ws") {
            url.set_path(&format!("{}/ws", path));
        }
        Ok(url)
    }
}

pub struct ApproverAgent {
    config: AgentConfig,
    backend: Arc<dyn ApprovalBackend>,
    shutdown: CancellationToken,
    state: watch::Sender<AgentState>,
}

impl ApproverAgent {
    pub fn new(config: AgentConfig, backend: Arc<dyn ApprovalBackend>) -> Self {
        let (state, _) = watch::channel(AgentState::Disconnected);
        Self {
            config,
            backend,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: AgentState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "agent state");
        }
    }

    /// Stay connected until shut down. Returns `Ok` on shutdown,
    /// `Err(Unauthorized)` when the relay refuses the token, and a
    /// configuration error up front for a url or token that cannot work.
    pub async fn run(&self) -> Result<(), AgentError> {
        // Fail fast on a url or token that can never work.
        self.upgrade_request()?;

        loop {
            let result = self.run_session().await;
            self.set_state(AgentState::Disconnected);

            match result {
                _ if self.shutdown.is_cancelled() => return Ok(()),
                Err(AgentError::Unauthorized) => {
                    tracing::error!(server_url = %self.config.server_url, "relay rejected the auth token");
                    return Err(AgentError::Unauthorized);
                }
                Ok(()) => tracing::info!("connection to relay ended"),
                Err(e) => tracing::warn!(
                    error = %e,
                    retry_in = ?self.config.reconnect_interval,
                    "connection to relay failed"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    fn upgrade_request(&self) -> Result<Request, AgentError> {
        let url = self.config.websocket_url()?;
        let mut request = url.as_str().into_client_request().map_err(AgentError::Dial)?;
        if let Some(token) = self.config.auth_token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| AgentError::InvalidToken)?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// One connection attempt, from dial to disconnect.
    async fn run_session(&self) -> Result<(), AgentError> {
        self.set_state(AgentState::Connecting);
        let request = self.upgrade_request()?;
        let connect_timeout = self.config.connect_timeout;

        let dialed = tokio::select! {
            dialed = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request)) => dialed,
            _ = self.shutdown.cancelled() => return Ok(()),
        };
        let socket = match dialed {
            Err(_) => return Err(AgentError::Timeout(connect_timeout)),
            Ok(Err(tungstenite::Error::Http(resp))) if resp.status() == StatusCode::UNAUTHORIZED => {
                return Err(AgentError::Unauthorized)
            }
            Ok(Err(e)) => return Err(AgentError::Dial(e)),
            Ok(Ok((socket, _))) => socket,
        };
        tracing::info!(server_url = %self.config.server_url, "connected to relay");

        self.set_state(AgentState::Authenticating);
        let (github_user, repos) = tokio::select! {
            resolved = async {
                tokio::try_join!(
                    self.backend.current_identity(),
                    self.backend.reachable_repositories()
                )
            } => resolved?,
            _ = self.shutdown.cancelled() => return Ok(()),
        };

        self.set_state(AgentState::Registering);
        let (outbox, outbound) = Outbox::channel();
        outbox
            .send(&Envelope::unsolicited(Payload::RegisterRequest(RegisterRequest {
                repos: repos.clone(),
                github_user: github_user.clone(),
            })))
            .map_err(AgentError::Send)?;
        tracing::info!(github_user = %github_user, repos = ?repos, "registering with relay");

        let session = self.shutdown.child_token();
        let (sink, stream) = socket.split();

        self.set_state(AgentState::Listening);
        let (written, read, pinged) = tokio::join!(
            session::write_loop(sink, outbound, session.clone()),
            session::read_loop(stream, outbox.clone(), self.backend.clone(), session.clone()),
            session::heartbeat(outbox, self.config.ping_interval, session.clone()),
        );

        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        read.and(written).and(pinged).and(Err(AgentError::Disconnected))
    }
}
