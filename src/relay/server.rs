use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::correlator::Correlator;
use super::handler;
use super::registry::ApproverRegistry;
use super::router::{ApprovalRouter, DEFAULT_REQUEST_TIMEOUT};
use crate::errors::AppError;
use crate::github::PrLink;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared bearer token required from agents and submitters. `None`
    /// disables authentication.
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// One relay instance: its registry, correlator and router.
///
/// Nothing is global, so several relays can live side by side (tests do).
pub struct Relay {
    pub registry: Arc<ApproverRegistry>,
    pub correlator: Arc<Correlator>,
    pub router: ApprovalRouter,
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ApproverRegistry::new());
        let correlator = Arc::new(Correlator::new());
        let router = ApprovalRouter::new(
            registry.clone(),
            correlator.clone(),
            config.request_timeout,
        );
        Self {
            registry,
            correlator,
            router,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop accepting work: pending calls resolve as cancelled and every
    /// connection read loop exits.
    pub fn shutdown(&self) {
        self.correlator.shutdown();
        self.shutdown.cancel();
    }
}

/// Build the relay's HTTP router.
pub fn app(relay: Arc<Relay>) -> Router {
    let protected = Router::new()
        .route("/ws", get(handler::ws_handler))
        .route("/submit", post(submit))
        .route("/approvers", get(list_approvers))
        .layer(middleware::from_fn_with_state(relay.clone(), require_bearer));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(protected)
        .with_state(relay)
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listener` until `relay` is shut down.
pub async fn serve(listener: tokio::net::TcpListener, relay: Arc<Relay>) -> std::io::Result<()> {
    let token = relay.shutdown_token().clone();
    axum::serve(listener, app(relay))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

// ── Middleware ────────────────────────────────────────────────

async fn require_bearer(
    State(relay): State<Arc<Relay>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = relay.config.auth_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "rejecting request with invalid token");
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "rejecting request without token");
            Err(AppError::Unauthorized)
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub pr_link: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub pr: String,
    pub approved_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproversResponse {
    pub count: usize,
    pub approvers: Vec<String>,
}

/// POST /submit
async fn submit(
    State(relay): State<Arc<Relay>>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let link = PrLink::parse(&body.pr_link)?;
    let approval = relay.router.route_approval(&link).await?;
    Ok(Json(SubmitResponse {
        pr: approval.pr.to_string(),
        approved_by: approval.approver,
    }))
}

/// GET /approvers
async fn list_approvers(State(relay): State<Arc<Relay>>) -> Json<ApproversResponse> {
    let approvers = relay.registry.approvers().await;
    Json(ApproversResponse {
        count: approvers.len(),
        approvers,
    })
}
