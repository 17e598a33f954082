use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::github::LinkError;
use crate::relay::correlator::RpcError;
use crate::relay::router::RouteError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid pull request link: {0}")]
    InvalidLink(#[from] LinkError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("no eligible approver")]
    NoEligibleApprover,

    #[error("approval timed out")]
    ApprovalTimeout,

    #[error("approval failed: {0}")]
    ApprovalFailed(String),
}

impl From<RouteError> for AppError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NoEligibleApprover => AppError::NoEligibleApprover,
            RouteError::Rpc {
                source: RpcError::Timeout(_),
                ..
            } => AppError::ApprovalTimeout,
            other => AppError::ApprovalFailed(other.to_string()),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            AppError::InvalidLink(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_pr_link",
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
            ),
            AppError::NoEligibleApprover => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "routing_error",
                "no_eligible_approver",
            ),
            AppError::ApprovalTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "approval_timeout",
            ),
            AppError::ApprovalFailed(_) => (
                StatusCode::BAD_GATEWAY,
                "routing_error",
                "approval_failed",
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = self.parts();
        let msg = self.to_string();
        if status.is_server_error() {
            tracing::warn!(code, "{}", msg);
        }

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
