//! Coordinator HTTP API (axum). Bound to loopback; agents reach it through
//! an operator-run tunnel.
//!
//! - `GET /health`
//! - `GET /status`
//! - `GET /auth/pending`
//! - `POST /auth/submit`
//!
//! Handlers only call into [`Coordinator`]; they hold no state of their own.

use std::sync::Arc;

use authmux_core::{AuthRequest, PaneId};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::coordinator::{Coordinator, CoordinatorStatus, SubmitError};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub pane_id: PaneId,
    pub code: String,
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            SubmitError::InvalidCode => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_code"),
            SubmitError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SubmitError::InFlight(_) => (StatusCode::CONFLICT, "in_flight"),
            SubmitError::Injection { .. } => (StatusCode::BAD_GATEWAY, "injection_failed"),
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/auth/pending", get(pending))
        .route("/auth/submit", post(submit))
        .with_state(coordinator)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.status().await)
}

async fn pending(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<AuthRequest>> {
    Json(coordinator.pending_for_client().await)
}

async fn submit(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, SubmitError> {
    coordinator
        .submit_code(request.pane_id, &request.code, request.account.as_deref())
        .await?;
    Ok(Json(SubmitResponse {
        status: "resumed".to_string(),
    }))
}
