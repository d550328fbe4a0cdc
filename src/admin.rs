//! Blacklist admin HTTP surface (spec.md §6) plus a `/health` endpoint in
//! the style of the teacher's `cluster` service.
//!
//! Deliberately thin: validation of the JSON body is the only logic here,
//! the actual mutation is a single `add`/`remove` against the shared
//! blacklist set.

use crate::executor::Executor;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AdminState {
    pub executor: Arc<Executor>,
}

#[derive(Debug, Deserialize)]
pub struct BlacklistBody {
    host: Option<String>,
}

/// Builds the `/docker-executor/blacklist` + `/health` + `/ready` router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/docker-executor/blacklist",
            post(add_handler).put(add_handler).delete(remove_handler),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Extracts `{"host": "..."}` from the body, returning the `400` reason the
/// spec specifies when the body is missing, unparseable, or lacks `host`.
fn parse_host(body: &[u8]) -> Result<String, &'static str> {
    if body.is_empty() {
        return Err("Failed to parse JSON body because it was missing.");
    }
    let parsed: BlacklistBody = serde_json::from_slice(body)
        .map_err(|_| "Failed to parse JSON body: invalid JSON.")?;
    parsed
        .host
        .filter(|h| !h.is_empty())
        .ok_or("Failed to find 'host' attribute in JSON body.")
}

async fn add_handler(State(state): State<AdminState>, body: axum::body::Bytes) -> impl IntoResponse {
    match parse_host(&body) {
        Ok(host) => {
            state.executor.blacklist().add(&host);
            tracing::info!(host, "added host to blacklist");
            (StatusCode::OK, String::new())
        }
        Err(reason) => {
            tracing::warn!(reason, "rejected blacklist add");
            (StatusCode::BAD_REQUEST, reason.to_string())
        }
    }
}

async fn remove_handler(State(state): State<AdminState>, body: axum::body::Bytes) -> impl IntoResponse {
    match parse_host(&body) {
        Ok(host) => {
            state.executor.blacklist().remove(&host);
            tracing::info!(host, "removed host from blacklist");
            (StatusCode::OK, String::new())
        }
        Err(reason) => {
            tracing::warn!(reason, "rejected blacklist remove");
            (StatusCode::BAD_REQUEST, reason.to_string())
        }
    }
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "farms": state.executor.farm_count(),
        "blacklisted": state.executor.blacklist().list().len(),
        "breakers_tracked": state.executor.breaker_registry().len(),
    }))
}

/// Ready if every configured farm has at least one healthy host, or no
/// hosts are configured at all — mirrors the teacher's `/ready` contract
/// ("ready if we have at least one healthy agent, or none are configured").
async fn ready_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let (total, healthy) = state.executor.readiness_counts();
    let ready = total == 0 || healthy > 0;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "ready": ready,
            "hosts": { "total": total, "healthy": healthy },
        })),
    )
}
