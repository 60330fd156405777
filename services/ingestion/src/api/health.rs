//! Health check endpoints.
//!
//! Used by load balancers and orchestration systems to decide whether the
//! service is alive and ready to receive events.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "ingestion";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    pub event_types: ComponentStatus,
    pub ingestion_policies: ComponentStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "syncing".
    pub status: String,

    /// Number of registered entries.
    pub count: usize,
}

impl ComponentStatus {
    fn new(synced: bool, count: usize) -> Self {
        Self {
            status: if synced { "ok" } else { "syncing" }.to_string(),
            count,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(status: &str, components: Option<ComponentHealth>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components,
    }
}

/// Basic health check. Does not look at dependencies.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness: 503 until event types and policies have been synced once.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    let registry = pipeline.registry();
    let engine = pipeline.engine();

    let components = ComponentHealth {
        event_types: ComponentStatus::new(registry.is_synced(), registry.len().await),
        ingestion_policies: ComponentStatus::new(engine.is_synced(), engine.len().await),
    };

    if state.is_ready() {
        (StatusCode::OK, Json(response("ok", Some(components))))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response("degraded", Some(components))),
        )
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
