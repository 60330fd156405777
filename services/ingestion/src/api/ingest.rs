//! Event ingest endpoint.

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{error, info};

use super::error::ApiError;
use crate::state::AppState;

/// `POST /ingest`: 202 with the published id and subject, or an error body.
pub async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    match state.pipeline().handle(&body).await {
        Ok(accepted) => {
            info!(
                event_id = %accepted.id,
                stream = %accepted.stream,
                subject = %accepted.subject,
                ttl = ?accepted.ttl,
                "event accepted"
            );
            Ok((StatusCode::ACCEPTED, Json(accepted)))
        }
        Err(e) => {
            if !e.is_client_error() {
                error!(reason = e.reason(), error = %e, "event ingestion failed");
            }
            Err(e.into())
        }
    }
}
