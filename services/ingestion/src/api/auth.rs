//! API-key authentication for the ingest endpoint.
//!
//! The expected key is read from the live settings on every request, so a
//! rotated `auth.token` takes effect without a restart.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::state::AppState;

pub const API_KEY_SCHEME: &str = "ApiKey";

fn unauthorized() -> ApiError {
    ApiError::unauthorized("unauthorized", "A valid API key is required")
}

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let settings = state.settings().snapshot();
    let Some(token) = settings
        .auth
        .token
        .as_ref()
        .filter(|token| !token.expose().is_empty())
    else {
        warn!("no ingest token has been configured; refusing request");
        return Err(unauthorized());
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.as_bytes())
        .unwrap_or_default();
    let expected = format!("{API_KEY_SCHEME} {}", token.expose());

    if bool::from(presented.ct_eq(expected.as_bytes())) {
        Ok(next.run(request).await)
    } else {
        debug!("rejected request with missing or invalid API key");
        Err(unauthorized())
    }
}
