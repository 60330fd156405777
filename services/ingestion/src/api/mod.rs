//! HTTP API handlers and routing.

mod auth;
pub mod error;
mod health;
mod ingest;

use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::post,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use auth::API_KEY_SCHEME;

use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Create the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let ingest = Router::new()
        .route("/ingest", post(ingest::ingest))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        // Health endpoints (no auth required)
        .merge(health::routes())
        .merge(ingest)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
