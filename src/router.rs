use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    health_check, ingest, ingest_emg_legacy, ingest_thermal_legacy, poll_command, post_command,
    pull, pull_thermal_legacy, stream,
};
use crate::state::RelayState;

/// Build the relay router. Devices sit on a trusted local network, so every
/// route is open to any origin.
pub fn create_router(state: Arc<RelayState>) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/{channel}/ingest", post(ingest))
        .route("/api/{channel}/data", get(pull))
        .route("/api/{channel}/stream", get(stream))
        .route("/api/{channel}/command", post(post_command).get(poll_command))
        // Routes used by deployed device firmware
        .route("/api/emg/ws", post(ingest_emg_legacy))
        .route(
            "/api/thermal/bt",
            post(ingest_thermal_legacy).get(pull_thermal_legacy),
        )
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
