use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::RelayState;
use crate::telemetry::Channel;

/// Per-channel summary in the health report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    pub channel: Channel,
    pub is_connected: bool,
    pub data_count: u64,
    pub retained_count: usize,
    pub evicted_count: u64,
    pub subscribers: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub channels: Vec<ChannelHealth>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<RelayState>>) -> (StatusCode, Json<HealthResponse>) {
    let channels = Channel::ALL
        .into_iter()
        .map(|channel| ChannelHealth {
            channel,
            is_connected: state.hub.is_connected(channel),
            data_count: state.hub.total_count(channel),
            retained_count: state.hub.retained_count(channel),
            evicted_count: state.hub.evicted_count(channel),
            subscribers: state.hub.subscriber_count(channel),
        })
        .collect();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        channels,
    };

    (StatusCode::OK, Json(response))
}
