use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RelayResult;
use crate::state::RelayState;
use crate::telemetry::types::{FrameStats, GridSize, SamplePayload};
use crate::telemetry::{parse_message, Channel, PushConnection, Snapshot, NEVER_SEEN_MS};

/// Acknowledgement returned to the device
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// `received`, `calibrated` or `alive`
    pub status: String,
    pub channel: Channel,
    pub timestamp: i64,
    pub data_count: u64,
    pub is_connected: bool,
}

#[derive(Debug, Serialize)]
pub struct PullResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

fn ingest_channel(state: &RelayState, channel: Channel, body: &[u8]) -> RelayResult<IngestResponse> {
    let message = parse_message(channel, body)?;
    let receipt = state.hub.ingest(channel, message)?;

    Ok(IngestResponse {
        status: receipt.kind.status().to_string(),
        channel,
        timestamp: receipt.timestamp,
        data_count: receipt.data_count,
        is_connected: receipt.is_connected,
    })
}

/// POST /api/{channel}/ingest
pub async fn ingest(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
    body: Bytes,
) -> RelayResult<Json<IngestResponse>> {
    let channel: Channel = channel.parse()?;
    ingest_channel(&state, channel, &body).map(Json)
}

/// POST /api/emg/ws
pub async fn ingest_emg_legacy(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> RelayResult<Json<IngestResponse>> {
    ingest_channel(&state, Channel::Emg, &body).map(Json)
}

/// POST /api/thermal/bt
pub async fn ingest_thermal_legacy(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> RelayResult<Json<IngestResponse>> {
    ingest_channel(&state, Channel::Thermal, &body).map(Json)
}

/// GET /api/{channel}/data
pub async fn pull(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
) -> RelayResult<Json<PullResponse>> {
    let channel: Channel = channel.parse()?;
    Ok(Json(PullResponse {
        status: "success",
        snapshot: state.hub.snapshot(channel),
    }))
}

/// Latest thermal frame flattened to the top level, as the Bluetooth
/// bridge's dashboard reads it
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LegacyThermalResponse {
    NoData {
        status: &'static str,
        #[serde(rename = "isConnected")]
        is_connected: bool,
        data: Option<()>,
        #[serde(rename = "timeSinceLastUpdate")]
        time_since_last_update: u64,
    },
    Frame(LegacyThermalFrame),
}

#[derive(Debug, Serialize)]
pub struct LegacyThermalFrame {
    pub status: &'static str,
    pub thermal_data: Vec<Vec<f64>>,
    pub grid_size: GridSize,
    pub sensor_info: serde_json::Value,
    pub stats: FrameStats,
    pub timestamp: i64,
    #[serde(rename = "deviceTimestamp", skip_serializing_if = "Option::is_none")]
    pub device_timestamp: Option<i64>,
    #[serde(rename = "isConnected")]
    pub is_connected: bool,
    #[serde(rename = "timeSinceLastUpdate")]
    pub time_since_last_update: u64,
    #[serde(rename = "lastUpdateTime")]
    pub last_update_time: i64,
}

/// GET /api/thermal/bt
pub async fn pull_thermal_legacy(
    State(state): State<Arc<RelayState>>,
) -> Json<LegacyThermalResponse> {
    let hub = &state.hub;
    let is_connected = hub.is_connected(Channel::Thermal);

    let latest = hub.latest(Channel::Thermal);
    let frame = latest.as_deref().and_then(|sample| match &sample.payload {
        SamplePayload::Thermal(frame) => Some((sample, frame)),
        SamplePayload::Emg(_) => None,
    });

    let Some((sample, frame)) = frame else {
        return Json(LegacyThermalResponse::NoData {
            status: "no_data",
            is_connected,
            data: None,
            time_since_last_update: NEVER_SEEN_MS,
        });
    };

    let elapsed = hub.now_millis().saturating_sub(sample.timestamp).max(0);
    Json(LegacyThermalResponse::Frame(LegacyThermalFrame {
        status: "success",
        thermal_data: frame.thermal_data.clone(),
        grid_size: frame.grid_size,
        sensor_info: frame.sensor_info.clone(),
        stats: frame.stats,
        timestamp: sample.timestamp,
        device_timestamp: sample.device_timestamp,
        is_connected,
        time_since_last_update: u64::try_from(elapsed).unwrap_or(0),
        last_update_time: sample.timestamp,
    }))
}

/// GET /api/{channel}/stream
///
/// Server-sent events: one `initial` message, then `update` per new sample
/// and `heartbeat` on every interval. Messages are unnamed so browser
/// `onmessage` handlers receive them; the JSON `type` field discriminates.
pub async fn stream(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
) -> RelayResult<impl IntoResponse> {
    let channel: Channel = channel.parse()?;
    let connection = PushConnection::open(
        state.hub.clone(),
        channel,
        state.shutdown.child_token(),
        state.config.push_heartbeat_interval(),
    );

    let headers = [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(event_stream(connection))))
}

fn event_stream(mut connection: PushConnection) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = connection.next_event().await {
            match Event::default().json_data(&event) {
                Ok(frame) => {
                    debug!("{} push {} sent", connection.channel(), event.kind());
                    yield Ok(frame);
                }
                Err(e) => warn!("Failed to encode {} event: {}", event.kind(), e),
            }
        }
    }
}
