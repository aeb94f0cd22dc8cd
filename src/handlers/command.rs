use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::RelayResult;
use crate::state::RelayState;
use crate::telemetry::{parse_command, Calibration, Channel, CommandRequest};

#[derive(Debug, Serialize)]
pub struct CommandPostResponse {
    /// `command_received` or `calibration_data_received`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub timestamp: i64,
}

/// Calibration as the device and the calibration chart poll it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationData {
    pub raw_value: f64,
    pub min: f64,
    pub max: f64,
    pub progress: f64,
    pub timestamp: i64,
}

impl From<Calibration> for CalibrationData {
    fn from(calibration: Calibration) -> Self {
        Self {
            raw_value: calibration.raw_value.unwrap_or(0.0),
            min: calibration.bounds.min,
            max: calibration.bounds.max,
            progress: calibration.progress.unwrap_or(0.0),
            timestamp: calibration.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatusResponse {
    pub command: Option<String>,
    pub timestamp: Option<i64>,
    pub has_command: bool,
    pub calibration_data: Option<CalibrationData>,
}

/// POST /api/{channel}/command
pub async fn post_command(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
    body: Bytes,
) -> RelayResult<Json<CommandPostResponse>> {
    let channel: Channel = channel.parse()?;
    let hub = &state.hub;

    let response = match parse_command(&body)? {
        CommandRequest::Calibration(progress) => {
            let now = hub.now_millis();
            debug!(
                "{} calibration progress {}% (min={}, max={})",
                channel, progress.progress, progress.min, progress.max
            );
            hub.set_calibration(channel, progress.into_calibration(now));
            CommandPostResponse {
                status: "calibration_data_received",
                command: None,
                timestamp: now,
            }
        }
        CommandRequest::Command(command) => {
            let posted = hub.post_command(channel, &command);
            CommandPostResponse {
                status: "command_received",
                command: Some(posted.command),
                timestamp: posted.issued_at,
            }
        }
    };

    Ok(Json(response))
}

/// GET /api/{channel}/command, polled by the device
pub async fn poll_command(
    State(state): State<Arc<RelayState>>,
    Path(channel): Path<String>,
) -> RelayResult<Json<CommandStatusResponse>> {
    let channel: Channel = channel.parse()?;
    let pending = state.hub.pending_command(channel);

    Ok(Json(CommandStatusResponse {
        has_command: pending.is_some(),
        timestamp: pending.as_ref().map(|command| command.issued_at),
        command: pending.map(|command| command.command),
        calibration_data: state.hub.calibration(channel).map(CalibrationData::from),
    }))
}
