use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::calibration::Calibration;

/// Sentinel reported as `timeSinceLastHeartbeat` when a channel has never
/// received anything. Chosen as the largest integer a JavaScript client can
/// represent exactly, so it survives the browser's JSON parser unchanged.
pub const NEVER_SEEN_MS: u64 = 9_007_199_254_740_991;

/// Independent telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// MyoWare muscle activity
    Emg,
    /// AMG8833 thermal camera frames
    Thermal,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Emg, Channel::Thermal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Emg => "emg",
            Channel::Thermal => "thermal",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a path segment names no known channel
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl std::str::FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emg" => Ok(Channel::Emg),
            "thermal" => Ok(Channel::Thermal),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Marker attached to an EMG reading by the exercise UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveMarker {
    /// User pressed Move
    Request,
    /// Movement detected from the signal
    Sensed,
    /// User pressed End Move
    End,
}

/// One stored MyoWare reading
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmgReading {
    /// Raw ADC value (ESP32: 0-4095)
    pub muscle_activity: f64,
    /// Activation in percent (0-100)
    pub muscle_activity_processed: f64,
    /// Sensor output in volts (0-3.3)
    pub voltage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_marker: Option<MoveMarker>,
}

/// Grid dimensions of a thermal frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
}

/// Per-frame temperature statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl FrameStats {
    /// Returns None for an empty grid
    pub fn from_grid(grid: &[Vec<f64>]) -> Option<Self> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in grid.iter().flatten() {
            min = min.min(*value);
            max = max.max(*value);
            sum += value;
            count += 1;
        }

        if count == 0 {
            return None;
        }

        Some(Self {
            min,
            max,
            mean: sum / count as f64,
        })
    }
}

/// One stored thermal camera frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermalFrame {
    /// Row-major temperature grid in degrees Celsius
    pub thermal_data: Vec<Vec<f64>>,
    pub grid_size: GridSize,
    pub sensor_info: serde_json::Value,
    pub status: String,
    pub stats: FrameStats,
}

/// Channel-specific sample body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SamplePayload {
    Emg(EmgReading),
    Thermal(ThermalFrame),
}

impl SamplePayload {
    pub fn channel(&self) -> Channel {
        match self {
            SamplePayload::Emg(_) => Channel::Emg,
            SamplePayload::Thermal(_) => Channel::Thermal,
        }
    }
}

/// A telemetry sample as stored and fanned out
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Server receipt time, milliseconds since the epoch
    pub timestamp: i64,
    /// Whatever the device claimed; advisory only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_timestamp: Option<i64>,
    #[serde(flatten)]
    pub payload: SamplePayload,
}

/// Point-in-time view of a channel, shared by pull and push
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub channel: Channel,
    /// Recent window, oldest first
    pub data: Vec<Arc<Sample>>,
    /// Samples accepted since process start
    pub data_count: u64,
    /// Samples currently held in the buffer
    pub retained_count: usize,
    pub calibration: Option<Calibration>,
    pub is_connected: bool,
    /// Milliseconds since the last sample or heartbeat, NEVER_SEEN_MS if none
    pub time_since_last_heartbeat: u64,
    pub last_heartbeat: Option<i64>,
}
