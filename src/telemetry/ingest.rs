// Device message parsing and validation
//
// Devices POST a JSON object with a `type` discriminator. Sample fields are
// channel specific, so the body is decoded against the channel named by the
// route. Nothing here touches shared state: a message is either fully
// decoded and validated or rejected.

use super::calibration::{normalize, Calibration, CalibrationBounds};
use super::types::{
    Channel, EmgReading, FrameStats, GridSize, MoveMarker, SamplePayload, ThermalFrame,
};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

/// ESP32 ADC reference voltage
const ADC_REFERENCE_VOLTS: f64 = 3.3;

/// Errors raised while decoding a device message
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl IngestError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        IngestError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Device-supplied time: epoch milliseconds, RFC 3339, or an ISO 8601
/// local time without offset read as UTC
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DeviceTimestamp {
    Millis(f64),
    Text(String),
}

impl DeviceTimestamp {
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            DeviceTimestamp::Millis(ms) if ms.is_finite() => Some(ms.round() as i64),
            DeviceTimestamp::Millis(_) => None,
            DeviceTimestamp::Text(text) => {
                let text = text.trim();
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp_millis())
                    .ok()
                    // Python `datetime.utcnow().isoformat()` carries no offset
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                            .map(|dt| dt.and_utc().timestamp_millis())
                            .ok()
                    })
                    .or_else(|| text.parse::<i64>().ok())
            }
        }
    }
}

/// EMG sample as sent by the MyoWare bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmgSampleMessage {
    pub muscle_activity: f64,
    pub muscle_activity_processed: Option<f64>,
    pub voltage: Option<f64>,
    pub move_marker: Option<MoveMarker>,
    pub timestamp: Option<DeviceTimestamp>,
}

/// Thermal frame as sent by the Raspberry Pi / Bluetooth bridge
#[derive(Debug, Clone, Deserialize)]
pub struct ThermalSampleMessage {
    pub thermal_data: Vec<Vec<f64>>,
    pub grid_size: Option<GridSize>,
    pub sensor_info: Option<serde_json::Value>,
    pub status: Option<String>,
    pub timestamp: Option<DeviceTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationMessage {
    pub min: f64,
    pub max: f64,
    pub raw_value: Option<f64>,
    pub progress: Option<f64>,
    pub timestamp: Option<DeviceTimestamp>,
}

impl CalibrationMessage {
    pub fn into_calibration(self, received_at: i64) -> Calibration {
        Calibration {
            bounds: CalibrationBounds::new(self.min, self.max),
            raw_value: self.raw_value,
            progress: self.progress,
            updated_at: received_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatMessage {
    pub timestamp: Option<DeviceTimestamp>,
}

/// Sample body awaiting calibration-dependent resolution
#[derive(Debug, Clone)]
pub enum SampleInput {
    Emg(EmgSampleMessage),
    Thermal(ThermalSampleMessage),
}

impl SampleInput {
    pub fn channel(&self) -> Channel {
        match self {
            SampleInput::Emg(_) => Channel::Emg,
            SampleInput::Thermal(_) => Channel::Thermal,
        }
    }

    pub fn device_timestamp(&self) -> Option<i64> {
        let timestamp = match self {
            SampleInput::Emg(msg) => msg.timestamp.as_ref(),
            SampleInput::Thermal(msg) => msg.timestamp.as_ref(),
        };
        timestamp.and_then(DeviceTimestamp::to_millis)
    }

    /// Validate and derive the stored payload. EMG readings without a
    /// processed value are normalized against `calibration`, or against
    /// the ADC full scale when the channel has never been calibrated.
    pub fn resolve(
        self,
        calibration: Option<CalibrationBounds>,
    ) -> Result<SamplePayload, IngestError> {
        match self {
            SampleInput::Emg(msg) => resolve_emg(msg, calibration).map(SamplePayload::Emg),
            SampleInput::Thermal(msg) => resolve_thermal(msg).map(SamplePayload::Thermal),
        }
    }
}

fn resolve_emg(
    msg: EmgSampleMessage,
    calibration: Option<CalibrationBounds>,
) -> Result<EmgReading, IngestError> {
    let raw = msg.muscle_activity;
    if !raw.is_finite() {
        return Err(IngestError::invalid("muscleActivity", "must be a finite number"));
    }

    let processed = match msg.muscle_activity_processed {
        Some(value) if value.is_finite() => value.clamp(0.0, 100.0),
        Some(_) => {
            return Err(IngestError::invalid(
                "muscleActivityProcessed",
                "must be a finite number",
            ))
        }
        None => normalize(raw, &calibration.unwrap_or(CalibrationBounds::ADC_FULL_SCALE)),
    };

    let voltage = msg.voltage.unwrap_or_else(|| {
        raw * ADC_REFERENCE_VOLTS / CalibrationBounds::ADC_FULL_SCALE.max
    });

    Ok(EmgReading {
        muscle_activity: raw,
        muscle_activity_processed: processed,
        voltage,
        move_marker: msg.move_marker,
    })
}

fn resolve_thermal(msg: ThermalSampleMessage) -> Result<ThermalFrame, IngestError> {
    let grid = msg.thermal_data;
    let height = grid.len();
    let width = grid.first().map(Vec::len).unwrap_or(0);

    if height == 0 || width == 0 {
        return Err(IngestError::invalid("thermal_data", "grid is empty"));
    }
    if let Some(row) = grid.iter().position(|row| row.len() != width) {
        return Err(IngestError::invalid(
            "thermal_data",
            format!("row {} has {} columns, expected {}", row, grid[row].len(), width),
        ));
    }
    if grid.iter().flatten().any(|value| !value.is_finite()) {
        return Err(IngestError::invalid("thermal_data", "contains non-finite values"));
    }

    let measured = GridSize { width, height };
    if let Some(declared) = msg.grid_size {
        if declared != measured {
            return Err(IngestError::invalid(
                "grid_size",
                format!(
                    "declared {}x{} but data is {}x{}",
                    declared.width, declared.height, width, height
                ),
            ));
        }
    }

    let stats = FrameStats::from_grid(&grid)
        .ok_or_else(|| IngestError::invalid("thermal_data", "grid is empty"))?;

    Ok(ThermalFrame {
        thermal_data: grid,
        grid_size: measured,
        sensor_info: msg.sensor_info.unwrap_or_else(|| {
            serde_json::json!({
                "model": "AMG8833",
                "temperature_unit": "C",
                "data_source": "sensor"
            })
        }),
        status: msg.status.unwrap_or_else(|| "active".to_string()),
        stats,
    })
}

/// A decoded device message
#[derive(Debug, Clone)]
pub enum IngestMessage {
    Sample(SampleInput),
    Calibration(CalibrationMessage),
    Heartbeat(HeartbeatMessage),
}

impl IngestMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestMessage::Sample(_) => "sample",
            IngestMessage::Calibration(_) => "calibration",
            IngestMessage::Heartbeat(_) => "heartbeat",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage<P> {
    #[serde(alias = "emg_data", alias = "thermal_data")]
    Sample(P),
    #[serde(alias = "calibration_data")]
    Calibration(CalibrationMessage),
    Heartbeat(HeartbeatMessage),
}

impl<P> WireMessage<P> {
    fn into_message(self, wrap: impl FnOnce(P) -> SampleInput) -> IngestMessage {
        match self {
            WireMessage::Sample(sample) => IngestMessage::Sample(wrap(sample)),
            WireMessage::Calibration(calibration) => IngestMessage::Calibration(calibration),
            WireMessage::Heartbeat(heartbeat) => IngestMessage::Heartbeat(heartbeat),
        }
    }
}

/// Decode a request body for `channel`
pub fn parse_message(channel: Channel, body: &[u8]) -> Result<IngestMessage, IngestError> {
    let message = match channel {
        Channel::Emg => serde_json::from_slice::<WireMessage<EmgSampleMessage>>(body)?
            .into_message(SampleInput::Emg),
        Channel::Thermal => serde_json::from_slice::<WireMessage<ThermalSampleMessage>>(body)?
            .into_message(SampleInput::Thermal),
    };

    if let IngestMessage::Calibration(calibration) = &message {
        if !calibration.min.is_finite() || !calibration.max.is_finite() {
            return Err(IngestError::invalid("min/max", "must be finite numbers"));
        }
    }

    Ok(message)
}
