// Device command mailbox
//
// The dashboard posts a command (start calibration, start recording, ...)
// and the device polls for it. Only the latest command is kept, and it is
// withdrawn once it is older than the retention period. The same endpoint
// carries calibration progress reported by the device while it calibrates.

use serde::Deserialize;

use super::calibration::{Calibration, CalibrationBounds};
use super::ingest::IngestError;

/// How long a posted command stays visible to polling devices
pub const DEFAULT_COMMAND_RETENTION_MS: u64 = 10_000;

/// A command waiting to be picked up by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Upper-cased command word
    pub command: String,
    /// Server time the command was posted
    pub issued_at: i64,
}

#[derive(Debug, Clone)]
pub struct CommandMailbox {
    pending: Option<DeviceCommand>,
    retention_ms: u64,
}

impl CommandMailbox {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            pending: None,
            retention_ms,
        }
    }

    /// Replace any pending command
    pub fn post(&mut self, command: &str, now: i64) -> DeviceCommand {
        let command = DeviceCommand {
            command: command.trim().to_uppercase(),
            issued_at: now,
        };
        self.pending = Some(command.clone());
        command
    }

    /// Pending command, dropping it first if it has outlived the retention
    /// period
    pub fn pending(&mut self, now: i64) -> Option<DeviceCommand> {
        let expired = self.pending.as_ref().is_some_and(|pending| {
            now.saturating_sub(pending.issued_at) > self.retention_ms as i64
        });
        if expired {
            self.pending = None;
        }
        self.pending.clone()
    }
}

/// Calibration progress streamed by the device; missing fields read as 0
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalibrationProgress {
    pub raw_value: f64,
    pub min: f64,
    pub max: f64,
    pub progress: f64,
}

impl CalibrationProgress {
    pub fn into_calibration(self, received_at: i64) -> Calibration {
        Calibration {
            bounds: CalibrationBounds::new(self.min, self.max),
            raw_value: Some(self.raw_value),
            progress: Some(self.progress),
            updated_at: received_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody {
    command: Option<String>,
    calibration_data: Option<CalibrationProgress>,
}

/// A decoded POST to the command endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    /// Dashboard command for the device
    Command(String),
    /// Calibration progress from the device
    Calibration(CalibrationProgress),
}

/// Decode a command endpoint body. Calibration data takes precedence over a
/// command in the same body.
pub fn parse_command(body: &[u8]) -> Result<CommandRequest, IngestError> {
    let body: CommandBody = serde_json::from_slice(body)?;

    if let Some(progress) = body.calibration_data {
        let values = [progress.raw_value, progress.min, progress.max, progress.progress];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(IngestError::InvalidField {
                field: "calibrationData",
                reason: "must contain finite numbers".to_string(),
            });
        }
        return Ok(CommandRequest::Calibration(progress));
    }

    match body.command {
        Some(command) if !command.trim().is_empty() => Ok(CommandRequest::Command(command)),
        _ => Err(IngestError::InvalidField {
            field: "command",
            reason: "Command is required".to_string(),
        }),
    }
}
