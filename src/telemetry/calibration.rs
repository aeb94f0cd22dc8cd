use serde::Serialize;

/// Raw reading range captured during sensor calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBounds {
    pub min: f64,
    pub max: f64,
}

impl CalibrationBounds {
    /// Full scale of the ESP32 12-bit ADC, used before any calibration
    pub const ADC_FULL_SCALE: CalibrationBounds = CalibrationBounds {
        min: 0.0,
        max: 4095.0,
    };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.max > self.min) || !self.min.is_finite() || !self.max.is_finite()
    }

    pub fn normalize(&self, raw: f64) -> f64 {
        normalize(raw, self)
    }
}

/// Most recent calibration received for a channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    #[serde(flatten)]
    pub bounds: CalibrationBounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<f64>,
    /// Calibration routine progress in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub updated_at: i64,
}

/// Holds the latest calibration; each update replaces the previous one
#[derive(Debug, Clone, Default)]
pub struct CalibrationState {
    current: Option<Calibration>,
}

impl CalibrationState {
    pub fn set(&mut self, calibration: Calibration) {
        self.current = Some(calibration);
    }

    pub fn get(&self) -> Option<&Calibration> {
        self.current.as_ref()
    }

    pub fn bounds(&self) -> Option<CalibrationBounds> {
        self.current.as_ref().map(|c| c.bounds)
    }
}

/// Map `raw` into 0..=100 percent of the calibrated range.
///
/// Degenerate bounds (max <= min) and non-finite input yield 0.
pub fn normalize(raw: f64, bounds: &CalibrationBounds) -> f64 {
    if bounds.is_degenerate() || !raw.is_finite() {
        return 0.0;
    }

    let percent = (raw - bounds.min) / (bounds.max - bounds.min) * 100.0;
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}
