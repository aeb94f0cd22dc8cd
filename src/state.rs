use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::telemetry::{Clock, SystemClock, TelemetryHub};

/// Relay state shared across all handlers
pub struct RelayState {
    pub config: RelayConfig,
    pub hub: Arc<TelemetryHub>,
    /// Cancelled on shutdown; push connections hold child tokens
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        let hub = Arc::new(TelemetryHub::new(config.hub_config(), clock));

        Self {
            config,
            hub,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
