/// Infers whether the upstream device is still sending, from the age of
/// the last sample or heartbeat.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    last_event: Option<i64>,
    threshold_ms: u64,
}

impl LivenessTracker {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            last_event: None,
            threshold_ms,
        }
    }

    /// Record activity at `now`
    pub fn touch(&mut self, now: i64) {
        self.last_event = Some(match self.last_event {
            Some(previous) => previous.max(now),
            None => now,
        });
    }

    pub fn last_event(&self) -> Option<i64> {
        self.last_event
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    /// Elapsed milliseconds, None if nothing was ever recorded
    pub fn time_since_last(&self, now: i64) -> Option<u64> {
        self.last_event
            .map(|last| u64::try_from(now.saturating_sub(last)).unwrap_or(0))
    }

    /// Connected against the channel's own threshold
    pub fn is_connected(&self, now: i64) -> bool {
        self.is_connected_within(now, self.threshold_ms)
    }

    pub fn is_connected_within(&self, now: i64, threshold_ms: u64) -> bool {
        match self.time_since_last(now) {
            Some(elapsed) => elapsed < threshold_ms,
            None => false,
        }
    }
}
