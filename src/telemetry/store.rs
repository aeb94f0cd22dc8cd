// Bounded sample buffer for a single channel
//
// Arrival order is storage order. The buffer is capped by count and,
// optionally, by age relative to the newest sample; the oldest samples go
// first. A running total tracks everything ever accepted so callers can
// tell "data seen" apart from "data retained".

use super::types::Sample;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct SampleStore {
    samples: VecDeque<Arc<Sample>>,
    capacity: usize,
    max_age_ms: Option<i64>,
    total_appended: u64,
    total_evicted: u64,
}

impl SampleStore {
    /// `capacity` below 1 is treated as 1
    pub fn new(capacity: usize, max_age_ms: Option<u64>) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            max_age_ms: max_age_ms
                .filter(|age| *age > 0)
                .map(|age| i64::try_from(age).unwrap_or(i64::MAX)),
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Append at the tail and evict from the head until within bounds.
    ///
    /// A timestamp earlier than the current tail is raised to the tail's
    /// timestamp so the stored sequence never goes backwards, even if the
    /// wall clock does.
    pub fn append(&mut self, mut sample: Sample) -> Arc<Sample> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }

        let newest = sample.timestamp;
        let sample = Arc::new(sample);
        self.samples.push_back(sample.clone());
        self.total_appended += 1;

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            self.total_evicted += 1;
        }

        if let Some(max_age) = self.max_age_ms {
            let cutoff = newest.saturating_sub(max_age);
            while self
                .samples
                .front()
                .is_some_and(|oldest| oldest.timestamp < cutoff)
            {
                self.samples.pop_front();
                self.total_evicted += 1;
            }
        }

        sample
    }

    /// Last `n` samples, oldest first
    pub fn recent_window(&self, n: usize) -> Vec<Arc<Sample>> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Samples accepted since the store was created
    pub fn total_count(&self) -> u64 {
        self.total_appended
    }

    /// Samples dropped by the count cap or the age limit
    pub fn evicted_count(&self) -> u64 {
        self.total_evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<Arc<Sample>> {
        self.samples.back().cloned()
    }
}
