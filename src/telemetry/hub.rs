// Process-wide telemetry service
//
// One TelemetryHub is built at startup and handed to every handler. Each
// channel owns its sample store, liveness tracker and calibration behind a
// single lock, plus a subscriber registry. Appending a sample dispatches it
// to subscribers while the channel lock is held, so a subscriber's initial
// snapshot and the updates that follow it never overlap or leave gaps.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::calibration::{Calibration, CalibrationBounds, CalibrationState};
use super::clock::{Clock, SystemClock};
use super::command::{CommandMailbox, DeviceCommand, DEFAULT_COMMAND_RETENTION_MS};
use super::ingest::{IngestError, IngestMessage};
use super::liveness::LivenessTracker;
use super::registry::{DispatchReport, SubscriberRegistry, SubscriptionId};
use super::store::SampleStore;
use super::types::{Channel, Sample, SamplePayload, Snapshot, NEVER_SEEN_MS};

/// Per-channel buffer and liveness settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum retained samples
    pub capacity: usize,
    /// Samples included in snapshots
    pub recent_window: usize,
    /// Liveness threshold
    pub connection_timeout_ms: u64,
    /// Age-based eviction, None to keep samples until the cap pushes them out
    pub max_sample_age_ms: Option<u64>,
}

impl ChannelConfig {
    pub fn emg_default() -> Self {
        Self {
            capacity: 1000,
            recent_window: 50,
            connection_timeout_ms: 10_000,
            max_sample_age_ms: Some(120_000),
        }
    }

    pub fn thermal_default() -> Self {
        Self {
            capacity: 120,
            recent_window: 1,
            connection_timeout_ms: 30_000,
            max_sample_age_ms: Some(120_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub emg: ChannelConfig,
    pub thermal: ChannelConfig,
    /// Updates buffered per push subscriber before samples are skipped
    pub subscriber_queue_capacity: usize,
    /// How long a posted device command stays pending
    pub command_retention_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            emg: ChannelConfig::emg_default(),
            thermal: ChannelConfig::thermal_default(),
            subscriber_queue_capacity: 256,
            command_retention_ms: DEFAULT_COMMAND_RETENTION_MS,
        }
    }
}

/// What an ingested message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestKind {
    Sample,
    Calibration,
    Heartbeat,
}

impl IngestKind {
    /// Status string reported back to the device
    pub fn status(&self) -> &'static str {
        match self {
            IngestKind::Sample => "received",
            IngestKind::Calibration => "calibrated",
            IngestKind::Heartbeat => "alive",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub channel: Channel,
    pub kind: IngestKind,
    /// Server time assigned to the message
    pub timestamp: i64,
    pub data_count: u64,
    pub is_connected: bool,
    pub dispatch: DispatchReport,
}

struct ChannelState {
    store: SampleStore,
    liveness: LivenessTracker,
    calibration: CalibrationState,
    commands: CommandMailbox,
}

struct ChannelHub {
    channel: Channel,
    config: ChannelConfig,
    state: RwLock<ChannelState>,
    subscribers: SubscriberRegistry,
}

impl ChannelHub {
    fn new(channel: Channel, mut config: ChannelConfig, command_retention_ms: u64) -> Self {
        config.capacity = config.capacity.max(1);
        config.recent_window = config.recent_window.min(config.capacity);

        Self {
            channel,
            state: RwLock::new(ChannelState {
                store: SampleStore::new(config.capacity, config.max_sample_age_ms),
                liveness: LivenessTracker::new(config.connection_timeout_ms),
                calibration: CalibrationState::default(),
                commands: CommandMailbox::new(command_retention_ms),
            }),
            subscribers: SubscriberRegistry::new(channel),
            config,
        }
    }

    fn snapshot_of(&self, state: &ChannelState, now: i64) -> Snapshot {
        let since = state.liveness.time_since_last(now);
        Snapshot {
            channel: self.channel,
            data: state.store.recent_window(self.config.recent_window),
            data_count: state.store.total_count(),
            retained_count: state.store.len(),
            calibration: state.calibration.get().cloned(),
            is_connected: state.liveness.is_connected(now),
            time_since_last_heartbeat: since.map_or(NEVER_SEEN_MS, |ms| ms.min(NEVER_SEEN_MS)),
            last_heartbeat: state.liveness.last_event(),
        }
    }
}

/// Live subscription to one channel's new samples.
///
/// Dropping it deregisters it from the channel.
pub struct Subscription {
    id: SubscriptionId,
    channel: Channel,
    receiver: mpsc::Receiver<Arc<Sample>>,
    registry: SubscriberRegistry,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next sample in append order. None once the subscription has been
    /// removed from the registry.
    pub async fn recv(&mut self) -> Option<Arc<Sample>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Sample>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

pub struct TelemetryHub {
    emg: ChannelHub,
    thermal: ChannelHub,
    clock: Arc<dyn Clock>,
    subscriber_queue_capacity: usize,
}

impl TelemetryHub {
    pub fn new(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            emg: ChannelHub::new(Channel::Emg, config.emg, config.command_retention_ms),
            thermal: ChannelHub::new(Channel::Thermal, config.thermal, config.command_retention_ms),
            clock,
            subscriber_queue_capacity: config.subscriber_queue_capacity.max(1),
        }
    }

    pub fn with_system_clock(config: HubConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    fn hub(&self, channel: Channel) -> &ChannelHub {
        match channel {
            Channel::Emg => &self.emg,
            Channel::Thermal => &self.thermal,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn channel_config(&self, channel: Channel) -> &ChannelConfig {
        &self.hub(channel).config
    }

    /// Apply a decoded device message. Validation happens before any state
    /// is touched, so a rejected message changes nothing.
    pub fn ingest(
        &self,
        channel: Channel,
        message: IngestMessage,
    ) -> Result<IngestReceipt, IngestError> {
        match message {
            IngestMessage::Sample(input) => {
                if input.channel() != channel {
                    return Err(IngestError::InvalidField {
                        field: "type",
                        reason: format!(
                            "{} sample sent to the {} channel",
                            input.channel(),
                            channel
                        ),
                    });
                }

                let device_timestamp = input.device_timestamp();
                let payload = input.resolve(self.calibration_bounds(channel))?;
                let (sample, dispatch) = self.append(channel, payload, device_timestamp);
                Ok(self.receipt(channel, IngestKind::Sample, sample.timestamp, dispatch))
            }
            IngestMessage::Calibration(message) => {
                let now = self.clock.now_millis();
                let calibration = message.into_calibration(now);
                info!(
                    "{} calibration updated: min={}, max={}",
                    channel, calibration.bounds.min, calibration.bounds.max
                );
                if calibration.bounds.is_degenerate() {
                    warn!("{} calibration is degenerate, readings will normalize to 0", channel);
                }
                self.set_calibration(channel, calibration);
                Ok(self.receipt(channel, IngestKind::Calibration, now, DispatchReport::default()))
            }
            IngestMessage::Heartbeat(_) => {
                let now = self.heartbeat(channel);
                Ok(self.receipt(channel, IngestKind::Heartbeat, now, DispatchReport::default()))
            }
        }
    }

    fn receipt(
        &self,
        channel: Channel,
        kind: IngestKind,
        timestamp: i64,
        dispatch: DispatchReport,
    ) -> IngestReceipt {
        let hub = self.hub(channel);
        let state = hub.state.read();
        IngestReceipt {
            channel,
            kind,
            timestamp,
            data_count: state.store.total_count(),
            is_connected: state.liveness.is_connected(self.clock.now_millis()),
            dispatch,
        }
    }

    /// Stamp, store and fan out a sample. Liveness is touched with the
    /// stored timestamp.
    pub fn append(
        &self,
        channel: Channel,
        payload: SamplePayload,
        device_timestamp: Option<i64>,
    ) -> (Arc<Sample>, DispatchReport) {
        let hub = self.hub(channel);
        let mut state = hub.state.write();

        let sample = state.store.append(Sample {
            timestamp: self.clock.now_millis(),
            device_timestamp,
            payload,
        });
        state.liveness.touch(sample.timestamp);
        let dispatch = hub.subscribers.dispatch(&sample);

        debug!(
            "{} sample stored at {} (total {}, delivered {}, lagged {})",
            channel,
            sample.timestamp,
            state.store.total_count(),
            dispatch.delivered,
            dispatch.lagged
        );

        (sample, dispatch)
    }

    /// Record device activity without a sample; returns the time recorded
    pub fn heartbeat(&self, channel: Channel) -> i64 {
        let now = self.clock.now_millis();
        self.hub(channel).state.write().liveness.touch(now);
        debug!("{} heartbeat at {}", channel, now);
        now
    }

    /// Replace the channel's calibration. Counts as device activity.
    pub fn set_calibration(&self, channel: Channel, calibration: Calibration) {
        let mut state = self.hub(channel).state.write();
        state.liveness.touch(calibration.updated_at);
        state.calibration.set(calibration);
    }

    pub fn calibration(&self, channel: Channel) -> Option<Calibration> {
        self.hub(channel).state.read().calibration.get().cloned()
    }

    pub fn calibration_bounds(&self, channel: Channel) -> Option<CalibrationBounds> {
        self.hub(channel).state.read().calibration.bounds()
    }

    pub fn snapshot(&self, channel: Channel) -> Snapshot {
        let hub = self.hub(channel);
        let state = hub.state.read();
        hub.snapshot_of(&state, self.clock.now_millis())
    }

    pub fn recent_window(&self, channel: Channel, n: usize) -> Vec<Arc<Sample>> {
        self.hub(channel).state.read().store.recent_window(n)
    }

    pub fn total_count(&self, channel: Channel) -> u64 {
        self.hub(channel).state.read().store.total_count()
    }

    pub fn retained_count(&self, channel: Channel) -> usize {
        self.hub(channel).state.read().store.len()
    }

    pub fn evicted_count(&self, channel: Channel) -> u64 {
        self.hub(channel).state.read().store.evicted_count()
    }

    /// Most recently stored sample
    pub fn latest(&self, channel: Channel) -> Option<Arc<Sample>> {
        self.hub(channel).state.read().store.latest()
    }

    pub fn is_connected(&self, channel: Channel) -> bool {
        let now = self.clock.now_millis();
        self.hub(channel).state.read().liveness.is_connected(now)
    }

    pub fn is_connected_within(&self, channel: Channel, threshold_ms: u64) -> bool {
        let now = self.clock.now_millis();
        self.hub(channel)
            .state
            .read()
            .liveness
            .is_connected_within(now, threshold_ms)
    }

    /// Milliseconds since the last event, None if the channel never heard
    /// from its device
    pub fn time_since_last(&self, channel: Channel) -> Option<u64> {
        let now = self.clock.now_millis();
        self.hub(channel).state.read().liveness.time_since_last(now)
    }

    /// Queue a command for the channel's device, replacing any pending one
    pub fn post_command(&self, channel: Channel, command: &str) -> DeviceCommand {
        let now = self.clock.now_millis();
        let posted = self.hub(channel).state.write().commands.post(command, now);
        info!("{} command queued: {}", channel, posted.command);
        posted
    }

    /// Command the device has not yet outlived, if any
    pub fn pending_command(&self, channel: Channel) -> Option<DeviceCommand> {
        let now = self.clock.now_millis();
        self.hub(channel).state.write().commands.pending(now)
    }

    /// Register a subscriber and capture its initial snapshot atomically
    /// with respect to appends.
    pub fn subscribe(&self, channel: Channel) -> (Snapshot, Subscription) {
        let hub = self.hub(channel);
        let (sender, receiver) = mpsc::channel(self.subscriber_queue_capacity);

        let state = hub.state.read();
        let snapshot = hub.snapshot_of(&state, self.clock.now_millis());
        let id = hub.subscribers.add(sender);
        drop(state);

        let subscription = Subscription {
            id,
            channel,
            receiver,
            registry: hub.subscribers.clone(),
        };
        (snapshot, subscription)
    }

    /// Force-remove a subscriber; its stream ends after draining
    pub fn unsubscribe(&self, channel: Channel, id: &SubscriptionId) -> bool {
        self.hub(channel).subscribers.remove(id)
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.hub(channel).subscribers.len()
    }

    /// Compare each channel's connection flag against `previous`, update
    /// it, and return the channels that changed.
    pub fn liveness_changes(&self, previous: &mut HashMap<Channel, bool>) -> Vec<(Channel, bool)> {
        Channel::ALL
            .into_iter()
            .filter_map(|channel| {
                let connected = self.is_connected(channel);
                let was = previous.insert(channel, connected).unwrap_or(false);
                (was != connected).then_some((channel, connected))
            })
            .collect()
    }

    /// Periodically log connect/disconnect transitions until `shutdown`
    pub fn spawn_liveness_monitor(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            let mut previous = HashMap::new();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        for (channel, connected) in self.liveness_changes(&mut previous) {
                            if connected {
                                info!("📶 {} device connected", channel);
                            } else {
                                let since = self.time_since_last(channel).unwrap_or(NEVER_SEEN_MS);
                                warn!("{} device silent for {} ms, marked disconnected", channel, since);
                            }
                        }
                    }
                }
            }

            debug!("Liveness monitor stopped");
        })
    }
}
