// Push connection lifecycle
//
// OPEN -> STREAMING -> CLOSED. Opening captures the initial snapshot and
// registers the subscription in one step. While streaming, the connection
// wakes on a new sample, a heartbeat tick, or cancellation. Closing is
// idempotent: the subscription is released exactly once and nothing is
// produced afterwards.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::hub::{Subscription, TelemetryHub};
use super::registry::SubscriptionId;
use super::types::{Channel, Sample, Snapshot};

/// Message pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// First message on every connection
    Initial {
        #[serde(flatten)]
        snapshot: Snapshot,
    },
    /// A new sample was appended
    Update {
        #[serde(rename = "newData")]
        new_data: Arc<Sample>,
        #[serde(flatten)]
        snapshot: Snapshot,
    },
    /// Periodic keep-alive carrying the current status
    Heartbeat {
        #[serde(flatten)]
        snapshot: Snapshot,
    },
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Initial { .. } => "initial",
            PushEvent::Update { .. } => "update",
            PushEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        match self {
            PushEvent::Initial { snapshot }
            | PushEvent::Update { snapshot, .. }
            | PushEvent::Heartbeat { snapshot } => snapshot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Open,
    Streaming,
    Closed,
}

enum Wake {
    Cancelled,
    Sample(Option<Arc<Sample>>),
    Tick,
}

pub struct PushConnection {
    hub: Arc<TelemetryHub>,
    channel: Channel,
    phase: ConnectionPhase,
    initial: Option<Snapshot>,
    subscription: Option<Subscription>,
    heartbeat: Interval,
    cancel: CancellationToken,
}

impl PushConnection {
    /// Must be called from within a tokio runtime
    pub fn open(
        hub: Arc<TelemetryHub>,
        channel: Channel,
        cancel: CancellationToken,
        heartbeat_period: Duration,
    ) -> Self {
        let period = heartbeat_period.max(Duration::from_millis(1));
        let mut heartbeat = time::interval_at(time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (initial, subscription) = hub.subscribe(channel);
        info!(
            "📡 {} push connection {} opened ({} subscribers)",
            channel,
            subscription.id(),
            hub.subscriber_count(channel)
        );

        Self {
            hub,
            channel,
            phase: ConnectionPhase::Open,
            initial: Some(initial),
            subscription: Some(subscription),
            heartbeat,
            cancel,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Wait for the next event to push. Returns None once the connection is
    /// closed, whether by cancellation, deregistration or `close`.
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        if self.phase == ConnectionPhase::Closed {
            return None;
        }

        if let Some(snapshot) = self.initial.take() {
            self.phase = ConnectionPhase::Streaming;
            return Some(PushEvent::Initial { snapshot });
        }

        let wake = {
            let subscription = self.subscription.as_mut()?;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                sample = subscription.recv() => Wake::Sample(sample),
                _ = self.heartbeat.tick() => Wake::Tick,
            }
        };

        match wake {
            Wake::Sample(Some(new_data)) => Some(PushEvent::Update {
                new_data,
                snapshot: self.hub.snapshot(self.channel),
            }),
            Wake::Tick => Some(PushEvent::Heartbeat {
                snapshot: self.hub.snapshot(self.channel),
            }),
            Wake::Cancelled | Wake::Sample(None) => {
                self.close();
                None
            }
        }
    }

    /// Release the subscription. Returns true only for the call that
    /// actually closed the connection.
    pub fn close(&mut self) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }
        self.phase = ConnectionPhase::Closed;
        self.initial = None;

        if let Some(subscription) = self.subscription.take() {
            let id = subscription.id();
            drop(subscription);
            info!(
                "📡 {} push connection {} closed ({} subscribers)",
                self.channel,
                id,
                self.hub.subscriber_count(self.channel)
            );
        }
        true
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::clock::ManualClock;
    use crate::telemetry::hub::HubConfig;
    use crate::telemetry::types::{EmgReading, SamplePayload};
    use tokio_test::{assert_pending, assert_ready};

    const HEARTBEAT: Duration = Duration::from_secs(5);

    fn emg(raw: f64) -> SamplePayload {
        SamplePayload::Emg(EmgReading {
            muscle_activity: raw,
            muscle_activity_processed: 0.0,
            voltage: 0.0,
            move_marker: None,
        })
    }

    fn setup() -> (Arc<ManualClock>, Arc<TelemetryHub>) {
        let clock = Arc::new(ManualClock::new(100));
        let hub = Arc::new(TelemetryHub::new(HubConfig::default(), clock.clone()));
        (clock, hub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_precedes_updates() {
        let (clock, hub) = setup();
        hub.append(Channel::Emg, emg(1.0), None);

        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        assert_eq!(connection.phase(), ConnectionPhase::Open);

        // appended before the initial event is read, still delivered after it
        clock.set(200);
        hub.append(Channel::Emg, emg(2.0), None);

        let first = connection.next_event().await.unwrap();
        assert_eq!(first.kind(), "initial");
        assert_eq!(first.snapshot().data_count, 1);
        assert_eq!(connection.phase(), ConnectionPhase::Streaming);

        match connection.next_event().await.unwrap() {
            PushEvent::Update { new_data, snapshot } => {
                assert_eq!(new_data.timestamp, 200);
                assert_eq!(snapshot.data_count, 2);
            }
            other => panic!("expected update, got {}", other.kind()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_update_disconnect() {
        let (clock, hub) = setup();
        hub.append(Channel::Emg, emg(1.0), None);

        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        assert_eq!(connection.next_event().await.unwrap().snapshot().data_count, 1);

        clock.set(200);
        hub.append(Channel::Emg, emg(2.0), None);
        match connection.next_event().await.unwrap() {
            PushEvent::Update { new_data, snapshot } => {
                assert_eq!(new_data.timestamp, 200);
                assert_eq!(snapshot.data_count, 2);
            }
            other => panic!("expected update, got {}", other.kind()),
        }

        connection.close();
        clock.set(300);
        hub.append(Channel::Emg, emg(3.0), None);

        assert_eq!(hub.snapshot(Channel::Emg).data_count, 3);
        assert!(connection.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_matches_pull() {
        let (_, hub) = setup();
        hub.append(Channel::Emg, emg(1.0), None);
        hub.heartbeat(Channel::Emg);

        let pulled = hub.snapshot(Channel::Emg);
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);

        let initial = connection.next_event().await.unwrap();
        assert_eq!(initial.snapshot(), &pulled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_when_idle() {
        let (_, hub) = setup();
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Thermal, CancellationToken::new(), HEARTBEAT);
        connection.next_event().await.unwrap();

        let mut idle = tokio_test::task::spawn(connection.next_event());
        assert_pending!(idle.poll());

        time::advance(HEARTBEAT).await;
        let event = assert_ready!(idle.poll()).unwrap();
        assert_eq!(event.kind(), "heartbeat");
        assert!(!event.snapshot().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_final() {
        let (_, hub) = setup();
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        connection.next_event().await.unwrap();
        assert_eq!(hub.subscriber_count(Channel::Emg), 1);

        assert!(connection.close());
        assert!(!connection.close());
        assert_eq!(connection.phase(), ConnectionPhase::Closed);
        assert_eq!(hub.subscriber_count(Channel::Emg), 0);

        let (_, report) = hub.append(Channel::Emg, emg(3.0), None);
        assert_eq!(report.delivered, 0);
        assert!(connection.next_event().await.is_none());
        assert!(connection.subscription_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_initial_sends_nothing() {
        let (_, hub) = setup();
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);

        connection.close();
        assert!(connection.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_closes() {
        let (_, hub) = setup();
        let shutdown = CancellationToken::new();
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, shutdown.child_token(), HEARTBEAT);
        connection.next_event().await.unwrap();

        shutdown.cancel();
        assert!(connection.next_event().await.is_none());
        assert_eq!(connection.phase(), ConnectionPhase::Closed);
        assert_eq!(hub.subscriber_count(Channel::Emg), 0);
        assert!(!connection.close());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_unsubscribe_ends_stream() {
        let (_, hub) = setup();
        let mut connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        connection.next_event().await.unwrap();

        let id = connection.subscription_id().unwrap();
        assert!(hub.unsubscribe(Channel::Emg, &id));
        assert!(connection.next_event().await.is_none());
        assert_eq!(connection.phase(), ConnectionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_deregisters() {
        let (_, hub) = setup();
        let connection =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        assert_eq!(hub.subscriber_count(Channel::Emg), 1);

        drop(connection);
        assert_eq!(hub.subscriber_count(Channel::Emg), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_subscribers_same_order() {
        let (clock, hub) = setup();
        let mut first =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        let mut second =
            PushConnection::open(hub.clone(), Channel::Emg, CancellationToken::new(), HEARTBEAT);
        first.next_event().await.unwrap();
        second.next_event().await.unwrap();

        for ts in [300, 400, 500] {
            clock.set(ts);
            hub.append(Channel::Emg, emg(ts as f64), None);
        }

        for connection in [&mut first, &mut second] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                match connection.next_event().await.unwrap() {
                    PushEvent::Update { new_data, .. } => seen.push(new_data.timestamp),
                    other => panic!("expected update, got {}", other.kind()),
                }
            }
            assert_eq!(seen, vec![300, 400, 500]);
        }
    }

    #[test]
    fn test_event_json_shape() {
        let clock = Arc::new(ManualClock::new(100));
        let hub = TelemetryHub::new(HubConfig::default(), clock);
        let (sample, _) = hub.append(Channel::Emg, emg(7.0), None);

        let event = PushEvent::Update {
            new_data: sample,
            snapshot: hub.snapshot(Channel::Emg),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "update");
        assert_eq!(json["newData"]["muscleActivity"], 7.0);
        assert_eq!(json["dataCount"], 1);
        assert_eq!(json["isConnected"], true);
        assert_eq!(json["timeSinceLastHeartbeat"], 0);
    }
}
