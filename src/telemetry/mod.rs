pub mod calibration;
pub mod clock;
pub mod command;
pub mod connection;
pub mod hub;
pub mod ingest;
pub mod liveness;
pub mod registry;
pub mod store;
pub mod types;

pub use calibration::{normalize, Calibration, CalibrationBounds, CalibrationState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{parse_command, CommandMailbox, CommandRequest, DeviceCommand};
pub use connection::{ConnectionPhase, PushConnection, PushEvent};
pub use hub::{ChannelConfig, HubConfig, IngestKind, IngestReceipt, Subscription, TelemetryHub};
pub use ingest::{parse_message, IngestError, IngestMessage};
pub use liveness::LivenessTracker;
pub use registry::{DispatchReport, SubscriberRegistry, SubscriptionId};
pub use store::SampleStore;
pub use types::{Channel, Sample, SamplePayload, Snapshot, UnknownChannel, NEVER_SEEN_MS};
