use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{Channel, Sample};

/// Opaque handle for one push subscriber
pub type SubscriptionId = Uuid;

/// Outcome of fanning one sample out to every subscriber
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Queued for delivery
    pub delivered: usize,
    /// Subscriber queue full, sample skipped for that subscriber
    pub lagged: usize,
    /// Subscriber gone, removed from the registry
    pub removed: usize,
}

/// In-memory registry of push subscribers for one channel.
///
/// Every subscriber owns a bounded queue. Dispatch never waits: a full
/// queue skips the sample for that subscriber only, and a closed queue
/// removes the subscriber.
#[derive(Clone)]
pub struct SubscriberRegistry {
    channel: Channel,
    subscribers: Arc<RwLock<HashMap<SubscriptionId, mpsc::Sender<Arc<Sample>>>>>,
}

impl SubscriberRegistry {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a sender and return its handle
    pub fn add(&self, sender: mpsc::Sender<Arc<Sample>>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, sender);
        debug!("{} subscriber {} registered", self.channel, id);
        id
    }

    /// Returns false if the handle was already gone
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        let removed = self.subscribers.write().remove(id).is_some();
        if removed {
            debug!("{} subscriber {} removed", self.channel, id);
        }
        removed
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.subscribers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Queue `sample` for every subscriber without blocking
    pub fn dispatch(&self, sample: &Arc<Sample>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let channel = self.channel;

        self.subscribers.write().retain(|id, sender| {
            match sender.try_send(sample.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("{} subscriber {} lagging, sample skipped", channel, id);
                    report.lagged += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("{} subscriber {} closed, removing", channel, id);
                    report.removed += 1;
                    false
                }
            }
        });

        report
    }
}
