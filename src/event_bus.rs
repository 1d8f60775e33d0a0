//! In-process topic publish/subscribe for detections and diagnostics.
//!
//! Each subscription gets its own bounded queue and overflow policy,
//! fixed for its lifetime, mirroring the teacher's
//! `BroadcastChannelManager` (one channel per concern, subscribe
//! returns an independent receiver) but per-subscription bounded
//! instead of one shared broadcast, since subscriptions here need
//! individually configurable backpressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::model::{Detection, SourceId};

pub const TOPIC_DETECTION: &str = "detection";
pub const TOPIC_SOURCE_STATE: &str = "source.state";
pub const TOPIC_PROCESSOR_DROPPED: &str = "processor.dropped";
pub const TOPIC_BUFFER_OVERFLOW: &str = "buffer.overflow";

#[derive(Debug, Clone)]
pub enum BusEvent {
    Detection(Detection),
    SourceState { source_id: SourceId, state: String, cause: Option<String> },
    ProcessorDropped { source_id: SourceId, reason: String },
    BufferOverflow { source_id: SourceId, samples_dropped: u64 },
}

/// Fixed for a subscription's whole life, per the EventBus contract.
#[derive(Debug, Clone, Copy)]
pub enum OverflowPolicy {
    /// Drop the incoming event if the subscriber's queue is full.
    DropNewest,
    /// Wait up to the given deadline for room, then drop.
    BlockWithDeadline(Duration),
}

struct Subscription {
    id: u64,
    tx: mpsc::Sender<BusEvent>,
    policy: OverflowPolicy,
}

pub struct Subscriber {
    pub receiver: mpsc::Receiver<BusEvent>,
    topic: &'static str,
    id: u64,
}

pub struct EventBus {
    topics: Mutex<HashMap<&'static str, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }

    pub fn subscribe(&self, topic: &'static str, buffer_size: usize, policy: OverflowPolicy) -> Subscriber {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics.lock().unwrap().entry(topic).or_default().push(Subscription { id, tx, policy });
        Subscriber { receiver: rx, topic, id }
    }

    /// Idempotent: unsubscribing an already-removed or unknown
    /// subscription is a no-op.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        if let Some(subs) = self.topics.lock().unwrap().get_mut(subscriber.topic) {
            subs.retain(|s| s.id != subscriber.id);
        }
    }

    /// Never blocks the publisher beyond each subscription's own
    /// configured policy; a `BlockWithDeadline` subscriber that misses
    /// its deadline simply drops the event rather than stalling others.
    pub async fn publish(&self, topic: &'static str, event: BusEvent) {
        let targets: Vec<(mpsc::Sender<BusEvent>, OverflowPolicy)> = {
            let topics = self.topics.lock().unwrap();
            match topics.get(topic) {
                Some(subs) => subs.iter().map(|s| (s.tx.clone(), s.policy)).collect(),
                None => return,
            }
        };

        for (tx, policy) in targets {
            match policy {
                OverflowPolicy::DropNewest => {
                    let _ = tx.try_send(event.clone());
                }
                OverflowPolicy::BlockWithDeadline(deadline) => {
                    let _ = tokio::time::timeout(deadline, tx.send(event.clone())).await;
                }
            }
        }
    }
}
