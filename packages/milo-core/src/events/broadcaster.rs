//! Per-subscriber fan-out with category-aware backpressure.
//!
//! Each subscriber owns a bounded `mpsc` channel. When that channel is full,
//! the policy depends on the event's category: droppable categories
//! (`plugin`, `volume`) drop the oldest queued event to make room for the
//! new one; non-droppable categories (`system`, `routing`, `dsp`, `podcast`)
//! instead close the subscriber with [`CloseReason::SlowConsumer`], since
//! losing one of those would desynchronize a client's view of the system.
//!
//! `mpsc::Sender` alone can't pop a queued item back out, so the receiving
//! half is kept behind a shared lock (`SubscriberSlot::rx`) that `publish`
//! can also lock to evict the head of the queue before retrying the send.
//!
//! Sequence numbers are drawn from a single counter guarded by a short
//! `parking_lot::Mutex`; the actual send to each subscriber's channel happens
//! outside that lock.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use super::emitter::EventEmitter;
use super::Event;
use crate::constants::SUBSCRIBER_CHANNEL_CAPACITY;
use crate::utils::next_seq;

/// Opaque identifier for one connected subscriber (one WebSocket client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a subscriber's channel was torn down by the broadcaster rather than
/// by the subscriber disconnecting on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A non-droppable event could not be delivered because the subscriber's
    /// queue was full; the subscriber fell too far behind to trust.
    SlowConsumer,
}

/// One registered subscriber: a bounded outgoing channel plus the receiving
/// half, shared with the subscriber's own `recv` loop so `publish` can evict
/// the oldest queued event under backpressure for droppable categories.
struct SubscriberSlot {
    tx: mpsc::Sender<Event>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Event>>>,
}

/// Handle returned to a newly registered subscriber.
pub struct Subscriber {
    pub id: SubscriberId,
    rx: Arc<AsyncMutex<mpsc::Receiver<Event>>>,
}

impl Subscriber {
    /// Receives the next event, or `None` once the broadcaster has dropped
    /// this subscriber.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }
}

/// Central event fan-out. Cheap to clone (wraps `Arc` internals); share one
/// instance across the process.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<DashMap<SubscriberId, SubscriberSlot>>,
    seq: Arc<AtomicU64>,
    seq_lock: Arc<Mutex<()>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
            seq_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Registers a new subscriber and returns its receiving half.
    pub fn subscribe(&self) -> Subscriber {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let rx = Arc::new(AsyncMutex::new(rx));
        self.subscribers.insert(id, SubscriberSlot { tx, rx: Arc::clone(&rx) });
        Subscriber { id, rx }
    }

    /// Removes a subscriber. Safe to call even if it was already closed.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    /// Current number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `event` to every current subscriber, stamping `seq` under
    /// the sequence lock before releasing it for the actual sends.
    pub fn publish(&self, mut event: Event) {
        {
            let _guard = self.seq_lock.lock();
            event.seq = Some(next_seq(&self.seq));
        }

        let droppable = event.category.is_droppable();
        let mut to_close = Vec::new();

        for entry in self.subscribers.iter() {
            let id = *entry.key();
            let slot = entry.value();
            match slot.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    if droppable {
                        // Evict the oldest queued event to make room for this
                        // one. If the subscriber's own recv() holds the lock
                        // concurrently, fall back to dropping this event
                        // instead — still within the droppable contract.
                        if let Ok(mut rx) = slot.rx.try_lock() {
                            let _ = rx.try_recv();
                        }
                        let _ = slot.tx.try_send(ev);
                    } else {
                        tracing::warn!(subscriber = %id, kind = %event.kind, "slow consumer, closing");
                        to_close.push(id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    to_close.push(id);
                }
            }
        }

        for id in to_close {
            self.subscribers.remove(&id);
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Domain services emit through [`EventEmitter`] without knowing the
/// broadcaster exists; every category routes through the same `publish`.
impl EventEmitter for Broadcaster {
    fn emit_plugin(&self, event: Event) {
        self.publish(event);
    }
    fn emit_system(&self, event: Event) {
        self.publish(event);
    }
    fn emit_routing(&self, event: Event) {
        self.publish(event);
    }
    fn emit_volume(&self, event: Event) {
        self.publish(event);
    }
    fn emit_dsp(&self, event: Event) {
        self.publish(event);
    }
    fn emit_podcast(&self, event: Event) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioSource;

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bcast = Broadcaster::new();
        let mut a = bcast.subscribe();
        let mut b = bcast.subscribe();

        bcast.publish(Event::system("system.transition_started", serde_json::json!({})));

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.seq, Some(0));
        assert_eq!(eb.seq, Some(0));
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_per_publish() {
        let bcast = Broadcaster::new();
        let mut sub = bcast.subscribe();

        bcast.publish(Event::system("a", serde_json::json!({})));
        bcast.publish(Event::system("b", serde_json::json!({})));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.seq, Some(0));
        assert_eq!(second.seq, Some(1));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bcast = Broadcaster::new();
        let sub = bcast.subscribe();
        bcast.unsubscribe(sub.id);
        assert_eq!(bcast.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn non_droppable_overflow_closes_slow_consumer() {
        let bcast = Broadcaster::new();
        let sub = bcast.subscribe();

        // Fill the channel without draining it.
        for _ in 0..SUBSCRIBER_CHANNEL_CAPACITY {
            bcast.publish(Event::routing("routing.changed", serde_json::json!({})));
        }
        assert_eq!(bcast.subscriber_count(), 1);

        // One more non-droppable publish should find the channel full and
        // close the subscriber.
        bcast.publish(Event::routing("routing.changed", serde_json::json!({})));
        assert_eq!(bcast.subscriber_count(), 0);
        drop(sub);
    }

    #[tokio::test]
    async fn droppable_overflow_keeps_subscriber_alive() {
        let bcast = Broadcaster::new();
        let sub = bcast.subscribe();

        for _ in 0..SUBSCRIBER_CHANNEL_CAPACITY + 5 {
            bcast.publish(Event::plugin(
                "plugin.state_changed",
                AudioSource::Spotify,
                serde_json::json!({}),
            ));
        }

        assert_eq!(bcast.subscriber_count(), 1);
        drop(sub);
    }

    #[tokio::test]
    async fn droppable_overflow_evicts_oldest_and_keeps_newest() {
        let bcast = Broadcaster::new();
        let mut sub = bcast.subscribe();

        for i in 0..SUBSCRIBER_CHANNEL_CAPACITY + 5 {
            bcast.publish(Event::plugin(
                "plugin.state_changed",
                AudioSource::Spotify,
                serde_json::json!({ "n": i }),
            ));
        }

        let first = sub.recv().await.unwrap();
        assert_ne!(first.data, serde_json::json!({ "n": 0 }));

        let mut last = first;
        while let Ok(next) = sub.rx.try_lock().unwrap().try_recv() {
            last = next;
        }
        assert_eq!(last.data, serde_json::json!({ "n": SUBSCRIBER_CHANNEL_CAPACITY + 4 }));
    }
}
