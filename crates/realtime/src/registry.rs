//! Channel registry and broadcast fan-out.
//!
//! The registry maps channel keys to the set of currently-subscribed
//! queues. Channels are created on first subscribe and pruned when the
//! last subscriber leaves; process restart drops everything and clients
//! reconnect.
//!
//! Concurrency discipline: the channel map sits behind a single mutex;
//! each subscriber owns an unbounded queue, so fan-out never blocks on a
//! slow consumer and one subscriber can never delay delivery to another.

use crate::channel::ChannelKey;
use crate::events::BroadcastEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type ChannelMap = HashMap<ChannelKey, HashMap<u64, mpsc::UnboundedSender<BroadcastEvent>>>;

struct Shared {
    channels: Mutex<ChannelMap>,
    next_subscriber_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelMap> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idempotent removal; prunes the channel entry when it empties so
    /// churn cannot grow the map.
    fn unsubscribe(&self, key: &ChannelKey, subscriber_id: u64) {
        let mut channels = self.lock();
        if let Some(subscribers) = channels.get_mut(key) {
            subscribers.remove(&subscriber_id);
            if subscribers.is_empty() {
                channels.remove(key);
            }
        }
    }
}

/// The transport a task worker uses to push a live alert.
///
/// Task workers never share in-process state with the serving process;
/// they depend on this trait only. In a single-binary deployment the
/// registry itself is the implementation; a multi-process deployment
/// substitutes a transport-backed one.
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to every subscriber of `key` at the time of call.
    /// Zero subscribers is a silent no-op. Returns the delivery count.
    fn broadcast(&self, key: &ChannelKey, event: BroadcastEvent) -> usize;
}

/// Per-process channel registry.
///
/// Created once at startup and injected into the serving state; exposes
/// subscribe and broadcast as its only public surface.
#[derive(Clone)]
pub struct ChannelRegistry {
    shared: Arc<Shared>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                channels: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber queue under `key`.
    ///
    /// The returned [`Subscription`] owns the receiving end; dropping it
    /// unsubscribes exactly once, whatever the exit path.
    pub fn subscribe(&self, key: ChannelKey) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber_id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        self.shared
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(subscriber_id, tx);

        tracing::debug!(channel = %key, subscriber_id, "subscribed");

        Subscription {
            shared: self.shared.clone(),
            key,
            subscriber_id,
            rx,
        }
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.shared.lock().len()
    }

    /// Number of subscribers currently registered under `key`.
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.shared.lock().get(key).map_or(0, HashMap::len)
    }
}

impl Broadcaster for ChannelRegistry {
    fn broadcast(&self, key: &ChannelKey, event: BroadcastEvent) -> usize {
        let channels = self.shared.lock();
        let Some(subscribers) = channels.get(key) else {
            tracing::debug!(channel = %key, "broadcast to empty channel");
            return 0;
        };

        // Snapshot semantics: only queues registered at this moment get
        // the event. A receiver that raced a disconnect is skipped;
        // best-effort delivery never escalates.
        let mut delivered = 0usize;
        for tx in subscribers.values() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        tracing::debug!(channel = %key, delivered, "broadcast");
        delivered
    }
}

/// One subscriber's end of a channel: an unbounded, ordered,
/// single-consumer queue.
pub struct Subscription {
    shared: Arc<Shared>,
    key: ChannelKey,
    subscriber_id: u64,
    rx: mpsc::UnboundedReceiver<BroadcastEvent>,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelKey {
        &self.key
    }

    /// Wait for the next queued event. `None` means the registry side was
    /// torn down.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by tests to drain the queue.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.unsubscribe(&self.key, self.subscriber_id);
        tracing::debug!(channel = %self.key, subscriber_id = self.subscriber_id, "unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_of_the_channel_only() {
        let registry = ChannelRegistry::new();
        let region = Uuid::new_v4();

        let mut region_subs: Vec<Subscription> = (0..3)
            .map(|_| registry.subscribe(ChannelKey::AlertsRegion(region)))
            .collect();
        let mut other_sub = registry.subscribe(ChannelKey::AlertsGlobal);

        let event = BroadcastEvent::secure_message(Uuid::new_v4(), Uuid::new_v4(), "hello");
        let delivered = registry.broadcast(&ChannelKey::AlertsRegion(region), event.clone());
        assert_eq!(delivered, 3);

        for sub in &mut region_subs {
            let received = sub.recv().await.expect("subscriber should receive event");
            assert_eq!(received, event);
            assert!(sub.try_recv().is_none(), "exactly one copy per subscriber");
        }
        assert!(other_sub.try_recv().is_none(), "other channels receive nothing");
    }

    #[tokio::test]
    async fn broadcast_to_empty_channel_is_a_noop() {
        let registry = ChannelRegistry::new();
        let delivered = registry.broadcast(
            &ChannelKey::User(Uuid::new_v4()),
            BroadcastEvent::connected("user:nobody"),
        );
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn churn_leaves_no_registry_entries() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::Doctor(Uuid::new_v4());

        let subs: Vec<Subscription> = (0..10).map(|_| registry.subscribe(key.clone())).collect();
        assert_eq!(registry.subscriber_count(&key), 10);

        // Drop in an arbitrary interleaving with fresh subscribes.
        for (i, sub) in subs.into_iter().enumerate() {
            drop(sub);
            if i % 3 == 0 {
                let extra = registry.subscribe(key.clone());
                drop(extra);
            }
        }

        assert_eq!(registry.subscriber_count(&key), 0);
        assert_eq!(registry.channel_count(), 0, "empty channels are pruned");
    }

    #[tokio::test]
    async fn events_subscribed_after_broadcast_are_not_replayed() {
        let registry = ChannelRegistry::new();
        let key = ChannelKey::AlertsGlobal;

        let mut early = registry.subscribe(key.clone());
        registry.broadcast(&key, BroadcastEvent::connected("alerts:global"));

        let mut late = registry.subscribe(key.clone());
        assert!(early.try_recv().is_some());
        assert!(late.try_recv().is_none(), "no retroactive delivery");
    }
}
