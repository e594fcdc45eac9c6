//! Topic-keyed pub/sub with non-blocking fan-out.
//!
//! Publishing never waits on a subscriber: each delivery is a `try_send`
//! into a bounded sink, and a sink that keeps coming up full is dropped
//! once its consecutive-failure count crosses the threshold. Dropped
//! notifications are fine; consumers treat every message as "something
//! changed, refresh".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Topic carrying job lifecycle change markers.
pub const JOB_UPDATE_TOPIC: &str = "job.update";

/// Default bound on a subscriber's sink.
const DEFAULT_SINK_CAPACITY: usize = 1;

struct Sink {
    id: u64,
    tx: mpsc::Sender<String>,
    consecutive_fails: AtomicU32,
}

/// Manages topics and subscriptions.
pub struct Broker {
    subscribers: RwLock<HashMap<String, Vec<Arc<Sink>>>>,
    next_id: AtomicU64,
    fail_threshold: u32,
}

/// A registered subscription. Receive with [`Subscription::recv`]; drop or
/// call [`Subscription::unsubscribe`] to deregister.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<String>,
    broker: Arc<Broker>,
}

impl Subscription {
    /// Wait for the next message on this subscription. Returns `None` once
    /// the subscription has been removed from the broker.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Remove this subscription from the broker. Idempotent.
    pub fn unsubscribe(&self) {
        self.broker.remove_sink(&self.topic, self.id);
    }
}

impl Broker {
    pub fn new(fail_threshold: u32) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_threshold,
        }
    }

    /// Register a capacity-1 sink on `topic`.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        self.subscribe_with_capacity(topic, DEFAULT_SINK_CAPACITY)
    }

    /// Register a sink with an explicit channel capacity.
    pub fn subscribe_with_capacity(self: &Arc<Self>, topic: &str, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sink = Arc::new(Sink {
            id,
            tx,
            consecutive_fails: AtomicU32::new(0),
        });

        let mut subs = self.subscribers.write().expect("broker lock poisoned");
        subs.entry(topic.to_string()).or_default().push(sink);
        tracing::debug!(topic, id, "subscribed");

        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            broker: Arc::clone(self),
        }
    }

    /// Deliver `msg` to every sink registered on `topic` without blocking.
    ///
    /// A full sink gets its failure counter bumped; crossing the threshold
    /// removes it. A successful delivery resets the counter.
    pub fn publish(&self, topic: &str, msg: &str) {
        // Snapshot under the read lock, then deliver lock-free
        let sinks: Vec<Arc<Sink>> = {
            let subs = self.subscribers.read().expect("broker lock poisoned");
            match subs.get(topic) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for sink in sinks {
            match sink.tx.try_send(msg.to_string()) {
                Ok(()) => {
                    sink.consecutive_fails.store(0, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    let fails = sink.consecutive_fails.fetch_add(1, Ordering::Relaxed) + 1;
                    if fails >= self.fail_threshold {
                        tracing::warn!(
                            topic,
                            id = sink.id,
                            fails,
                            "dropping unresponsive subscriber"
                        );
                        self.remove_sink(topic, sink.id);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver is gone; no point counting up to the threshold
                    tracing::debug!(topic, id = sink.id, "removing closed subscriber");
                    self.remove_sink(topic, sink.id);
                }
            }
        }
    }

    /// Number of live sinks on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .expect("broker lock poisoned")
            .get(topic)
            .map_or(0, |list| list.len())
    }

    fn remove_sink(&self, topic: &str, id: u64) {
        let mut subs = self.subscribers.write().expect("broker lock poisoned");
        if let Some(list) = subs.get_mut(topic) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subs.remove(topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(3))
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = broker();
        let mut sub = broker.subscribe("job.update");

        broker.publish("job.update", "updated");

        let msg = sub.recv().await.expect("message");
        assert_eq!(msg, "updated");
    }

    #[tokio::test]
    async fn test_publish_unknown_topic_is_noop() {
        let broker = broker();
        broker.publish("nobody.listening", "updated");
        assert_eq!(broker.subscriber_count("nobody.listening"), 0);
    }

    #[tokio::test]
    async fn test_publish_does_not_block_on_full_sink() {
        let broker = broker();
        let _sub = broker.subscribe("job.update");

        // The sink has capacity 1 and is never drained; publish must
        // return immediately every time.
        for _ in 0..10 {
            broker.publish("job.update", "updated");
        }
    }

    #[tokio::test]
    async fn test_undrained_sink_auto_unsubscribed_after_threshold() {
        let broker = broker();
        let _sub = broker.subscribe("job.update");
        assert_eq!(broker.subscriber_count("job.update"), 1);

        // First publish fills the capacity-1 sink; the next three fail,
        // and the third consecutive failure hits the threshold.
        for _ in 0..4 {
            broker.publish("job.update", "updated");
        }
        assert_eq!(broker.subscriber_count("job.update"), 0);

        // A fifth publish has nobody left to deliver to
        broker.publish("job.update", "updated");
        assert_eq!(broker.subscriber_count("job.update"), 0);
    }

    #[tokio::test]
    async fn test_successful_delivery_resets_fail_counter() {
        let broker = broker();
        let mut sub = broker.subscribe("job.update");

        // Fill the sink, fail twice, then drain and deliver again
        broker.publish("job.update", "one");
        broker.publish("job.update", "dropped");
        broker.publish("job.update", "dropped");
        assert_eq!(sub.recv().await.as_deref(), Some("one"));

        broker.publish("job.update", "two");
        assert_eq!(sub.recv().await.as_deref(), Some("two"));

        // Counter was reset, so two more failures stay under the threshold
        broker.publish("job.update", "fill");
        broker.publish("job.update", "dropped");
        broker.publish("job.update", "dropped");
        assert_eq!(broker.subscriber_count("job.update"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broker = broker();
        let sub = broker.subscribe("job.update");
        assert_eq!(broker.subscriber_count("job.update"), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broker.subscriber_count("job.update"), 0);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let broker = broker();
        let mut a = broker.subscribe("topic.a");
        let mut b = broker.subscribe("topic.b");

        broker.publish("topic.a", "for-a");

        assert_eq!(a.recv().await.as_deref(), Some("for-a"));
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_removed_on_publish() {
        let broker = broker();
        let sub = broker.subscribe("job.update");
        drop(sub);

        // Subscription dropped without unsubscribing: the first publish
        // notices the closed channel and cleans up.
        broker.publish("job.update", "updated");
        assert_eq!(broker.subscriber_count("job.update"), 0);
    }
}
