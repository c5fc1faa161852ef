// =============================================================================
// Subscriber Registry: thread-safe set of downstream connections
// =============================================================================
//
// add / remove / deliver_to_all all go through one async mutex. A delivery pass
// holds the lock while it writes, so the set never changes under the
// iteration; subscribers added meanwhile simply wait for the next bar.
//
// A failed or timed-out write is taken as proof the connection is dead: the
// subscriber is pruned in the same pass and never retried. Pruned connections
// are closed on their own tasks after the lock is released.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound half of a subscriber connection.
pub trait Subscriber: Send + 'static {
    /// Write one serialised bar.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Best-effort close after the subscriber has been pruned.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Identity of a registered subscriber.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
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

/// Outcome of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub pruned: usize,
}

pub struct SubscriberRegistry<S> {
    subscribers: Mutex<HashMap<SubscriberId, S>>,
    write_timeout: Duration,
}

impl<S: Subscriber> SubscriberRegistry<S> {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Register a subscriber. Returns `false` (keeping the existing entry) if
    /// `id` is already registered.
    pub async fn add(&self, id: SubscriberId, subscriber: S) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, subscriber);
        info!(subscriber = %id, total = subscribers.len(), "subscriber registered");
        true
    }

    /// Unregister a subscriber. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().await.remove(&id).is_some();
        if removed {
            info!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().await.contains_key(&id)
    }

    /// Write `payload` to every registered subscriber, pruning the ones whose
    /// write fails.
    pub async fn deliver_to_all(&self, payload: &str) -> DeliveryReport {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, subscriber) in subscribers.iter_mut() {
            match timeout(self.write_timeout, subscriber.send_text(payload.to_owned())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscriber = %id, error = %e, "subscriber write failed; pruning");
                    dead.push(*id);
                }
                Err(_) => {
                    warn!(
                        subscriber = %id,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "subscriber write timed out; pruning"
                    );
                    dead.push(*id);
                }
            }
        }

        let pruned: Vec<_> = dead
            .iter()
            .filter_map(|id| subscribers.remove(id).map(|s| (*id, s)))
            .collect();
        drop(subscribers);

        for (id, mut subscriber) in pruned {
            let close_timeout = self.write_timeout;
            tokio::spawn(async move {
                if timeout(close_timeout, subscriber.close()).await.is_err() {
                    debug!(subscriber = %id, "close of pruned subscriber timed out");
                }
            });
        }

        DeliveryReport {
            delivered,
            pruned: dead.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::testing::RecordingSubscriber;
    use super::*;

    fn registry() -> SubscriberRegistry<RecordingSubscriber> {
        SubscriberRegistry::new(Duration::from_secs(5))
    }

    async fn wait_closed(subscriber: &RecordingSubscriber) -> bool {
        for _ in 0..16 {
            if subscriber.was_closed() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        subscriber.was_closed()
    }

    #[tokio::test]
    async fn failed_write_prunes_only_that_subscriber() {
        let reg = registry();
        let a = RecordingSubscriber::broken();
        let b = RecordingSubscriber::default();
        let (id_a, id_b) = (SubscriberId::new(), SubscriberId::new());
        reg.add(id_a, a.clone()).await;
        reg.add(id_b, b.clone()).await;

        let payload = r#"{"symbol":"y","open":1.0,"high":1.0,"low":1.0,"close":1.0}"#;
        let report = reg.deliver_to_all(payload).await;

        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert_eq!(reg.len().await, 1);
        assert!(!reg.contains(id_a).await);
        assert!(reg.contains(id_b).await);
        assert_eq!(b.messages(), vec![payload.to_string()]);
        assert!(wait_closed(&a).await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_close_does_not_hold_the_registry() {
        let reg = registry();
        let healthy = RecordingSubscriber::default();
        reg.add(SubscriberId::new(), RecordingSubscriber::wedged()).await;
        reg.add(SubscriberId::new(), healthy.clone()).await;

        let started = tokio::time::Instant::now();
        let report = reg.deliver_to_all("first").await;
        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert_eq!(started.elapsed(), Duration::ZERO);

        // The pruned close is still pending, yet the registry serves callers.
        let late_id = SubscriberId::new();
        assert!(reg.add(late_id, RecordingSubscriber::default()).await);
        assert_eq!(reg.len().await, 2);
        reg.deliver_to_all("second").await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(healthy.messages(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn add_is_idempotent_per_id() {
        let reg = registry();
        let id = SubscriberId::new();
        let first = RecordingSubscriber::default();
        let second = RecordingSubscriber::default();

        assert!(reg.add(id, first.clone()).await);
        assert!(!reg.add(id, second.clone()).await);
        assert_eq!(reg.len().await, 1);

        reg.deliver_to_all("bar").await;
        assert_eq!(first.messages(), vec!["bar".to_string()]);
        assert!(second.messages().is_empty());
    }

    #[tokio::test]
    async fn remove_twice_is_a_no_op() {
        let reg = registry();
        let id = SubscriberId::new();
        reg.add(id, RecordingSubscriber::default()).await;

        assert!(reg.remove(id).await);
        assert!(!reg.remove(id).await);
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test]
    async fn empty_registry_delivers_nothing() {
        let reg = registry();
        assert_eq!(reg.deliver_to_all("bar").await, DeliveryReport::default());
    }

    #[tokio::test]
    async fn late_subscriber_only_sees_later_bars() {
        let reg = registry();
        let early = RecordingSubscriber::default();
        let late = RecordingSubscriber::default();
        reg.add(SubscriberId::new(), early.clone()).await;

        reg.deliver_to_all("first").await;
        reg.add(SubscriberId::new(), late.clone()).await;
        reg.deliver_to_all("second").await;

        assert_eq!(early.messages(), vec!["first", "second"]);
        assert_eq!(late.messages(), vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_is_pruned() {
        let reg = registry();
        let healthy = RecordingSubscriber::default();
        let stalled_id = SubscriberId::new();
        reg.add(stalled_id, RecordingSubscriber::stalled()).await;
        reg.add(SubscriberId::new(), healthy.clone()).await;

        let report = reg.deliver_to_all("bar").await;

        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert!(!reg.contains(stalled_id).await);
        assert_eq!(healthy.messages(), vec!["bar".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_add_remove_during_delivery() {
        use std::sync::Arc;

        let reg = Arc::new(registry());
        let mut ids = Vec::new();
        for _ in 0..50 {
            let id = SubscriberId::new();
            reg.add(id, RecordingSubscriber::default()).await;
            ids.push(id);
        }

        let deliver = {
            let reg = reg.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    reg.deliver_to_all(&format!("bar-{i}")).await;
                }
            })
        };
        let churn = {
            let reg = reg.clone();
            tokio::spawn(async move {
                for id in ids.iter().take(25) {
                    reg.remove(*id).await;
                    reg.add(SubscriberId::new(), RecordingSubscriber::default()).await;
                }
            })
        };

        deliver.await.unwrap();
        churn.await.unwrap();
        assert_eq!(reg.len().await, 50);
    }
}
