//! Watch fan-out, per SPEC_FULL.md §4.4 "Watches": each subscriber owns a
//! single-slot notification channel where a pending signal is idempotent.
//! [`tokio::sync::Notify`] already has exactly this coalescing behavior
//! for `notify_one`, so it is the channel, not a home-grown flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// One subscriber's handle into a [`WatchSet`]. Dropping it does not
/// unsubscribe automatically -- callers own the unsubscribe lifecycle
/// explicitly (matching the `unsubscribe` verb in the Session Manager's
/// contract), typically from the gRPC stream's cancellation path.
pub struct Subscription {
    id: u64,
    notify: Arc<Notify>,
}

impl Subscription {
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub struct WatchSet {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Arc<Notify>>>,
    revision: AtomicU64,
}

impl Default for WatchSet {
    fn default() -> Self {
        WatchSet {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let notify = Arc::new(Notify::new());
        self.subscribers
            .lock()
            .expect("watch set lock poisoned")
            .insert(id, Arc::clone(&notify));
        Subscription { id, notify }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.subscribers
            .lock()
            .expect("watch set lock poisoned")
            .remove(&subscription.id);
    }

    /// Fans a pending-change signal out to every current subscriber and
    /// advances the revision counter snapshots are stamped with.
    pub fn notify_all(&self) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        for notify in self.subscribers.lock().expect("watch set lock poisoned").values() {
            notify.notify_one();
        }
        revision
    }

    pub fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn notify_all_wakes_every_subscriber() {
        let set = WatchSet::new();
        let a = set.subscribe();
        let b = set.subscribe();

        set.notify_all();

        tokio::time::timeout(Duration::from_millis(50), a.notified())
            .await
            .expect("a should have been notified");
        tokio::time::timeout(Duration::from_millis(50), b.notified())
            .await
            .expect("b should have been notified");
    }

    #[tokio::test]
    async fn repeated_notifications_coalesce_into_one_pending_wake() {
        let set = WatchSet::new();
        let sub = set.subscribe();

        set.notify_all();
        set.notify_all();
        set.notify_all();

        sub.notified().await;
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sub.notified())
                .await
                .is_err(),
            "a single permit should have been consumed by the first await"
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_notifications() {
        let set = WatchSet::new();
        let sub = set.subscribe();
        set.unsubscribe(&sub);
        set.notify_all();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sub.notified())
                .await
                .is_err()
        );
    }
}
