//! Single-flight, TTL'd cache for resolved workloads, per SPEC_FULL.md
//! §4.1 and the §9 redesign note ("adopt a single-flight coalescer that
//! returns the current in-flight future for a key").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use siphon_protocol::{Workload, WorkloadRef};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A cached lookup result: either a resolved workload or the error the
/// last attempt to resolve it produced. Errors are cached too (e.g.
/// `NoOwnerWorkload` for a pod that genuinely has no supported owner) so
/// a hot-looping caller doesn't hammer the API server.
#[derive(Clone)]
enum CachedOutcome {
    Ok(Workload),
    Err(Arc<String>),
}

struct Entry {
    outcome: CachedOutcome,
    cached_at: Instant,
}

/// Per-key slot. Holding the inner `AsyncMutex` for the duration of a
/// fetch is what coalesces concurrent readers: the first one in performs
/// the fetch and populates `entry`; everyone else blocks on the same
/// mutex and then observes the fresh value instead of issuing their own
/// request.
struct Slot {
    entry: AsyncMutex<Option<Entry>>,
}

pub struct WorkloadCache {
    max_age: Duration,
    slots: std::sync::Mutex<HashMap<WorkloadRef, Arc<Slot>>>,
}

impl WorkloadCache {
    pub fn new(max_age: Duration) -> Self {
        WorkloadCache {
            max_age,
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &WorkloadRef) -> Arc<Slot> {
        let mut slots = self.slots.lock().expect("workload cache lock poisoned");
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Slot {
                    entry: AsyncMutex::new(None),
                })
            })
            .clone()
    }

    /// Returns the cached workload for `key`, refreshing it via `fetch`
    /// if the entry is absent or older than `max_age`. Concurrent callers
    /// for the same key coalesce onto one in-flight `fetch`.
    pub async fn get_or_fetch<F, Fut>(&self, key: &WorkloadRef, fetch: F) -> Result<Workload, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Workload, Error>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.entry.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.cached_at.elapsed() <= self.max_age {
                return match &entry.outcome {
                    CachedOutcome::Ok(workload) => Ok(workload.clone()),
                    CachedOutcome::Err(err) => Err(Error::Cached(err.clone())),
                };
            }
        }

        let result = fetch().await;
        let outcome = match &result {
            Ok(workload) => CachedOutcome::Ok(workload.clone()),
            Err(err) => CachedOutcome::Err(Arc::new(err.to_string())),
        };
        *guard = Some(Entry {
            outcome,
            cached_at: Instant::now(),
        });

        result
    }

    /// Removes entries older than `5 * max_age`. Intended to be driven by
    /// a periodic background task (see [`WorkloadCache::spawn_sweeper`]),
    /// not called inline from request handling.
    pub fn sweep(&self) {
        let horizon = self.max_age * 5;
        let mut slots = self.slots.lock().expect("workload cache lock poisoned");
        slots.retain(|_, slot| match slot.entry.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|entry| entry.cached_at.elapsed() <= horizon)
                .unwrap_or(true),
            // A fetch is in flight for this key right now; keep the slot.
            Err(_) => true,
        });
    }

    /// Spawns a background task that calls [`WorkloadCache::sweep`] every
    /// `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => cache.sweep(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_protocol::{WorkloadKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> WorkloadRef {
        WorkloadRef {
            name: "web".into(),
            namespace: "default".into(),
        }
    }

    fn fake_workload() -> Workload {
        Workload {
            reference: key(),
            kind: WorkloadKind::Deployment,
            generation: 1,
            containers: vec![],
            pod_labels: Default::default(),
            annotations: Default::default(),
        }
    }

    #[tokio::test]
    async fn caches_successful_fetch() {
        let cache = WorkloadCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let workload = cache
                .get_or_fetch(&key(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(fake_workload()) }
                })
                .await
                .unwrap();
            assert_eq!(workload.reference, key());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_max_age() {
        let cache = WorkloadCache::new(Duration::from_millis(10));
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch(&key(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(fake_workload()) }
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        cache
            .get_or_fetch(&key(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(fake_workload()) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_onto_one_fetch() {
        let cache = Arc::new(WorkloadCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(fake_workload())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sweep_removes_entries_past_five_times_max_age() {
        let cache = WorkloadCache::new(Duration::from_millis(1));
        {
            let mut slots = cache.slots.lock().unwrap();
            slots.insert(
                key(),
                Arc::new(Slot {
                    entry: AsyncMutex::new(Some(Entry {
                        outcome: CachedOutcome::Ok(fake_workload()),
                        cached_at: Instant::now() - Duration::from_millis(10),
                    })),
                }),
            );
        }
        cache.sweep();
        assert!(cache.slots.lock().unwrap().is_empty());
    }
}
