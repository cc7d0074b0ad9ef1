//! Named mutual exclusion for the cooperating task set.
//!
//! Serializes identical outbound calls (request coalescing), makes library
//! refresh single-flight, and guarantees at-most-one add-then-poll sequence
//! per resolve fingerprint. A lock's hold time is bounded by its TTL: when
//! the TTL expires the held computation is cancelled and the lock released,
//! so a wedged holder cannot block a key forever.
//!
//! Re-entry on the same key from the same task is not supported; callers
//! must not self-recurse.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Acquisition timeout and maximum hold time for one `with_lock` call.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long to wait for the current holder before giving up.
    pub timeout: Duration,
    /// Maximum time the protected computation may hold the lock.
    pub ttl: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ttl: Duration::from_secs(60),
        }
    }
}

/// Outcome of a `with_lock` call.
///
/// `acquired == false` means the timeout elapsed while another holder kept
/// the key; `result` is `None` then, and also when the hold TTL cancelled
/// the computation mid-flight.
#[derive(Debug)]
pub struct LockOutcome<T> {
    pub result: Option<T>,
    pub acquired: bool,
}

/// Process-scoped lock table, shared by handle.
#[derive(Clone, Default)]
pub struct LockManager {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        if self.locks.len() > 4096 {
            // Drop idle slots so the table stays bounded by live keys.
            self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `f` while holding the named lock.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, opts: LockOptions, f: F) -> LockOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(key);
        let Ok(guard) = tokio::time::timeout(opts.timeout, slot.lock_owned()).await else {
            return LockOutcome {
                result: None,
                acquired: false,
            };
        };

        let result = tokio::time::timeout(opts.ttl, f()).await;
        drop(guard);

        if result.is_err() {
            warn!(key, ttl_secs = opts.ttl.as_secs(), "lock hold TTL expired");
        }
        LockOutcome {
            result: result.ok(),
            acquired: true,
        }
    }

    /// Non-blocking single-flight: runs `f` only when the key is free right
    /// now. Returns `None` without running `f` when another holder exists.
    /// This is the form background refreshes use so concurrent stale readers
    /// collapse to one refresh.
    pub async fn try_with_lock<T, F, Fut>(&self, key: &str, ttl: Duration, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(key);
        let Ok(guard) = slot.try_lock_owned() else {
            return None;
        };

        let result = tokio::time::timeout(ttl, f()).await;
        drop(guard);

        if result.is_err() {
            warn!(key, ttl_secs = ttl.as_secs(), "lock hold TTL expired");
        }
        result.ok()
    }

    /// Whether the key is currently held. Diagnostic only; the answer may be
    /// stale the instant it returns.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn mutual_exclusion_serializes_holders() {
        let locks = LockManager::new();
        let concurrent = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock("k", LockOptions::default(), || async {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(outcome.acquired);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquisition_timeout_reports_not_acquired() {
        let locks = LockManager::new();
        let locks2 = locks.clone();

        let holder = tokio::spawn(async move {
            locks2
                .with_lock(
                    "k",
                    LockOptions {
                        timeout: Duration::from_secs(1),
                        ttl: Duration::from_secs(5),
                    },
                    || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    },
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let outcome = locks
            .with_lock(
                "k",
                LockOptions {
                    timeout: Duration::from_millis(30),
                    ttl: Duration::from_secs(5),
                },
                || async { 42 },
            )
            .await;
        assert!(!outcome.acquired);
        assert!(outcome.result.is_none());
        holder.await.unwrap();
    }

    #[tokio::test]
    async fn ttl_cancels_overlong_holder_and_releases() {
        let locks = LockManager::new();
        let outcome = locks
            .with_lock(
                "k",
                LockOptions {
                    timeout: Duration::from_secs(1),
                    ttl: Duration::from_millis(20),
                },
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    1
                },
            )
            .await;
        assert!(outcome.acquired);
        assert!(outcome.result.is_none());

        // Key is free again immediately.
        let next = locks
            .with_lock("k", LockOptions::default(), || async { 2 })
            .await;
        assert_eq!(next.result, Some(2));
    }

    #[tokio::test]
    async fn try_with_lock_is_single_flight() {
        let locks = LockManager::new();
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let locks = locks.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .try_with_lock("refresh", Duration::from_secs(1), || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    })
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = LockManager::new();
        let a = locks.with_lock("a", LockOptions::default(), || async { 1 });
        let b = locks.with_lock("b", LockOptions::default(), || async { 2 });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.result, Some(1));
        assert_eq!(b.result, Some(2));
    }
}
