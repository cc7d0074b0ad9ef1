//! Keyed TTL store with stale-tolerance metadata.
//!
//! Each named namespace is an independent [`moka`] cache with its own size
//! cap. Entries carry their insertion time and configured TTL so readers can
//! ask "how stale is this?" and drive stale-while-revalidate without the
//! store itself knowing about refresh policy. All operations are
//! non-throwing.

use moka::Expiry;
use moka::future::Cache as MokaCache;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Duration,
}

struct PerEntryExpiry;

impl<T> Expiry<String, Entry<T>> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry<T>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<T>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// A cache hit together with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    pub value: T,
    pub age: Duration,
    pub ttl: Duration,
}

impl<T> CachedValue<T> {
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age)
    }

    /// Stale iff the entry's age exceeds the threshold.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age > threshold
    }
}

/// One named TTL namespace.
#[derive(Clone)]
pub struct Cache<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    inner: MokaCache<String, Entry<T>>,
}

impl<T: Clone + Send + Sync + 'static> Cache<T> {
    #[must_use]
    pub fn new(name: &'static str, max_capacity: u64) -> Self {
        Self {
            name,
            inner: MokaCache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryExpiry)
                .support_invalidation_closures()
                .build(),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.get_with_age(key).await.map(|hit| hit.value)
    }

    /// Like [`Self::get`] but exposes age/TTL so callers can decide on
    /// stale-while-revalidate. Entries past their TTL are treated as absent
    /// even if eviction has not run yet.
    pub async fn get_with_age(&self, key: &str) -> Option<CachedValue<T>> {
        let entry = self.inner.get(key).await?;
        let age = entry.inserted_at.elapsed();
        if age >= entry.ttl {
            self.inner.invalidate(key).await;
            return None;
        }
        Some(CachedValue {
            value: entry.value,
            age,
            ttl: entry.ttl,
        })
    }

    /// Remaining time to live. `None` for a missing key.
    pub async fn get_ttl(&self, key: &str) -> Option<Duration> {
        self.get_with_age(key).await.map(|hit| hit.remaining_ttl())
    }

    pub async fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        self.inner
            .insert(
                key.into(),
                Entry {
                    value,
                    inserted_at: Instant::now(),
                    ttl,
                },
            )
            .await;
    }

    pub async fn remove(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Drops every entry in the namespace.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Invalidates every key with the given prefix. Used to scope
    /// invalidation to one `{service, credential}` slice of a namespace.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let prefix = prefix.to_string();
        // invalidate_entries_if only fails when the predicate support was
        // disabled at build time, which it is not here.
        let _ = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix));
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_inserted_value() {
        let cache: Cache<String> = Cache::new("test", 100);
        cache
            .insert("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn ttl_is_non_increasing_between_writes() {
        let cache: Cache<u32> = Cache::new("test", 100);
        cache.insert("k", 1, Duration::from_secs(60)).await;
        let first = cache.get_ttl("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = cache.get_ttl("k").await.unwrap();
        assert!(second <= first);
    }

    #[tokio::test]
    async fn expired_entries_are_absent() {
        let cache: Cache<u32> = Cache::new("test", 100);
        cache.insert("k", 1, Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.get_ttl("k").await, None);
    }

    #[tokio::test]
    async fn staleness_is_age_based() {
        let cache: Cache<u32> = Cache::new("test", 100);
        cache.insert("k", 1, Duration::from_secs(60)).await;
        let hit = cache.get_with_age("k").await.unwrap();
        assert!(!hit.is_stale(Duration::from_secs(1)));
        assert!(hit.is_stale(Duration::ZERO));
    }

    #[tokio::test]
    async fn overwrite_resets_age() {
        let cache: Cache<u32> = Cache::new("test", 100);
        cache.insert("k", 1, Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.insert("k", 2, Duration::from_millis(50)).await;
        let hit = cache.get_with_age("k").await.unwrap();
        assert_eq!(hit.value, 2);
        assert!(hit.age < Duration::from_millis(30));
    }

    #[tokio::test]
    async fn prefix_invalidation_only_hits_prefix() {
        let cache: Cache<u32> = Cache::new("test", 100);
        cache.insert("svc1|a", 1, Duration::from_secs(60)).await;
        cache.insert("svc2|a", 2, Duration::from_secs(60)).await;
        cache.invalidate_prefix("svc1|");
        // moka applies predicate invalidation lazily; reads observe it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("svc1|a").await, None);
        assert_eq!(cache.get("svc2|a").await, Some(2));
    }
}
