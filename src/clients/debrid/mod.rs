//! Debrid service adapters.
//!
//! Each service implements one or both capability sets ([`TorrentCapable`],
//! [`UsenetCapable`]). [`DebridService`] wraps an adapter pair with the
//! library-snapshot and instant-availability caches, so callers above this
//! layer never talk to a raw adapter.

pub mod stremthru;
pub mod torbox;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::lock::{LockManager, LockOptions};
use crate::models::{
    DebridDownload, ErrorKind, InfoHash, InstantAvailability, SourceKind,
};

pub use stremthru::{StremThruClient, StremThruConfig};
pub use torbox::{TorBoxClient, TorBoxConfig};

/// Error classes mapped from service-native failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebridErrorKind {
    Unauthorized,
    StoreLimitExceeded,
    TooManyRequests,
    NotFound,
    NoMatchingFile,
    NotImplemented,
    Unknown,
}

/// A failed debrid operation with the service's raw response attached.
#[derive(Debug, Error)]
#[error("{kind:?} ({status_code} {status_text})")]
pub struct DebridError {
    pub kind: DebridErrorKind,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    #[source]
    pub cause: Option<reqwest::Error>,
}

impl DebridError {
    #[must_use]
    pub fn new(kind: DebridErrorKind, status_code: u16, status_text: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn not_implemented(operation: &str) -> Self {
        Self::new(DebridErrorKind::NotImplemented, 501, operation.to_string())
    }

    #[must_use]
    pub fn no_matching_file() -> Self {
        Self::new(
            DebridErrorKind::NoMatchingFile,
            404,
            "no file in the bundle matches the request",
        )
    }

    /// Maps an HTTP error response onto the taxonomy.
    #[must_use]
    pub fn from_response(status: reqwest::StatusCode, headers: Vec<(String, String)>, body: String) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => DebridErrorKind::Unauthorized,
            402 | 507 => DebridErrorKind::StoreLimitExceeded,
            429 => DebridErrorKind::TooManyRequests,
            404 => DebridErrorKind::NotFound,
            501 => DebridErrorKind::NotImplemented,
            _ => DebridErrorKind::Unknown,
        };
        Self {
            kind,
            status_code: status.as_u16(),
            status_text: status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
            headers,
            body: Some(body),
            cause: None,
        }
    }

    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        Self {
            kind: DebridErrorKind::Unknown,
            status_code: 0,
            status_text: err.to_string(),
            headers: Vec::new(),
            body: None,
            cause: Some(err),
        }
    }

    /// Unauthorized and NotImplemented are never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            DebridErrorKind::Unauthorized | DebridErrorKind::NotImplemented
        )
    }

    /// Projection onto the engine-wide taxonomy.
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self.kind {
            DebridErrorKind::Unauthorized => ErrorKind::Unauthorized,
            DebridErrorKind::StoreLimitExceeded => ErrorKind::StoreLimitExceeded,
            DebridErrorKind::TooManyRequests => ErrorKind::RateLimited,
            DebridErrorKind::NotFound => ErrorKind::NotFound,
            DebridErrorKind::NoMatchingFile => ErrorKind::NoMatchingFile,
            DebridErrorKind::NotImplemented | DebridErrorKind::Unknown => ErrorKind::Internal,
        }
    }
}

/// Operations a torrent-capable service must provide. Pagination clamps are
/// the adapter's own; `page_size`/`max_pages` are upper bounds from config.
#[async_trait]
pub trait TorrentCapable: Send + Sync {
    async fn list_magnets(
        &self,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError>;

    /// Bypasses every cache; one authoritative snapshot with file listings.
    async fn get_magnet(&self, id: &str) -> Result<DebridDownload, DebridError>;

    async fn remove_magnet(&self, id: &str) -> Result<(), DebridError>;

    async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError>;

    /// Adds from a .torrent file URL.
    async fn add_torrent(&self, url: &str) -> Result<DebridDownload, DebridError>;

    /// Instant-availability probe for up to one sub-batch of hashes.
    async fn check_magnets(
        &self,
        hashes: &[InfoHash],
    ) -> Result<Vec<InstantAvailability>, DebridError>;

    async fn generate_torrent_link(
        &self,
        link: &str,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError>;
}

/// Operations a usenet-capable service must provide.
#[async_trait]
pub trait UsenetCapable: Send + Sync {
    async fn list_nzbs(
        &self,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError>;

    async fn get_nzb(&self, id: &str) -> Result<DebridDownload, DebridError>;

    async fn remove_nzb(&self, id: &str) -> Result<(), DebridError>;

    async fn add_nzb(&self, url: &str, name: &str) -> Result<DebridDownload, DebridError>;

    async fn check_nzbs(
        &self,
        hashes: &[InfoHash],
    ) -> Result<Vec<InstantAvailability>, DebridError>;

    async fn generate_usenet_link(
        &self,
        download_id: &str,
        file_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError>;
}

/// Which capability sets a service implements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub torrent: bool,
    pub usenet: bool,
}

/// Largest sub-batch a single availability probe may carry.
const CHECK_BATCH_SIZE: usize = 500;

/// A configured debrid service: tagged adapters plus the caches that make
/// its list/check operations cheap and stampede-safe.
pub struct DebridService {
    id: String,
    short_name: String,
    credential_hash: String,
    torrent: Option<Arc<dyn TorrentCapable>>,
    usenet: Option<Arc<dyn UsenetCapable>>,
    library_cache: Cache<Arc<Vec<DebridDownload>>>,
    check_cache: Cache<InstantAvailability>,
    locks: LockManager,
    engine: EngineConfig,
}

impl DebridService {
    pub fn new(
        id: impl Into<String>,
        short_name: impl Into<String>,
        token: &str,
        torrent: Option<Arc<dyn TorrentCapable>>,
        usenet: Option<Arc<dyn UsenetCapable>>,
        library_cache: Cache<Arc<Vec<DebridDownload>>>,
        check_cache: Cache<InstantAvailability>,
        locks: LockManager,
        engine: EngineConfig,
    ) -> Self {
        Self {
            id: id.into(),
            short_name: short_name.into(),
            credential_hash: credential_hash(token),
            torrent,
            usenet,
            library_cache,
            check_cache,
            locks,
            engine,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Opaque per-credential scope; part of every cache key so two users of
    /// the same service never share snapshots.
    #[must_use]
    pub fn credential_hash(&self) -> &str {
        &self.credential_hash
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            torrent: self.torrent.is_some(),
            usenet: self.usenet.is_some(),
        }
    }

    fn torrent(&self) -> Result<&Arc<dyn TorrentCapable>, DebridError> {
        self.torrent
            .as_ref()
            .ok_or_else(|| DebridError::not_implemented("torrent operations"))
    }

    fn usenet(&self) -> Result<&Arc<dyn UsenetCapable>, DebridError> {
        self.usenet
            .as_ref()
            .ok_or_else(|| DebridError::not_implemented("usenet operations"))
    }

    fn library_key(&self, kind: SourceKind) -> String {
        let tag = match kind {
            SourceKind::Torrent => "magnets",
            SourceKind::Usenet => "nzbs",
        };
        format!("{}|{}|{tag}", self.id, self.credential_hash)
    }

    fn check_key(&self, hash: &InfoHash) -> String {
        format!("{}|{}|check|{hash}", self.id, self.credential_hash)
    }

    fn library_ttl(&self) -> Duration {
        let stale = self.engine.library_stale_threshold_secs;
        Duration::from_secs(self.engine.library_cache_ttl_secs.max(3 * stale).max(86_400))
    }

    async fn fetch_snapshot(
        &self,
        kind: SourceKind,
    ) -> Result<Arc<Vec<DebridDownload>>, DebridError> {
        let page_size = self.engine.library_page_size;
        let max_pages = self.engine.library_page_limit;
        let items = match kind {
            SourceKind::Torrent => self.torrent()?.list_magnets(page_size, max_pages).await?,
            SourceKind::Usenet => self.usenet()?.list_nzbs(page_size, max_pages).await?,
        };
        info!(
            event = "library_snapshot_fetched",
            service = %self.id,
            kind = ?kind,
            items = items.len(),
            "Fetched library snapshot"
        );
        Ok(Arc::new(items))
    }

    /// Library read path with stale-while-revalidate.
    ///
    /// Fresh hit: returned as-is. Stale hit: returned immediately while one
    /// background refresh runs under a refresh lock (concurrent stale readers
    /// collapse onto it). Miss: fetched under the fetch lock so identical
    /// cold misses coalesce; losers of the race re-read the cache.
    pub async fn library_snapshot(
        self: &Arc<Self>,
        kind: SourceKind,
    ) -> Result<Arc<Vec<DebridDownload>>, DebridError> {
        let key = self.library_key(kind);
        let stale_after = Duration::from_secs(self.engine.library_stale_threshold_secs);

        if let Some(hit) = self.library_cache.get_with_age(&key).await {
            if hit.is_stale(stale_after) {
                self.spawn_background_refresh(kind, key.clone());
            }
            return Ok(hit.value);
        }

        let ttl = self.library_ttl();
        let this = Arc::clone(self);
        let fetch_key = format!("library-fetch|{key}");
        let outcome = self
            .locks
            .with_lock(
                &fetch_key,
                LockOptions {
                    timeout: Duration::from_secs(self.engine.max_timeout_secs),
                    ttl: Duration::from_secs(self.engine.max_timeout_secs),
                },
                || async move {
                    if let Some(hit) = this.library_cache.get_with_age(&key).await {
                        return Ok(hit.value);
                    }
                    let snapshot = this.fetch_snapshot(kind).await?;
                    this.library_cache
                        .insert(key.clone(), snapshot.clone(), ttl)
                        .await;
                    Ok(snapshot)
                },
            )
            .await;

        match outcome.result {
            Some(result) => result,
            // Lost the lock race past its timeout; whoever held it has
            // either populated the cache or failed. Fall through to the
            // cached value when present.
            None => {
                let key = self.library_key(kind);
                if let Some(hit) = self.library_cache.get_with_age(&key).await {
                    return Ok(hit.value);
                }
                Err(DebridError::new(
                    DebridErrorKind::Unknown,
                    0,
                    "library fetch lock contention",
                ))
            }
        }
    }

    fn spawn_background_refresh(self: &Arc<Self>, kind: SourceKind, key: String) {
        let this = Arc::clone(self);
        let refresh_key = format!("library-refresh|{key}");
        let hold = Duration::from_secs(self.engine.max_timeout_secs);
        let stale_after = Duration::from_secs(self.engine.library_stale_threshold_secs);
        tokio::spawn(async move {
            let ttl = this.library_ttl();
            let ran = this
                .locks
                .try_with_lock(&refresh_key, hold, || async {
                    // Another refresh may have landed between the stale read
                    // and this lock acquisition.
                    if let Some(hit) = this.library_cache.get_with_age(&key).await
                        && !hit.is_stale(stale_after)
                    {
                        return;
                    }
                    match this.fetch_snapshot(kind).await {
                        Ok(snapshot) => {
                            this.library_cache.insert(key.clone(), snapshot, ttl).await;
                        }
                        Err(err) => {
                            // Stale data outlives a failed refresh on purpose.
                            warn!(
                                service = %this.id,
                                error = %err,
                                "background library refresh failed"
                            );
                        }
                    }
                })
                .await;
            if ran.is_none() {
                debug!(key = %refresh_key, "refresh already in flight, skipped");
            }
        });
    }

    /// Invalidates the `{service, credential}` snapshots and fetches fresh.
    pub async fn refresh_library_cache(self: &Arc<Self>) -> Result<(), DebridError> {
        self.library_cache
            .invalidate_prefix(&format!("{}|{}", self.id, self.credential_hash));
        let caps = self.capabilities();
        if caps.torrent {
            self.library_snapshot(SourceKind::Torrent).await?;
        }
        if caps.usenet {
            self.library_snapshot(SourceKind::Usenet).await?;
        }
        Ok(())
    }

    /// Instant-availability probe, batched and cached per hash.
    ///
    /// Zero hashes never issues a network call. When `check_owned`, positive
    /// and negative results alike are cross-referenced against the library
    /// snapshot and owned hashes are flagged (and forced available).
    pub async fn check_cached(
        self: &Arc<Self>,
        kind: SourceKind,
        hashes: &[InfoHash],
        check_owned: bool,
    ) -> Result<HashMap<InfoHash, InstantAvailability>, DebridError> {
        let mut results: HashMap<InfoHash, InstantAvailability> = HashMap::new();
        if hashes.is_empty() {
            return Ok(results);
        }

        let mut misses: Vec<InfoHash> = Vec::new();
        for hash in hashes {
            if let Some(hit) = self.check_cache.get(&self.check_key(hash)).await {
                results.insert(hash.clone(), hit);
            } else if !misses.contains(hash) {
                misses.push(hash.clone());
            }
        }

        if !misses.is_empty() {
            let batches: Vec<&[InfoHash]> = misses.chunks(CHECK_BATCH_SIZE).collect();
            let futures = batches.into_iter().map(|batch| async move {
                let probe = || async {
                    match kind {
                        SourceKind::Torrent => self.torrent()?.check_magnets(batch).await,
                        SourceKind::Usenet => self.usenet()?.check_nzbs(batch).await,
                    }
                };
                match probe().await {
                    // Rate limits get one backed-off retry before failing.
                    Err(err) if err.kind == DebridErrorKind::TooManyRequests => {
                        debug!(service = %self.id, "availability probe rate-limited, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        probe().await
                    }
                    other => other,
                }
            });
            let ttl = Duration::from_secs(self.engine.instant_availability_cache_ttl_secs);
            for outcome in join_all(futures).await {
                let batch_results = outcome?;
                for availability in batch_results {
                    self.check_cache
                        .insert(
                            self.check_key(&availability.hash),
                            availability.clone(),
                            ttl,
                        )
                        .await;
                    results.insert(availability.hash.clone(), availability);
                }
            }
        }

        if check_owned && let Ok(snapshot) = self.library_snapshot(kind).await {
            for item in snapshot.iter() {
                if let Some(hash) = &item.hash
                    && let Some(entry) = results.get_mut(hash)
                {
                    entry.library = true;
                    entry.cached = true;
                }
            }
        }

        Ok(results)
    }

    /// Drops the availability entry for a hash the service claims not to
    /// know after all (NOT_FOUND on a known-cached hash).
    pub async fn invalidate_check(&self, hash: &InfoHash) {
        self.check_cache.remove(&self.check_key(hash)).await;
    }

    pub async fn get_item(
        &self,
        kind: SourceKind,
        id: &str,
    ) -> Result<DebridDownload, DebridError> {
        match kind {
            SourceKind::Torrent => self.torrent()?.get_magnet(id).await,
            SourceKind::Usenet => self.usenet()?.get_nzb(id).await,
        }
    }

    pub async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError> {
        self.torrent()?.add_magnet(magnet).await
    }

    pub async fn add_torrent(&self, url: &str) -> Result<DebridDownload, DebridError> {
        self.torrent()?.add_torrent(url).await
    }

    pub async fn add_nzb(&self, url: &str, name: &str) -> Result<DebridDownload, DebridError> {
        self.usenet()?.add_nzb(url, name).await
    }

    pub async fn remove_item(&self, kind: SourceKind, id: &str) -> Result<(), DebridError> {
        match kind {
            SourceKind::Torrent => self.torrent()?.remove_magnet(id).await,
            SourceKind::Usenet => self.usenet()?.remove_nzb(id).await,
        }
    }

    pub async fn generate_torrent_link(
        &self,
        link: &str,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        self.torrent()?.generate_torrent_link(link, client_ip).await
    }

    pub async fn generate_usenet_link(
        &self,
        download_id: &str,
        file_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        self.usenet()?
            .generate_usenet_link(download_id, file_id, client_ip)
            .await
    }
}

impl std::fmt::Debug for DebridService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebridService")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

/// Hex-encoded digest of a credential, used to scope cache keys per user
/// without ever storing the raw token in a key.
#[must_use]
pub fn credential_hash(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let hex = format!("{:x}", Sha256::digest(token.as_bytes()));
    hex[..16].to_string()
}
