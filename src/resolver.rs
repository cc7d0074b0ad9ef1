//! Lazy playback-URL generation.
//!
//! A stream entry carries an opaque handle; dereferencing it lands here. The
//! whole add-then-poll-then-link sequence runs under a lock keyed on the
//! full resolve fingerprint, so identical concurrent resolves collapse to
//! one service-side add and share the minted URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::clients::debrid::{DebridError, DebridErrorKind, DebridService};
use crate::config::EngineConfig;
use crate::lock::{LockManager, LockOptions};
use crate::models::{DebridDownload, DownloadStatus, PlaybackInfo, SourceKind};
use crate::selector::{self, EpisodeTarget, SelectionHints};

/// How long a "not yet cached" answer sticks around.
const NEGATIVE_TTL: Duration = Duration::from_secs(60);

/// Cache-and-play polling: every ~11 s, at most 10 iterations (~110 s).
const POLL_INTERVAL: Duration = Duration::from_secs(11);
const POLL_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("the item failed on the service side")]
    ItemErrored,

    #[error(transparent)]
    Debrid(#[from] DebridError),

    #[error("resolve contention: another resolve holds this fingerprint")]
    Contention,
}

impl ResolveError {
    /// Whether the failure should surface as a visible info-stream rather
    /// than an HTTP error (the default policy).
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::ItemErrored
                | Self::Debrid(DebridError {
                    kind: DebridErrorKind::NoMatchingFile | DebridErrorKind::StoreLimitExceeded,
                    ..
                })
        )
    }
}

pub struct PlaybackResolver {
    services: HashMap<String, Arc<DebridService>>,
    link_cache: Cache<Option<String>>,
    locks: LockManager,
    engine: EngineConfig,
}

impl PlaybackResolver {
    #[must_use]
    pub fn new(
        services: HashMap<String, Arc<DebridService>>,
        link_cache: Cache<Option<String>>,
        locks: LockManager,
        engine: EngineConfig,
    ) -> Self {
        Self {
            services,
            link_cache,
            locks,
            engine,
        }
    }

    /// Resolves a playback URL. `Ok(None)` means "not cached yet" (the
    /// caller renders a download-started notice); with `cache_and_play` the
    /// resolver instead waits for the download within a bounded window.
    pub async fn resolve(
        &self,
        info: &PlaybackInfo,
        filename: Option<&str>,
        cache_and_play: bool,
        auto_remove_downloads: bool,
    ) -> Result<Option<String>, ResolveError> {
        let service = self
            .services
            .get(&info.service_id)
            .ok_or_else(|| ResolveError::UnknownService(info.service_id.clone()))?;

        let key = resolve_key(service, info, filename, cache_and_play);

        let outcome = self
            .locks
            .with_lock(
                &key,
                LockOptions {
                    timeout: Duration::from_secs(self.engine.max_timeout_secs),
                    // Must outlive the full cache-and-play polling window.
                    ttl: POLL_INTERVAL * (POLL_LIMIT + 2) + Duration::from_secs(30),
                },
                || self.resolve_locked(service, info, filename, cache_and_play, auto_remove_downloads, &key),
            )
            .await;

        match outcome.result {
            Some(result) => result,
            None if outcome.acquired => Err(ResolveError::Contention),
            None => {
                // Another resolve held the fingerprint past our patience;
                // its result is the equivalent cached answer.
                match self.link_cache.get(&key).await {
                    Some(cached) => Ok(cached),
                    None => Err(ResolveError::Contention),
                }
            }
        }
    }

    async fn resolve_locked(
        &self,
        service: &Arc<DebridService>,
        info: &PlaybackInfo,
        filename: Option<&str>,
        cache_and_play: bool,
        auto_remove_downloads: bool,
        key: &str,
    ) -> Result<Option<String>, ResolveError> {
        if let Some(cached) = self.link_cache.get(key).await {
            match cached {
                Some(url) => return Ok(Some(url)),
                // A cached negative means "not yet cached"; only
                // cache-and-play pushes past it.
                None if !cache_and_play => return Ok(None),
                None => {}
            }
        }

        let pre_owned = info.service_item_id.is_some();
        let mut item = self.obtain_item(service, info, filename).await?;

        if !item.status.is_playable() {
            if item.status == DownloadStatus::Error {
                return Err(ResolveError::ItemErrored);
            }
            self.link_cache
                .insert(key.to_string(), None, NEGATIVE_TTL)
                .await;
            if !cache_and_play {
                info!(
                    event = "resolve_deferred",
                    service = %service.id(),
                    hash = %info.hash,
                    status = ?item.status,
                    "Item not ready, resolve deferred"
                );
                return Ok(None);
            }
            item = self.poll_until_ready(service, info, &item).await?;
        }

        let url = self.mint_link(service, info, filename, &item).await?;
        self.link_cache
            .insert(
                key.to_string(),
                Some(url.clone()),
                Duration::from_secs(self.engine.playback_link_validity_secs),
            )
            .await;

        if auto_remove_downloads && !pre_owned && !item.private && !info.private {
            self.spawn_cleanup(service, info.kind, item.id.clone());
        }

        info!(
            event = "resolve_finished",
            service = %service.id(),
            hash = %info.hash,
            "Playback URL minted"
        );
        Ok(Some(url))
    }

    /// Step 2: fetch directly when the item is already on the account,
    /// otherwise introduce it (torrent file URL when allowed, magnet or NZB
    /// otherwise).
    async fn obtain_item(
        &self,
        service: &Arc<DebridService>,
        info: &PlaybackInfo,
        filename: Option<&str>,
    ) -> Result<DebridDownload, ResolveError> {
        if let Some(item_id) = &info.service_item_id {
            return match service.get_item(info.kind, item_id).await {
                Ok(item) => Ok(item),
                Err(err) if err.kind == DebridErrorKind::NotFound => {
                    // The service no longer knows this item; the cached
                    // availability entry is a lie now.
                    service.invalidate_check(&info.hash).await;
                    Err(err.into())
                }
                Err(err) => Err(err.into()),
            };
        }

        match info.kind {
            SourceKind::Usenet => {
                let url = info
                    .nzb_url
                    .as_deref()
                    .or(info.download_url.as_deref())
                    .ok_or_else(|| {
                        DebridError::new(DebridErrorKind::Unknown, 0, "usenet item without a URL")
                    })?;
                let name = filename
                    .or(info.filename.as_deref())
                    .unwrap_or("download.nzb");
                Ok(service.add_nzb(url, name).await?)
            }
            SourceKind::Torrent => {
                if self.engine.use_torrent_download_url
                    && let Some(download_url) = &info.download_url
                {
                    debug!(service = %service.id(), "adding torrent by file URL");
                    return Ok(service.add_torrent(download_url).await?);
                }
                let name = filename.or(info.filename.as_deref()).unwrap_or("magnet");
                let magnet = info.hash.to_magnet(name, &info.sources);
                Ok(service.add_magnet(&magnet).await?)
            }
        }
    }

    /// Step 3, cache-and-play arm: poll the item until it turns playable,
    /// errors out, or the window closes.
    async fn poll_until_ready(
        &self,
        service: &Arc<DebridService>,
        info: &PlaybackInfo,
        item: &DebridDownload,
    ) -> Result<DebridDownload, ResolveError> {
        for iteration in 0..POLL_LIMIT {
            tokio::time::sleep(POLL_INTERVAL).await;
            let current = service.get_item(info.kind, &item.id).await?;
            debug!(
                service = %service.id(),
                item = %item.id,
                iteration,
                status = ?current.status,
                "cache-and-play poll"
            );
            match current.status {
                DownloadStatus::Downloaded => return Ok(current),
                DownloadStatus::Error => return Err(ResolveError::ItemErrored),
                _ => {}
            }
        }
        Err(ResolveError::Debrid(DebridError::new(
            DebridErrorKind::Unknown,
            0,
            "item did not become playable within the cache-and-play window",
        )))
    }

    /// Steps 4 and 5: select the file and mint the short-lived URL.
    async fn mint_link(
        &self,
        service: &Arc<DebridService>,
        info: &PlaybackInfo,
        filename: Option<&str>,
        item: &DebridDownload,
    ) -> Result<String, ResolveError> {
        let target = info.metadata.as_ref().map(EpisodeTarget::from_playback);
        let hints = SelectionHints {
            chosen_filename: filename.or(info.filename.as_deref()),
            chosen_index: info.file_index,
        };
        let file = selector::select_file(item, target.as_ref(), &hints)?;

        let client_ip = None;
        match info.kind {
            SourceKind::Torrent => {
                let link = file.link.as_deref().ok_or_else(|| {
                    DebridError::new(
                        DebridErrorKind::Unknown,
                        0,
                        "selected file carries no link token",
                    )
                })?;
                Ok(service.generate_torrent_link(link, client_ip).await?)
            }
            SourceKind::Usenet => {
                let file_id = file.id.clone().or_else(|| file.index.map(|i| i.to_string()));
                Ok(service
                    .generate_usenet_link(&item.id, file_id.as_deref(), client_ip)
                    .await?)
            }
        }
    }

    /// Step 6: transient items are removed after playback on a detached
    /// task; failures are logged and never surfaced.
    fn spawn_cleanup(&self, service: &Arc<DebridService>, kind: SourceKind, item_id: String) {
        let service = Arc::clone(service);
        tokio::spawn(async move {
            match service.remove_item(kind, &item_id).await {
                Ok(()) => debug!(service = %service.id(), item = %item_id, "auto-removed item"),
                Err(err) => warn!(
                    service = %service.id(),
                    item = %item_id,
                    error = %err,
                    "auto-remove failed"
                ),
            }
        });
    }
}

/// The full resolve fingerprint. Everything that could change the minted
/// URL participates, so the single-flight guarantee is exactly
/// "at most one concurrent add per {credential, hash, metadata, filename}".
fn resolve_key(
    service: &Arc<DebridService>,
    info: &PlaybackInfo,
    filename: Option<&str>,
    cache_and_play: bool,
) -> String {
    format!(
        "resolve|{}|{}|{}|{}|{}|{}",
        info.hash,
        service.id(),
        service.credential_hash(),
        info.metadata.as_ref().map(|m| m.fingerprint()).unwrap_or_default(),
        filename.or(info.filename.as_deref()).unwrap_or_default(),
        cache_and_play,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_visibility() {
        assert!(ResolveError::ItemErrored.is_user_visible());
        assert!(ResolveError::Debrid(DebridError::no_matching_file()).is_user_visible());
        assert!(!ResolveError::UnknownService("x".to_string()).is_user_visible());
        assert!(!ResolveError::Contention.is_user_visible());
    }

    #[test]
    fn metadata_fingerprint_feeds_the_key() {
        let meta = crate::models::PlaybackMetadata {
            season: Some(2),
            episode: Some(5),
            absolute_episode: None,
        };
        assert_eq!(meta.fingerprint(), "2:5:");
    }
}
