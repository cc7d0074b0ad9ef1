//! Search-metadata lookups.
//!
//! Builds one immutable [`SearchMetadata`] per request from the public meta
//! catalogs (cinemeta for imdb/tmdb ids, the kitsu bridge for anime ids).
//! Lookups are cached per parsed id and coalesced through the lock manager
//! so identical concurrent requests produce a single upstream call.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::lock::{LockManager, LockOptions};
use crate::matcher;
use crate::models::SearchMetadata;
use crate::parser::{IdNamespace, MediaKind, ParsedId};

const CINEMETA_URL: &str = "https://v3-cinemeta.strem.io";
const KITSU_BRIDGE_URL: &str = "https://anime-kitsu.strem.fun";

#[derive(Debug, Deserialize)]
struct MetaResponse {
    meta: Option<MetaDocument>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MetaDocument {
    id: String,
    name: String,
    #[serde(alias = "releaseInfo")]
    year: Option<serde_json::Value>,
    genres: Vec<String>,
    runtime: Option<String>,
    language: Option<String>,
    #[serde(alias = "aliases")]
    alternative_titles: Vec<String>,
    imdb_id: Option<String>,
    #[serde(alias = "moviedb_id")]
    tmdb_id: Option<i64>,
    anilist_id: Option<i64>,
    videos: Vec<MetaVideo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MetaVideo {
    season: Option<i64>,
    #[serde(alias = "number")]
    episode: Option<i64>,
}

#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
    cinemeta_url: String,
    kitsu_url: String,
    cache: Cache<SearchMetadata>,
    locks: LockManager,
    cache_ttl: Duration,
}

impl MetadataClient {
    #[must_use]
    pub fn new(cache: Cache<SearchMetadata>, locks: LockManager, cache_ttl: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent(concat!("streamarr/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to build HTTP client"),
            cinemeta_url: CINEMETA_URL.to_string(),
            kitsu_url: KITSU_BRIDGE_URL.to_string(),
            cache,
            locks,
            cache_ttl,
        }
    }

    #[must_use]
    pub fn with_base_urls(mut self, cinemeta: &str, kitsu: &str) -> Self {
        self.cinemeta_url = cinemeta.trim_end_matches('/').to_string();
        self.kitsu_url = kitsu.trim_end_matches('/').to_string();
        self
    }

    /// Fetches (or recalls) the search metadata for a parsed id. Identical
    /// concurrent lookups collapse into one upstream call.
    pub async fn search_metadata(&self, id: &ParsedId) -> anyhow::Result<SearchMetadata> {
        let key = id.cache_key();
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let outcome = self
            .locks
            .with_lock(
                &format!("meta-fetch|{key}"),
                LockOptions {
                    timeout: Duration::from_secs(20),
                    ttl: Duration::from_secs(20),
                },
                || async {
                    if let Some(hit) = self.cache.get(&key).await {
                        return Ok(hit);
                    }
                    let meta = self.fetch(id).await?;
                    self.cache.insert(key.clone(), meta.clone(), self.cache_ttl).await;
                    Ok(meta)
                },
            )
            .await;

        match outcome.result {
            Some(result) => result,
            None => {
                // Lock contention past timeout: the winner either cached the
                // value or failed; prefer whatever is cached.
                self.cache
                    .get(&id.cache_key())
                    .await
                    .ok_or_else(|| anyhow::anyhow!("metadata lookup contention for {id}"))
            }
        }
    }

    async fn fetch(&self, id: &ParsedId) -> anyhow::Result<SearchMetadata> {
        let (base, media_type) = if id.namespace.is_anime_namespace() {
            (self.kitsu_url.as_str(), "series")
        } else {
            let media_type = match id.media_kind {
                MediaKind::Movie => "movie",
                MediaKind::Series | MediaKind::Anime => "series",
            };
            (self.cinemeta_url.as_str(), media_type)
        };

        let meta_id = match id.namespace {
            IdNamespace::Imdb => id.value.clone(),
            other => format!("{}:{}", other.as_str(), id.value),
        };
        let url = format!("{base}/meta/{media_type}/{}.json", urlencoding::encode(&meta_id));
        debug!(url = %url, "fetching search metadata");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let decoded: MetaResponse = response.json().await?;
        let document = decoded
            .meta
            .ok_or_else(|| anyhow::anyhow!("no metadata for {id}"))?;

        let metadata = build_search_metadata(&document, id);
        info!(
            event = "search_metadata_built",
            id = %id,
            title = %metadata.primary_title,
            titles = metadata.titles.len(),
            "Built search metadata"
        );
        Ok(metadata)
    }
}

fn build_search_metadata(doc: &MetaDocument, id: &ParsedId) -> SearchMetadata {
    let mut titles = vec![doc.name.clone()];
    for alias in &doc.alternative_titles {
        if !titles.iter().any(|t| matcher::normalize(t) == matcher::normalize(alias)) {
            titles.push(alias.clone());
        }
    }

    let year = doc.year.as_ref().and_then(parse_year);
    let runtime = doc.runtime.as_deref().and_then(parse_runtime_minutes);
    let is_anime = id.namespace.is_anime_namespace()
        || id.media_kind == MediaKind::Anime
        || (doc.genres.iter().any(|g| g == "Animation")
            && doc.language.as_deref().is_some_and(|l| l.starts_with("ja")));

    let (absolute, relative_absolute) = id
        .season
        .zip(id.episode)
        .map_or((None, None), |(season, episode)| {
            absolute_numbers(&doc.videos, season, episode)
        });

    SearchMetadata {
        primary_title: doc.name.clone(),
        titles,
        year,
        season: id.season,
        episode: id.episode,
        absolute_episode: absolute,
        relative_absolute_episode: relative_absolute,
        is_anime,
        runtime,
        genres: doc.genres.clone(),
        original_language: doc.language.clone(),
        imdb_id: doc
            .imdb_id
            .clone()
            .or_else(|| doc.id.starts_with("tt").then(|| doc.id.clone())),
        tmdb_id: doc.tmdb_id,
        anilist_id: doc.anilist_id,
    }
}

/// `releaseInfo` arrives as "2010", "2010-2013" or a bare number.
fn parse_year(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        serde_json::Value::String(s) => s
            .split(['-', '–'])
            .next()
            .and_then(|part| part.trim().parse().ok()),
        _ => None,
    }
}

fn parse_runtime_minutes(runtime: &str) -> Option<u32> {
    runtime
        .split_whitespace()
        .next()
        .and_then(|part| part.parse().ok())
}

/// Derives absolute numbering from the full episode list: the absolute
/// number counts every regular episode before the requested one; the
/// relative-absolute number restarts at the first episode of the requested
/// season (what split-cour releases number from).
fn absolute_numbers(
    videos: &[MetaVideo],
    season: u32,
    episode: u32,
) -> (Option<u32>, Option<u32>) {
    fn compute(videos: &[MetaVideo], season: u32, episode: u32) -> Option<(u32, u32)> {
        let mut regular: Vec<(u32, u32)> = videos
            .iter()
            .filter_map(|v| {
                let s = u32::try_from(v.season?).ok()?;
                let e = u32::try_from(v.episode?).ok()?;
                (s >= 1).then_some((s, e))
            })
            .collect();
        regular.sort_unstable();
        regular.dedup();

        let position = regular
            .iter()
            .position(|&(s, e)| s == season && e == episode)?;
        let season_start = regular.iter().position(|&(s, _)| s == season)?;

        let absolute = u32::try_from(position + 1).ok()?;
        let relative = u32::try_from(position - season_start + 1).ok()?;
        Some((absolute, relative))
    }

    let Some((absolute, relative)) = compute(videos, season, episode) else {
        return (None, None);
    };
    // An absolute number equal to the plain episode number adds nothing.
    (
        (absolute != episode).then_some(absolute),
        (relative != episode).then_some(relative),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(season: i64, episode: i64) -> MetaVideo {
        MetaVideo {
            season: Some(season),
            episode: Some(episode),
        }
    }

    #[test]
    fn absolute_numbering_across_seasons() {
        let videos: Vec<MetaVideo> = (1..=12)
            .map(|e| video(1, e))
            .chain((1..=12).map(|e| video(2, e)))
            .collect();
        let (absolute, relative) = absolute_numbers(&videos, 2, 5);
        assert_eq!(absolute, Some(17));
        // Relative restart equals the episode number here, so it is elided.
        assert_eq!(relative, None);
    }

    #[test]
    fn first_season_has_no_distinct_absolute() {
        let videos: Vec<MetaVideo> = (1..=12).map(|e| video(1, e)).collect();
        let (absolute, relative) = absolute_numbers(&videos, 1, 5);
        assert_eq!(absolute, None);
        assert_eq!(relative, None);
    }

    #[test]
    fn specials_are_ignored() {
        let videos: Vec<MetaVideo> = std::iter::once(video(0, 1))
            .chain((1..=3).map(|e| video(1, e)))
            .chain((1..=3).map(|e| video(2, e)))
            .collect();
        let (absolute, _) = absolute_numbers(&videos, 2, 2);
        assert_eq!(absolute, Some(5));
    }

    #[test]
    fn year_forms() {
        assert_eq!(parse_year(&serde_json::json!("2010")), Some(2010));
        assert_eq!(parse_year(&serde_json::json!("2010-2013")), Some(2010));
        assert_eq!(parse_year(&serde_json::json!(2010)), Some(2010));
        assert_eq!(parse_year(&serde_json::json!(null)), None);
    }

    #[test]
    fn runtime_minutes() {
        assert_eq!(parse_runtime_minutes("148 min"), Some(148));
        assert_eq!(parse_runtime_minutes("n/a"), None);
    }

    #[test]
    fn alias_dedupe_is_normalized() {
        let doc = MetaDocument {
            id: "tt1".to_string(),
            name: "The Show".to_string(),
            alternative_titles: vec!["Show".to_string(), "Die Show".to_string()],
            ..MetaDocument::default()
        };
        let id = ParsedId::parse("tt0000001", "movie").unwrap();
        let meta = build_search_metadata(&doc, &id);
        // "Show" normalizes to the same string as "The Show".
        assert_eq!(meta.titles, vec!["The Show".to_string(), "Die Show".to_string()]);
    }
}
