//! Library subsystem: catalog, meta and search over a debrid account.
//!
//! Everything here reads through the service's cached snapshot (see the
//! read path in `clients::debrid`), so a catalog page, a detail view and a
//! stream-request search all observe the same data.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::clients::debrid::{DebridError, DebridService};
use crate::matcher;
use crate::models::{
    DebridDownload, DownloadStatus, InfoHash, SearchMetadata, SourceKind, UnprocessedTorrent,
};
use crate::parser::parse_title;
use crate::selector;

/// Literal id prefix for library-scoped ids. Contains internal dots on
/// purpose: parsers must anchor on the whole literal, never split on `.`.
pub const LIBRARY_ID_PREFIX: &str = "streamarr.library";

/// Fixed catalog page size.
pub const CATALOG_PAGE_SIZE: usize = 100;

/// Catalog sort/behavior selected through the `genre` extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogView {
    #[default]
    AddedNewest,
    AddedOldest,
    TitleAscending,
    TitleDescending,
    /// Synthetic page of maintenance actions.
    Actions,
}

impl CatalogView {
    #[must_use]
    pub fn from_genre(genre: Option<&str>) -> Self {
        match genre {
            Some("Added (Oldest)") => Self::AddedOldest,
            Some("Title (A-Z)") => Self::TitleAscending,
            Some("Title (Z-A)") => Self::TitleDescending,
            Some("Actions") => Self::Actions,
            _ => Self::AddedNewest,
        }
    }
}

/// A structured library id: `<prefix>.<serviceId>.<kind>.<itemId>[:<fileId>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryId {
    pub service_id: String,
    pub kind: SourceKind,
    pub item_id: String,
    pub file_id: Option<String>,
}

impl LibraryId {
    #[must_use]
    pub fn encode(&self) -> String {
        let kind = match self.kind {
            SourceKind::Torrent => "torrent",
            SourceKind::Usenet => "usenet",
        };
        let mut out = format!(
            "{LIBRARY_ID_PREFIX}.{}.{kind}.{}",
            self.service_id, self.item_id
        );
        if let Some(file_id) = &self.file_id {
            out.push(':');
            out.push_str(file_id);
        }
        out
    }

    /// Anchors on the literal prefix; the remainder is split positionally so
    /// item ids may themselves contain dots.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(LIBRARY_ID_PREFIX)?.strip_prefix('.')?;
        let (rest, file_id) = match rest.split_once(':') {
            Some((head, file)) => (head, Some(file.to_string())),
            None => (rest, None),
        };
        let mut parts = rest.splitn(3, '.');
        let service_id = parts.next()?.to_string();
        let kind = match parts.next()? {
            "torrent" => SourceKind::Torrent,
            "usenet" => SourceKind::Usenet,
            _ => return None,
        };
        let item_id = parts.next()?.to_string();
        if service_id.is_empty() || item_id.is_empty() {
            return None;
        }
        Some(Self {
            service_id,
            kind,
            item_id,
            file_id,
        })
    }
}

/// Wire shape of one catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPreview {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

/// Wire shape of one playable entry in a detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaVideo {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<chrono::DateTime<chrono::Utc>>,
}

/// Wire shape of a library detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDetail {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub videos: Vec<MetaVideo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_video_id: Option<String>,
}

pub struct LibraryService {
    service: Arc<DebridService>,
}

impl LibraryService {
    #[must_use]
    pub const fn new(service: Arc<DebridService>) -> Self {
        Self { service }
    }

    #[must_use]
    pub const fn service(&self) -> &Arc<DebridService> {
        &self.service
    }

    /// One catalog page: sorted (or search-scored) owned items.
    pub async fn catalog(
        &self,
        kind: SourceKind,
        view: CatalogView,
        search: Option<&str>,
        skip: usize,
    ) -> Result<Vec<MetaPreview>, DebridError> {
        if view == CatalogView::Actions {
            return Ok(self.actions_page());
        }

        let snapshot = self.service.library_snapshot(kind).await?;
        let mut items: Vec<&DebridDownload> =
            snapshot.iter().filter(|i| i.name.is_some()).collect();

        if let Some(query) = search.map(str::trim).filter(|q| !q.is_empty()) {
            let mut scored: Vec<(i32, &DebridDownload)> = items
                .iter()
                .filter_map(|item| {
                    let name = item.name.as_deref().unwrap_or_default();
                    search_score(query, name).map(|score| (score, *item))
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            items = scored.into_iter().map(|(_, item)| item).collect();
        } else {
            match view {
                CatalogView::AddedNewest => items.sort_by(|a, b| b.added_at.cmp(&a.added_at)),
                CatalogView::AddedOldest => items.sort_by(|a, b| a.added_at.cmp(&b.added_at)),
                CatalogView::TitleAscending => {
                    items.sort_by(|a, b| locale_key(a).cmp(&locale_key(b)));
                }
                CatalogView::TitleDescending => {
                    items.sort_by(|a, b| locale_key(b).cmp(&locale_key(a)));
                }
                CatalogView::Actions => unreachable!("handled above"),
            }
        }

        Ok(items
            .into_iter()
            .skip(skip)
            .take(CATALOG_PAGE_SIZE)
            .map(|item| self.preview(kind, item))
            .collect())
    }

    fn preview(&self, kind: SourceKind, item: &DebridDownload) -> MetaPreview {
        let name = item.name.clone().unwrap_or_else(|| item.id.clone());
        let parsed = parse_title(&name);
        MetaPreview {
            id: LibraryId {
                service_id: self.service.id().to_string(),
                kind,
                item_id: item.id.clone(),
                file_id: None,
            }
            .encode(),
            kind: "other".to_string(),
            name: parsed.title.clone().unwrap_or(name),
            description: Some(describe(item, &parsed)),
            poster: None,
        }
    }

    fn actions_page(&self) -> Vec<MetaPreview> {
        vec![MetaPreview {
            id: format!("{LIBRARY_ID_PREFIX}.{}.action.refresh", self.service.id()),
            kind: "other".to_string(),
            name: "Refresh library".to_string(),
            description: Some("Invalidate the cached snapshot and re-fetch".to_string()),
            poster: None,
        }]
    }

    /// Detail view for one owned item, built from an authoritative fetch.
    pub async fn meta(&self, id: &LibraryId) -> Result<MetaDetail, DebridError> {
        let item = self.service.get_item(id.kind, &id.item_id).await?;
        let parsed = parsed_of(&item);
        let name = item.name.clone().unwrap_or_else(|| item.id.clone());

        let videos: Vec<MetaVideo> = item
            .files
            .iter()
            .filter(|f| f.is_video())
            .map(|file| {
                let file_ref = file
                    .index
                    .map_or_else(|| file.basename().to_string(), |i| i.to_string());
                MetaVideo {
                    id: LibraryId {
                        service_id: self.service.id().to_string(),
                        kind: id.kind,
                        item_id: item.id.clone(),
                        file_id: Some(file_ref),
                    }
                    .encode(),
                    title: file.basename().to_string(),
                    released: item.added_at,
                }
            })
            .collect();

        let default_video_id = match videos.as_slice() {
            [only] => Some(only.id.clone()),
            _ => None,
        };

        Ok(MetaDetail {
            id: id.encode(),
            kind: "other".to_string(),
            name: parsed.title.clone().unwrap_or(name),
            description: describe(&item, &parsed),
            videos,
            default_video_id,
        })
    }

    /// Finds owned items matching a stream request.
    ///
    /// Every item whose status is playable-or-cached, whose name parses to a
    /// matching title, and whose season/episode declaration fits the request
    /// is emitted as a confirmed library candidate.
    pub async fn search(
        &self,
        kind: SourceKind,
        meta: &SearchMetadata,
    ) -> Result<Vec<UnprocessedTorrent>, DebridError> {
        let snapshot = self.service.library_snapshot(kind).await?;
        let mut results = Vec::new();

        for item in snapshot.iter() {
            if !matches!(
                item.status,
                DownloadStatus::Cached | DownloadStatus::Downloaded
            ) {
                continue;
            }
            let Some(name) = item.name.as_deref().filter(|n| !n.is_empty()) else {
                continue;
            };
            if !selector::container_matches(item, meta) {
                continue;
            }

            let hash = item.hash.clone().unwrap_or_else(|| {
                InfoHash::digest(&format!("{}:{}", self.service.id(), item.id))
            });

            results.push(UnprocessedTorrent {
                kind,
                hash,
                sources: Vec::new(),
                title: name.to_string(),
                size: item.size.unwrap_or(0),
                indexer: Some("library".to_string()),
                seeders: None,
                age_hours: None,
                download_url: None,
                nzb_url: None,
                confirmed: true,
                is_library: true,
                service_item_id: Some(item.id.clone()),
            });
        }

        info!(
            event = "library_search_finished",
            service = %self.service.id(),
            kind = ?kind,
            matches = results.len(),
            "Library search finished"
        );
        Ok(results)
    }
}

fn parsed_of(item: &DebridDownload) -> crate::models::ParsedFile {
    item.name.as_deref().map(parse_title).unwrap_or_default()
}

fn locale_key(item: &DebridDownload) -> (String, String) {
    let name = item.name.as_deref().unwrap_or_default();
    let parsed = parse_title(name);
    let title = parsed.title.unwrap_or_else(|| name.to_string());
    // Case-insensitive first, raw second; close enough to locale collation
    // for catalog ordering without a collation table.
    (title.to_lowercase(), title)
}

/// Human description for a detail row: title, year, season/episode range,
/// resolution, size, when it was added and how many files it holds.
fn describe(item: &DebridDownload, parsed: &crate::models::ParsedFile) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = &parsed.title {
        parts.push(title.clone());
    }
    if let Some(year) = parsed.year {
        parts.push(year.to_string());
    }
    if !parsed.seasons.is_empty() {
        let seasons = parsed
            .seasons
            .iter()
            .map(|s| format!("S{s:02}"))
            .collect::<Vec<_>>()
            .join("-");
        match parsed.episodes.as_slice() {
            [] => parts.push(seasons),
            [only] => parts.push(format!("{seasons}E{only:02}")),
            [first, .., last] => parts.push(format!("{seasons}E{first:02}-E{last:02}")),
        }
    }
    if let Some(resolution) = &parsed.resolution {
        parts.push(resolution.clone());
    }
    if let Some(size) = item.size {
        parts.push(human_size(size));
    }
    if let Some(added) = item.added_at {
        parts.push(format!("added {}", added.format("%Y-%m-%d")));
    }
    if !item.files.is_empty() {
        parts.push(format!("{} file(s)", item.files.len()));
    }
    parts.join(" • ")
}

#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Search scoring: exact normalized match 110, word-boundary prefix 100
/// (a word starts with the query) or 95 (the whole title starts with it),
/// substring 80, otherwise a fuzzy token-set score with a 65 floor.
fn search_score(query: &str, name: &str) -> Option<i32> {
    let parsed = parse_title(name);
    let title = parsed.title.as_deref().unwrap_or(name);

    let norm_query = matcher::normalize(query);
    let norm_title = matcher::normalize(title);
    if norm_query.is_empty() || norm_title.is_empty() {
        return None;
    }

    if norm_title == norm_query {
        return Some(110);
    }
    if norm_title.starts_with(&format!("{norm_query} ")) {
        return Some(95);
    }
    if norm_title
        .split_whitespace()
        .any(|word| word.starts_with(&norm_query))
    {
        return Some(100);
    }
    if norm_title.contains(&norm_query) {
        return Some(80);
    }

    #[allow(clippy::cast_possible_truncation)]
    let fuzzy = (matcher::token_set_ratio(title, query) * 100.0).round() as i32;
    (fuzzy >= 65).then_some(fuzzy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_id_round_trip() {
        let id = LibraryId {
            service_id: "torbox".to_string(),
            kind: SourceKind::Torrent,
            item_id: "12345".to_string(),
            file_id: Some("3".to_string()),
        };
        let encoded = id.encode();
        assert_eq!(encoded, "streamarr.library.torbox.torrent.12345:3");
        assert_eq!(LibraryId::parse(&encoded).unwrap(), id);
    }

    #[test]
    fn library_id_item_with_dots() {
        let id = LibraryId {
            service_id: "torbox".to_string(),
            kind: SourceKind::Usenet,
            item_id: "a.b.c".to_string(),
            file_id: None,
        };
        let parsed = LibraryId::parse(&id.encode()).unwrap();
        assert_eq!(parsed.item_id, "a.b.c");
    }

    #[test]
    fn library_id_rejects_foreign_prefixes() {
        assert!(LibraryId::parse("tt1375666").is_none());
        assert!(LibraryId::parse("streamarr.librarytorbox.torrent.1").is_none());
        assert!(LibraryId::parse("other.library.torbox.torrent.1").is_none());
    }

    #[test]
    fn catalog_view_from_genre() {
        assert_eq!(CatalogView::from_genre(None), CatalogView::AddedNewest);
        assert_eq!(
            CatalogView::from_genre(Some("Title (A-Z)")),
            CatalogView::TitleAscending
        );
        assert_eq!(
            CatalogView::from_genre(Some("Actions")),
            CatalogView::Actions
        );
    }

    #[test]
    fn search_scoring_tiers() {
        assert_eq!(
            search_score("breaking bad", "Breaking.Bad.S01.1080p.BluRay-GRP"),
            Some(110)
        );
        assert_eq!(
            search_score("breaking", "Breaking.Bad.S01.1080p.BluRay-GRP"),
            Some(95)
        );
        assert_eq!(
            search_score("bad", "Breaking.Bad.S01.1080p.BluRay-GRP"),
            Some(100)
        );
        assert_eq!(search_score("zzzz", "Breaking.Bad.S01.1080p-GRP"), None);
    }

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.00 KiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }
}
