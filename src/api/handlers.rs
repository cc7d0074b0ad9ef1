//! Route handlers. The HTTP surface stays thin: parse the path, call into
//! the engine, shape the wire response.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use super::error::ApiError;
use crate::clients::{Manifest, ManifestCatalog};
use crate::library::{CatalogView, LIBRARY_ID_PREFIX, LibraryId, MetaDetail, MetaPreview};
use crate::models::{
    AddonError, ParsedStream, PlaybackInfo, PlaybackMetadata, SourceKind, StreamKind,
};
use crate::parser::ParsedId;

/// Wire form of one stream entry handed to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_idx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_hints: Option<WireBehaviorHints>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBehaviorHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binge_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StreamsReply {
    pub streams: Vec<WireStream>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AddonError>,
}

pub async fn manifest(State(state): State<Arc<AppState>>) -> Json<Manifest> {
    let mut catalogs = Vec::new();
    for library in &state.shared.libraries {
        let service = library.service();
        let caps = service.capabilities();
        let kinds = [
            (caps.torrent, "torrent"),
            (caps.usenet, "usenet"),
        ];
        for (enabled, kind) in kinds {
            if enabled {
                catalogs.push(ManifestCatalog {
                    kind: "other".to_string(),
                    id: format!("{LIBRARY_ID_PREFIX}.{}.{kind}", service.id()),
                    name: format!("{} library", service.short_name()),
                });
            }
        }
    }

    Json(Manifest {
        id: "com.streamarr".to_string(),
        name: "streamarr".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        resources: vec![
            serde_json::json!("stream"),
            serde_json::json!("catalog"),
            serde_json::json!("meta"),
        ],
        types: vec![
            "movie".to_string(),
            "series".to_string(),
            "other".to_string(),
        ],
        catalogs,
    })
}

pub async fn streams(
    State(state): State<Arc<AppState>>,
    Path((media_type, id)): Path<(String, String)>,
) -> Result<Json<StreamsReply>, ApiError> {
    let id = id.trim_end_matches(".json");

    // Library video ids play directly off the owning service.
    if let Some(library_id) = LibraryId::parse(id) {
        return library_stream(&state, &library_id).map(Json);
    }

    let parsed_id = ParsedId::parse(id, &media_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unrecognized id '{id}'")))?;

    let outcome = state
        .shared
        .aggregator
        .fetch_streams(&parsed_id, &media_type, None)
        .await;

    let Some(metadata) = outcome.metadata else {
        return Ok(Json(StreamsReply {
            streams: Vec::new(),
            errors: outcome.errors,
        }));
    };

    let processed = state
        .shared
        .processor
        .process(outcome.candidates, &metadata, false)
        .await;

    let mut errors = outcome.errors;
    errors.extend(processed.errors);

    let public_url = state.shared.config.server.public_url.trim_end_matches('/');
    let streams = processed
        .streams
        .into_iter()
        .filter_map(|stream| to_wire(&stream, public_url, &metadata))
        .collect();

    Ok(Json(StreamsReply { streams, errors }))
}

fn library_stream(state: &AppState, id: &LibraryId) -> Result<StreamsReply, ApiError> {
    let service = state
        .shared
        .services
        .get(&id.service_id)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown service '{}'", id.service_id)))?;

    let info = PlaybackInfo {
        kind: id.kind,
        service_id: id.service_id.clone(),
        hash: crate::models::InfoHash::digest(&format!("{}:{}", id.service_id, id.item_id)),
        nzb_url: None,
        download_url: None,
        sources: Vec::new(),
        metadata: None,
        file_index: id.file_id.as_deref().and_then(|f| f.parse().ok()),
        filename: id
            .file_id
            .as_deref()
            .filter(|f| f.parse::<u32>().is_err())
            .map(ToString::to_string),
        service_item_id: Some(id.item_id.clone()),
        private: false,
    };

    let public_url = state.shared.config.server.public_url.trim_end_matches('/');
    Ok(StreamsReply {
        streams: vec![WireStream {
            name: Some(format!("[{}] Library", service.short_name())),
            description: Some(format!("Play from your {} library", service.id())),
            url: Some(format!("{public_url}/playback/{}", info.to_token())),
            info_hash: None,
            file_idx: None,
            behavior_hints: None,
        }],
        errors: Vec::new(),
    })
}

/// Converts a processed stream into its wire shape. Debrid/usenet entries
/// without a direct URL get an opaque playback handle; p2p entries expose
/// their info hash for the client's own engine.
fn to_wire(
    stream: &ParsedStream,
    public_url: &str,
    metadata: &crate::models::SearchMetadata,
) -> Option<WireStream> {
    if let Some(error) = &stream.error {
        return Some(WireStream {
            name: Some(format!("[⚠] {}", error.title)),
            description: Some(error.description.clone()),
            url: None,
            info_hash: None,
            file_idx: None,
            behavior_hints: None,
        });
    }

    let url = match (&stream.url, stream.kind) {
        (Some(url), _) => Some(url.clone()),
        (None, StreamKind::P2p) => None,
        (None, _) => {
            let info = playback_info(stream, metadata)?;
            Some(format!("{public_url}/playback/{}", info.to_token()))
        }
    };

    if url.is_none() && stream.info_hash.is_none() {
        return None;
    }

    Some(WireStream {
        name: Some(display_name(stream)),
        description: Some(display_description(stream)),
        url,
        info_hash: match stream.kind {
            StreamKind::P2p => stream.info_hash.as_ref().map(ToString::to_string),
            _ => None,
        },
        file_idx: match stream.kind {
            StreamKind::P2p => stream.file_index,
            _ => None,
        },
        behavior_hints: Some(WireBehaviorHints {
            binge_group: stream.binge_group.clone(),
            filename: stream.filename.clone(),
            video_size: stream.size,
        }),
    })
}

fn playback_info(
    stream: &ParsedStream,
    metadata: &crate::models::SearchMetadata,
) -> Option<PlaybackInfo> {
    let service = stream.service.as_ref()?;
    let hash = stream.info_hash.clone()?;
    let kind = match stream.kind {
        StreamKind::Usenet => SourceKind::Usenet,
        _ => SourceKind::Torrent,
    };
    Some(PlaybackInfo {
        kind,
        service_id: service.id.clone(),
        hash,
        nzb_url: None,
        download_url: None,
        sources: stream.sources.clone(),
        metadata: metadata.is_series_request().then(|| PlaybackMetadata {
            season: metadata.season,
            episode: metadata.episode,
            absolute_episode: metadata.absolute_episode,
        }),
        file_index: stream.file_index,
        filename: stream.filename.clone(),
        service_item_id: stream.service_item_id.clone(),
        private: stream.private,
    })
}

/// Minimal display strings; a formatter sits above this in the full system
/// and consumes the same inputs.
fn display_name(stream: &ParsedStream) -> String {
    let mut name = String::new();
    if let Some(service) = &stream.service {
        let flash = if stream.is_cached() { "⚡" } else { "⏳" };
        name.push_str(&format!("[{}{flash}] ", service.short_name));
    }
    name.push_str(&stream.addon.name);
    if let Some(resolution) = &stream.parsed_file.resolution {
        name.push_str(&format!("\n{resolution}"));
    }
    name
}

fn display_description(stream: &ParsedStream) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(filename) = &stream.filename {
        lines.push(filename.clone());
    }
    let mut details: Vec<String> = Vec::new();
    if let Some(size) = stream.size {
        details.push(format!("{:.2} GiB", size as f64 / 1024f64.powi(3)));
    }
    if let Some(seeders) = stream.seeders {
        details.push(format!("{seeders} seeders"));
    }
    if !stream.languages.is_empty() {
        details.push(stream.languages.join("/"));
    }
    if stream.library {
        details.push("library".to_string());
    }
    if !details.is_empty() {
        lines.push(details.join(" • "));
    }
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub skip: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CatalogReply {
    pub metas: Vec<MetaPreview>,
}

pub async fn catalog(
    State(state): State<Arc<AppState>>,
    Path((media_type, id)): Path<(String, String)>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<CatalogReply>, ApiError> {
    catalog_inner(&state, &media_type, &id, &query).await.map(Json)
}

pub async fn catalog_with_extra(
    State(state): State<Arc<AppState>>,
    Path((media_type, id, extra)): Path<(String, String, String)>,
) -> Result<Json<CatalogReply>, ApiError> {
    let query = parse_extra(extra.trim_end_matches(".json"));
    catalog_inner(&state, &media_type, &id, &query).await.map(Json)
}

/// Path-style extras: `skip=100&genre=Actions`, URL-encoded.
fn parse_extra(extra: &str) -> CatalogQuery {
    let mut query = CatalogQuery {
        search: None,
        genre: None,
        skip: None,
    };
    for pair in extra.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value).map_or_else(|_| value.to_string(), |v| v.to_string());
        match key {
            "search" => query.search = Some(value),
            "genre" => query.genre = Some(value),
            "skip" => query.skip = value.parse().ok(),
            _ => {}
        }
    }
    query
}

async fn catalog_inner(
    state: &AppState,
    _media_type: &str,
    id: &str,
    query: &CatalogQuery,
) -> Result<CatalogReply, ApiError> {
    let id = id.trim_end_matches(".json");
    let rest = id
        .strip_prefix(LIBRARY_ID_PREFIX)
        .and_then(|r| r.strip_prefix('.'))
        .ok_or_else(|| ApiError::NotFound(format!("unknown catalog '{id}'")))?;
    let (service_id, kind) = rest
        .split_once('.')
        .ok_or_else(|| ApiError::NotFound(format!("unknown catalog '{id}'")))?;
    let kind = match kind {
        "torrent" => SourceKind::Torrent,
        "usenet" => SourceKind::Usenet,
        _ => return Err(ApiError::NotFound(format!("unknown catalog '{id}'"))),
    };

    let library = state
        .shared
        .libraries
        .iter()
        .find(|l| l.service().id() == service_id)
        .ok_or_else(|| ApiError::NotFound(format!("no library for service '{service_id}'")))?;

    let view = CatalogView::from_genre(query.genre.as_deref());
    let metas = library
        .catalog(kind, view, query.search.as_deref(), query.skip.unwrap_or(0))
        .await?;
    Ok(CatalogReply { metas })
}

#[derive(Debug, Serialize)]
pub struct MetaReply {
    pub meta: MetaDetail,
}

pub async fn meta(
    State(state): State<Arc<AppState>>,
    Path((_media_type, id)): Path<(String, String)>,
) -> Result<Json<MetaReply>, ApiError> {
    let id = id.trim_end_matches(".json");
    let library_id = LibraryId::parse(id)
        .ok_or_else(|| ApiError::NotFound(format!("not a library id: '{id}'")))?;

    let library = state
        .shared
        .libraries
        .iter()
        .find(|l| l.service().id() == library_id.service_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("no library for service '{}'", library_id.service_id))
        })?;

    let meta = library.meta(&library_id).await?;
    Ok(Json(MetaReply { meta }))
}

#[derive(Debug, Deserialize)]
pub struct PlaybackQuery {
    #[serde(default)]
    pub cache_and_play: Option<bool>,
}

pub async fn playback(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<PlaybackQuery>,
) -> Result<Response, ApiError> {
    let info = PlaybackInfo::from_token(&token)
        .ok_or_else(|| ApiError::BadRequest("malformed playback token".to_string()))?;

    let cache_and_play = query.cache_and_play.unwrap_or(false);
    let outcome = state
        .shared
        .resolver
        .resolve(&info, None, cache_and_play, false)
        .await;

    match outcome {
        Ok(Some(url)) => {
            info!(event = "playback_redirect", service = %info.service_id, "Redirecting to playback URL");
            Ok(Redirect::temporary(&url).into_response())
        }
        Ok(None) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "message": "download started; retry once the service finishes caching"
            })),
        )
            .into_response()),
        Err(err) => {
            warn!(service = %info.service_id, error = %err, "resolve failed");
            // By default resolve failures stay user-visible rather than
            // failing the HTTP call; strict mode surfaces the raw error.
            if state.shared.config.user.strict_resolve_errors || !err.is_user_visible() {
                Err(err.into())
            } else {
                Ok((
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "error": { "title": "Playback failed", "description": err.to_string() }
                    })),
                )
                    .into_response())
            }
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "services": state.shared.services.keys().collect::<Vec<_>>(),
    }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.prometheus_handle.as_ref().map_or_else(
        || (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
        |handle| handle.render().into_response(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_parsing() {
        let query = parse_extra("skip=100&genre=Actions");
        assert_eq!(query.skip, Some(100));
        assert_eq!(query.genre.as_deref(), Some("Actions"));

        let query = parse_extra("search=breaking%20bad");
        assert_eq!(query.search.as_deref(), Some("breaking bad"));
    }
}
