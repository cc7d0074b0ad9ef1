//! Fan-out behavior against real (local) upstreams: settled-all semantics,
//! per-addon timeouts, empty fan-out.

use axum::{Json, Router, routing::get};
use std::sync::Arc;
use std::time::Duration;

use streamarr::aggregator::Aggregator;
use streamarr::cache::Cache;
use streamarr::clients::{AddonClient, MetadataClient};
use streamarr::config::EngineConfig;
use streamarr::lock::LockManager;
use streamarr::models::{ErrorKind, SearchMetadata};
use streamarr::parser::ParsedId;

fn engine() -> EngineConfig {
    EngineConfig {
        min_timeout_secs: 1,
        ..EngineConfig::default()
    }
}

fn inception_metadata() -> SearchMetadata {
    SearchMetadata {
        primary_title: "Inception".to_string(),
        titles: vec!["Inception".to_string()],
        year: Some(2010),
        season: None,
        episode: None,
        absolute_episode: None,
        relative_absolute_episode: None,
        is_anime: false,
        runtime: Some(148),
        genres: vec![],
        original_language: Some("en".to_string()),
        imdb_id: Some("tt1375666".to_string()),
        tmdb_id: None,
        anilist_id: None,
    }
}

/// Metadata client with the lookup pre-seeded so no external call happens.
async fn seeded_metadata(id: &ParsedId) -> MetadataClient {
    let cache: Cache<SearchMetadata> = Cache::new("search-metadata", 64);
    cache
        .insert(id.cache_key(), inception_metadata(), Duration::from_secs(600))
        .await;
    MetadataClient::new(cache, LockManager::new(), Duration::from_secs(600))
}

/// Serves a fixed three-stream reply on one route and hangs on another.
async fn spawn_mock_addon() -> String {
    let app = Router::new()
        .route(
            "/good/stream/{type}/{id}",
            get(|| async {
                Json(serde_json::json!({
                    "streams": [
                        {
                            "title": "Inception.2010.2160p.BluRay.REMUX-GRP\n👤 99 💾 40 GB",
                            "infoHash": "a".repeat(40),
                        },
                        {
                            "title": "Inception.2010.1080p.BluRay.x264-GRP\n👤 80 💾 10 GB",
                            "infoHash": "b".repeat(40),
                        },
                        {
                            "title": "Inception.2010.720p.WEB-DL-GRP\n👤 10 💾 2 GB",
                            "infoHash": "c".repeat(40),
                        },
                    ]
                }))
            }),
        )
        .route(
            "/slow/stream/{type}/{id}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(serde_json::json!({ "streams": [] }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Scenario: two addons, one answers with three streams, the other times
/// out. The reply carries the three streams plus one TIMEOUT error naming
/// the slow addon.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_failure_keeps_good_results_and_reports_timeout() {
    let base = spawn_mock_addon().await;
    let resources = vec!["stream".to_string()];

    let good = Arc::new(AddonClient::new(
        "good-addon",
        "good-addon",
        format!("{base}/good"),
        Duration::from_secs(5),
        &resources,
        None,
        Vec::new(),
        &[],
    ));
    let slow = Arc::new(AddonClient::new(
        "slow-addon",
        "slow-addon",
        format!("{base}/slow"),
        Duration::from_secs(1),
        &resources,
        None,
        Vec::new(),
        &[],
    ));

    let id = ParsedId::parse("tt1375666", "movie").unwrap();
    let aggregator = Aggregator::new(
        vec![good, slow],
        Vec::new(),
        seeded_metadata(&id).await,
        engine(),
    );

    let outcome = aggregator.fetch_streams(&id, "movie", None).await;

    assert_eq!(outcome.candidates.len(), 3);
    assert_eq!(outcome.errors.len(), 1);
    let error = &outcome.errors[0];
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.addon_name, "slow-addon");
}

/// Boundary: no addons configured means empty streams and zero errors.
#[tokio::test]
async fn empty_fanout_is_empty_and_errorless() {
    let id = ParsedId::parse("tt1375666", "movie").unwrap();
    let aggregator = Aggregator::new(
        Vec::new(),
        Vec::new(),
        seeded_metadata(&id).await,
        engine(),
    );

    let outcome = aggregator.fetch_streams(&id, "movie", None).await;
    assert!(outcome.candidates.is_empty());
    assert!(outcome.errors.is_empty());
    assert!(outcome.metadata.is_some());
}

/// Candidates that do not match the requested title never reach the
/// processor.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unrelated_titles_are_gated_out() {
    let base = spawn_mock_addon().await;
    // The mock's /good route serves Inception streams; ask for a different
    // title and they all fail the gate.
    let cache: Cache<SearchMetadata> = Cache::new("search-metadata", 64);
    let id = ParsedId::parse("tt0137523", "movie").unwrap();
    let mut metadata = inception_metadata();
    metadata.primary_title = "Fight Club".to_string();
    metadata.titles = vec!["Fight Club".to_string()];
    cache
        .insert(id.cache_key(), metadata, Duration::from_secs(600))
        .await;
    let metadata_client =
        MetadataClient::new(cache, LockManager::new(), Duration::from_secs(600));

    let good = Arc::new(AddonClient::new(
        "good-addon",
        "good-addon",
        format!("{base}/good"),
        Duration::from_secs(5),
        &["stream".to_string()],
        None,
        Vec::new(),
        &[],
    ));

    let aggregator = Aggregator::new(vec![good], Vec::new(), metadata_client, engine());
    let outcome = aggregator.fetch_streams(&id, "movie", None).await;
    assert!(outcome.candidates.is_empty());
    assert!(outcome.errors.is_empty());
}
