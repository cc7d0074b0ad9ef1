use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod error;
mod handlers;

pub use error::ApiError;

use crate::state::SharedState;
use metrics_exporter_prometheus::PrometheusHandle;

pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: Instant::now(),
        prometheus_handle,
    })
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.shared.config.server.cors_allowed_origins.clone();

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/manifest.json", get(handlers::manifest))
        .route("/stream/{type}/{id}", get(handlers::streams))
        .route("/catalog/{type}/{id}", get(handlers::catalog))
        .route(
            "/catalog/{type}/{id}/{extra}",
            get(handlers::catalog_with_extra),
        )
        .route("/meta/{type}/{id}", get(handlers::meta))
        .route("/playback/{token}", get(handlers::playback))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_metrics))
}

/// Request counter and latency histogram per route pattern.
async fn track_metrics(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());
    let method = request.method().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("streamarr_http_requests_total", &labels).increment(1);
    metrics::histogram!("streamarr_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
