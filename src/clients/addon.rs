//! Upstream addon protocol client.
//!
//! An [`AddonClient`] is one concrete upstream instance, constructed from a
//! preset (URL template + option defaults) and the user's config slice.
//! `get_streams` never fails: every failure mode is folded into
//! [`AddonError`] values so one bad upstream cannot poison the fan-out.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::config::{PresetConfig, ServiceConfig};
use crate::models::{AddonError, ErrorKind, UnprocessedStream};

/// Resource capability set an addon declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddonCapabilities {
    pub manifest: bool,
    pub streams: bool,
    pub catalog: bool,
    pub meta: bool,
    pub subtitle: bool,
}

impl AddonCapabilities {
    fn from_resources(resources: &[String]) -> Self {
        let has = |name: &str| resources.iter().any(|r| r == name);
        Self {
            manifest: true,
            streams: has("stream"),
            catalog: has("catalog"),
            meta: has("meta"),
            subtitle: has("subtitles"),
        }
    }
}

/// The addon protocol's manifest document, pared down to what we read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub resources: Vec<serde_json::Value>,
    pub types: Vec<String>,
    pub catalogs: Vec<ManifestCatalog>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: "0.0.0".to_string(),
            resources: Vec::new(),
            types: Vec::new(),
            catalogs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCatalog {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    streams: Vec<UnprocessedStream>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    metas: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    meta: Option<serde_json::Value>,
}

/// One upstream addon instance.
pub struct AddonClient {
    name: String,
    id: String,
    base_url: String,
    timeout: Duration,
    capabilities: AddonCapabilities,
    /// The debrid service this instance was expanded for, when any.
    service_id: Option<String>,
    /// Media types this instance answers for; empty means all.
    media_types: Vec<String>,
    skip_patterns: Vec<Regex>,
    client: Client,
}

/// Streams whose display text matches any of these are upstream noise
/// (placeholder entries, error banners), dropped before they reach the
/// aggregator.
fn default_skip_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)not\s+(?:yet\s+)?digitally\s+released",
            r"^\s*[⚠❌🚫]",
            r"(?i)^error[:\s]",
            r"(?i)invalid\s+(?:token|credentials)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("Invalid regex pattern defined in code"))
        .collect()
    })
}

impl AddonClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        resources: &[String],
        service_id: Option<String>,
        media_types: Vec<String>,
        extra_skip: &[String],
    ) -> Self {
        let mut skip_patterns: Vec<Regex> = default_skip_patterns().to_vec();
        for pattern in extra_skip {
            if let Ok(re) = Regex::new(pattern) {
                skip_patterns.push(re);
            }
        }
        Self {
            name: name.into(),
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            capabilities: AddonCapabilities::from_resources(resources),
            service_id,
            media_types,
            skip_patterns,
            client: Client::builder()
                .timeout(timeout)
                .user_agent(concat!("streamarr/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn capabilities(&self) -> AddonCapabilities {
        self.capabilities
    }

    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    /// Whether this instance answers for the given media type.
    #[must_use]
    pub fn serves_media_type(&self, media_type: &str) -> bool {
        self.media_types.is_empty() || self.media_types.iter().any(|t| t == media_type)
    }

    pub async fn manifest(&self) -> Result<Manifest, AddonError> {
        let url = format!("{}/manifest.json", self.base_url);
        let response = self.get(&url).await?;
        response
            .json()
            .await
            .map_err(|e| self.error(ErrorKind::ParseError, e.to_string()))
    }

    /// Fetches stream candidates. Never fails: transport and decode problems
    /// come back as [`AddonError`] values next to whatever did arrive.
    pub async fn get_streams(
        &self,
        media_type: &str,
        id: &str,
    ) -> (Vec<UnprocessedStream>, Vec<AddonError>) {
        if !self.capabilities.streams {
            return (Vec::new(), Vec::new());
        }

        let url = format!(
            "{}/stream/{media_type}/{}.json",
            self.base_url,
            urlencoding::encode(id)
        );

        let response = match self.get(&url).await {
            Ok(response) => response,
            Err(error) => return (Vec::new(), vec![error]),
        };

        let decoded: StreamsResponse = match response.json().await {
            Ok(decoded) => decoded,
            Err(e) => {
                return (
                    Vec::new(),
                    vec![self.error(ErrorKind::ParseError, e.to_string())],
                );
            }
        };

        let total = decoded.streams.len();
        let streams: Vec<UnprocessedStream> = decoded
            .streams
            .into_iter()
            .filter(|s| !self.should_skip(s))
            .collect();
        if streams.len() < total {
            debug!(
                addon = %self.name,
                dropped = total - streams.len(),
                "dropped skip-listed upstream streams"
            );
        }
        (streams, Vec::new())
    }

    pub async fn catalog(
        &self,
        media_type: &str,
        id: &str,
        extra: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, AddonError> {
        let url = match extra {
            Some(extra) => format!(
                "{}/catalog/{media_type}/{}/{}.json",
                self.base_url,
                urlencoding::encode(id),
                urlencoding::encode(extra)
            ),
            None => format!(
                "{}/catalog/{media_type}/{}.json",
                self.base_url,
                urlencoding::encode(id)
            ),
        };
        let response = self.get(&url).await?;
        let decoded: CatalogResponse = response
            .json()
            .await
            .map_err(|e| self.error(ErrorKind::ParseError, e.to_string()))?;
        Ok(decoded.metas)
    }

    pub async fn meta(
        &self,
        media_type: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, AddonError> {
        let url = format!(
            "{}/meta/{media_type}/{}.json",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self.get(&url).await?;
        let decoded: MetaResponse = response
            .json()
            .await
            .map_err(|e| self.error(ErrorKind::ParseError, e.to_string()))?;
        Ok(decoded.meta)
    }

    pub async fn subtitles(
        &self,
        media_type: &str,
        id: &str,
    ) -> Result<Vec<serde_json::Value>, AddonError> {
        #[derive(Deserialize)]
        struct SubtitlesResponse {
            #[serde(default)]
            subtitles: Vec<serde_json::Value>,
        }
        let url = format!(
            "{}/subtitles/{media_type}/{}.json",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self.get(&url).await?;
        let decoded: SubtitlesResponse = response
            .json()
            .await
            .map_err(|e| self.error(ErrorKind::ParseError, e.to_string()))?;
        Ok(decoded.subtitles)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, AddonError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AddonError::timeout(&self.name)
            } else {
                AddonError::network(&self.name, e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let kind = match status.as_u16() {
            401 | 403 => ErrorKind::Unauthorized,
            429 => ErrorKind::RateLimited,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::Network,
        };
        Err(self.error(kind, format!("upstream returned {status}")))
    }

    fn error(&self, kind: ErrorKind, description: String) -> AddonError {
        AddonError {
            addon_name: self.name.clone(),
            kind,
            description,
        }
    }

    fn should_skip(&self, stream: &UnprocessedStream) -> bool {
        let text = stream.canonical_text();
        if text.is_empty() && stream.url.is_none() && stream.info_hash.is_none() {
            return true;
        }
        self.skip_patterns.iter().any(|re| re.is_match(&text))
    }
}

impl std::fmt::Debug for AddonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}

/// Expands configured presets into concrete addon instances.
///
/// A preset with `use_multiple_instances` produces one instance per attached
/// debrid service (the service's id and credential are spliced into the
/// upstream config segment); `include_p2p` appends one extra credential-free
/// instance that serves raw peer-to-peer results.
#[must_use]
pub fn expand_presets(
    presets: &[PresetConfig],
    services: &[ServiceConfig],
    default_timeout: Duration,
) -> Vec<AddonClient> {
    let mut clients = Vec::new();

    for preset in presets {
        let Some(base_url) = preset.url.as_deref() else {
            continue;
        };
        let timeout = preset
            .timeout_secs
            .map_or(default_timeout, Duration::from_secs);

        let attached: Vec<&ServiceConfig> = services
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| preset.services.is_empty() || preset.services.contains(&s.id))
            .collect();

        if preset.use_multiple_instances && !attached.is_empty() {
            for service in &attached {
                let url = splice_config(base_url, &format!("{}={}", service.id, service.token));
                clients.push(AddonClient::new(
                    format!("{} ({})", preset.name, service.id),
                    format!("{}-{}", preset.name, service.id),
                    url,
                    timeout,
                    &preset.resources,
                    Some(service.id.clone()),
                    preset.media_types.clone(),
                    &preset.skip_patterns,
                ));
            }
        } else {
            let url = match attached.first() {
                Some(service) if preset.services_in_url => {
                    splice_config(base_url, &format!("{}={}", service.id, service.token))
                }
                _ => base_url.to_string(),
            };
            let service_id = if preset.services_in_url {
                attached.first().map(|s| s.id.clone())
            } else {
                None
            };
            clients.push(AddonClient::new(
                preset.name.clone(),
                preset.name.clone(),
                url,
                timeout,
                &preset.resources,
                service_id,
                preset.media_types.clone(),
                &preset.skip_patterns,
            ));
        }

        if preset.include_p2p {
            clients.push(AddonClient::new(
                format!("{} (P2P)", preset.name),
                format!("{}-p2p", preset.name),
                base_url.to_string(),
                timeout,
                &preset.resources,
                None,
                preset.media_types.clone(),
                &preset.skip_patterns,
            ));
        }
    }

    clients
}

/// Splices a config segment into an addon base URL. A `{config}` placeholder
/// is substituted when present; otherwise the segment becomes the last path
/// element, torrentio style.
fn splice_config(base_url: &str, segment: &str) -> String {
    if base_url.contains("{config}") {
        base_url.replace("{config}", segment)
    } else {
        format!("{}/{segment}", base_url.trim_end_matches('/'))
    }
}
