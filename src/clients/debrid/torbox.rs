//! TorBox adapter: implements both the torrent and usenet capability sets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{DebridError, DebridErrorKind, TorrentCapable, UsenetCapable};
use crate::models::{
    DebridDownload, DebridFile, DownloadStatus, InfoHash, InstantAvailability,
};

const DEFAULT_BASE_URL: &str = "https://api.torbox.app";

/// TorBox paginates between 100 and 1000 items per page.
const PAGE_SIZE_MIN: u32 = 100;
const PAGE_SIZE_MAX: u32 = 1000;

#[derive(Debug, Clone)]
pub struct TorBoxConfig {
    pub token: String,

    pub client_ip: Option<String>,

    pub base_url: Option<String>,

    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TorBoxClient {
    client: Client,
    base_url: String,
    token: String,
    client_ip: Option<String>,
}

/// Envelope every TorBox endpoint wraps its payload in.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TorBoxItem {
    id: i64,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    download_state: Option<String>,
    #[serde(default)]
    download_finished: bool,
    #[serde(default)]
    download_present: bool,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    files: Vec<TorBoxFile>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct TorBoxFile {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CachedEntry {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    files: Vec<TorBoxFile>,
}

#[derive(Debug, Deserialize)]
struct RequestDlData {
    #[serde(alias = "download_url", alias = "url")]
    link: String,
}

impl TorBoxItem {
    fn status(&self) -> DownloadStatus {
        if self.download_finished && self.download_present {
            return DownloadStatus::Downloaded;
        }
        match self.download_state.as_deref() {
            Some("error" | "failed" | "missing") => DownloadStatus::Error,
            Some("queued" | "checking" | "metaDL" | "stalled (no seeds)") => DownloadStatus::Queued,
            Some("cached") => DownloadStatus::Cached,
            _ if self.progress.unwrap_or(0.0) > 0.0 => DownloadStatus::Downloading,
            _ => DownloadStatus::Queued,
        }
    }

    fn into_download(self) -> DebridDownload {
        let status = self.status();
        DebridDownload {
            id: self.id.to_string(),
            hash: self.hash.as_deref().and_then(InfoHash::parse),
            name: self.name,
            status,
            size: self.size,
            files: self
                .files
                .into_iter()
                .map(|f| f.into_file(self.id))
                .collect(),
            added_at: self.created_at,
            private: self.private,
        }
    }
}

impl TorBoxFile {
    fn into_file(self, item_id: i64) -> DebridFile {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        DebridFile {
            index: Some(self.id as u32),
            id: Some(self.id.to_string()),
            name: self
                .name
                .or(self.short_name)
                .unwrap_or_else(|| format!("file-{}", self.id)),
            size: self.size.unwrap_or(0),
            // requestdl wants the owning item and the file; carry both.
            link: Some(format!("{item_id}:{}", self.id)),
            mime_type: self.mimetype,
        }
    }
}

impl TorBoxClient {
    pub fn new(config: TorBoxConfig) -> Self {
        let timeout = config.timeout.unwrap_or(Duration::from_secs(30));
        Self {
            client: Client::builder()
                .timeout(timeout)
                .user_agent(concat!("streamarr/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token: config.token,
            client_ip: config.client_ip,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DebridError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        Self::decode(response).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, DebridError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(form)
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DebridError> {
        let status = response.status();
        if !status.is_success() {
            let headers = collect_headers(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(DebridError::from_response(status, headers, body));
        }

        let body = response
            .text()
            .await
            .map_err(DebridError::from_transport)?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            debug!(error = %e, "failed to parse TorBox response");
            DebridError::new(DebridErrorKind::Unknown, status.as_u16(), e.to_string())
        })?;

        if !envelope.success {
            let detail = envelope
                .error
                .or(envelope.detail)
                .unwrap_or_else(|| "unspecified TorBox error".to_string());
            let kind = match detail.as_str() {
                d if d.contains("AUTH") => DebridErrorKind::Unauthorized,
                d if d.contains("ACTIVE_LIMIT") || d.contains("PLAN") => {
                    DebridErrorKind::StoreLimitExceeded
                }
                d if d.contains("NOT_FOUND") => DebridErrorKind::NotFound,
                _ => DebridErrorKind::Unknown,
            };
            return Err(DebridError::new(kind, status.as_u16(), detail));
        }

        envelope.data.ok_or_else(|| {
            DebridError::new(
                DebridErrorKind::Unknown,
                status.as_u16(),
                "TorBox response carried no data",
            )
        })
    }

    async fn list(
        &self,
        path: &str,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError> {
        let limit = page_size.clamp(PAGE_SIZE_MIN, PAGE_SIZE_MAX);
        let mut all = Vec::new();
        for page in 0..max_pages.max(1) {
            let offset = page * limit;
            let items: Vec<TorBoxItem> = self
                .get_json(
                    path,
                    &[
                        ("offset", offset.to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?;
            let count = items.len();
            all.extend(items.into_iter().map(TorBoxItem::into_download));
            if count < limit as usize {
                break;
            }
        }
        Ok(all)
    }

    async fn get_one(&self, path: &str, id: &str) -> Result<DebridDownload, DebridError> {
        let item: TorBoxItem = self
            .get_json(
                path,
                &[
                    ("id", id.to_string()),
                    ("bypass_cache", "true".to_string()),
                ],
            )
            .await?;
        Ok(item.into_download())
    }

    async fn check(
        &self,
        path: &str,
        hashes: &[InfoHash],
    ) -> Result<Vec<InstantAvailability>, DebridError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let joined = hashes
            .iter()
            .map(InfoHash::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let found: std::collections::HashMap<String, CachedEntry> = self
            .get_json(
                path,
                &[
                    ("hash", joined),
                    ("format", "object".to_string()),
                    ("list_files", "true".to_string()),
                ],
            )
            .await?;

        Ok(hashes
            .iter()
            .map(|hash| match found.get(hash.as_str()) {
                Some(entry) => InstantAvailability {
                    hash: hash.clone(),
                    cached: true,
                    size: entry.size,
                    files: entry
                        .files
                        .iter()
                        .map(|f| DebridFile {
                            index: u32::try_from(f.id).ok(),
                            id: Some(f.id.to_string()),
                            name: f
                                .name
                                .clone()
                                .or_else(|| f.short_name.clone())
                                .unwrap_or_default(),
                            size: f.size.unwrap_or(0),
                            link: None,
                            mime_type: f.mimetype.clone(),
                        })
                        .collect(),
                    library: false,
                },
                None => InstantAvailability {
                    hash: hash.clone(),
                    cached: false,
                    size: None,
                    files: Vec::new(),
                    library: false,
                },
            })
            .collect())
    }

    async fn request_dl(
        &self,
        kind: &str,
        item_id: &str,
        file_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        let mut query = vec![
            ("token", self.token.clone()),
            (
                match kind {
                    "usenet" => "usenet_id",
                    _ => "torrent_id",
                },
                item_id.to_string(),
            ),
        ];
        if let Some(file_id) = file_id {
            query.push(("file_id", file_id.to_string()));
        }
        if let Some(ip) = client_ip.or(self.client_ip.as_deref()) {
            query.push(("user_ip", ip.to_string()));
        }
        let data: RequestDlData = self
            .get_json(&format!("/v1/api/{kind}/requestdl"), &query)
            .await?;
        Ok(data.link)
    }
}

#[async_trait]
impl TorrentCapable for TorBoxClient {
    async fn list_magnets(
        &self,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError> {
        self.list("/v1/api/torrents/mylist", page_size, max_pages)
            .await
    }

    async fn get_magnet(&self, id: &str) -> Result<DebridDownload, DebridError> {
        self.get_one("/v1/api/torrents/mylist", id).await
    }

    async fn remove_magnet(&self, id: &str) -> Result<(), DebridError> {
        let _: serde_json::Value = self
            .post_form(
                "/v1/api/torrents/controltorrent",
                &[
                    ("torrent_id", id.to_string()),
                    ("operation", "delete".to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError> {
        let item: TorBoxItem = self
            .post_form(
                "/v1/api/torrents/createtorrent",
                &[("magnet", magnet.to_string())],
            )
            .await?;
        Ok(item.into_download())
    }

    async fn add_torrent(&self, url: &str) -> Result<DebridDownload, DebridError> {
        let item: TorBoxItem = self
            .post_form(
                "/v1/api/torrents/createtorrent",
                &[("url", url.to_string())],
            )
            .await?;
        Ok(item.into_download())
    }

    async fn check_magnets(
        &self,
        hashes: &[InfoHash],
    ) -> Result<Vec<InstantAvailability>, DebridError> {
        self.check("/v1/api/torrents/checkcached", hashes).await
    }

    async fn generate_torrent_link(
        &self,
        link: &str,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        // Links minted by this adapter are "{item_id}:{file_id}".
        let (item_id, file_id) = link
            .split_once(':')
            .ok_or_else(|| DebridError::new(DebridErrorKind::Unknown, 0, "malformed link token"))?;
        self.request_dl("torrents", item_id, Some(file_id), client_ip)
            .await
    }
}

#[async_trait]
impl UsenetCapable for TorBoxClient {
    async fn list_nzbs(
        &self,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError> {
        self.list("/v1/api/usenet/mylist", page_size, max_pages)
            .await
    }

    async fn get_nzb(&self, id: &str) -> Result<DebridDownload, DebridError> {
        self.get_one("/v1/api/usenet/mylist", id).await
    }

    async fn remove_nzb(&self, id: &str) -> Result<(), DebridError> {
        let _: serde_json::Value = self
            .post_form(
                "/v1/api/usenet/controlusenetdownload",
                &[
                    ("usenet_id", id.to_string()),
                    ("operation", "delete".to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn add_nzb(&self, url: &str, name: &str) -> Result<DebridDownload, DebridError> {
        let item: TorBoxItem = self
            .post_form(
                "/v1/api/usenet/createusenetdownload",
                &[("link", url.to_string()), ("name", name.to_string())],
            )
            .await?;
        Ok(item.into_download())
    }

    async fn check_nzbs(
        &self,
        hashes: &[InfoHash],
    ) -> Result<Vec<InstantAvailability>, DebridError> {
        self.check("/v1/api/usenet/checkcached", hashes).await
    }

    async fn generate_usenet_link(
        &self,
        download_id: &str,
        file_id: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        self.request_dl("usenet", download_id, file_id, client_ip)
            .await
    }
}

fn collect_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let base = TorBoxItem {
            id: 1,
            hash: None,
            name: None,
            size: None,
            download_state: None,
            download_finished: false,
            download_present: false,
            progress: None,
            files: vec![],
            created_at: None,
            private: false,
        };

        let finished = TorBoxItem {
            download_finished: true,
            download_present: true,
            ..base
        };
        assert_eq!(finished.status(), DownloadStatus::Downloaded);

        let erroring = TorBoxItem {
            id: 2,
            hash: None,
            name: None,
            size: None,
            download_state: Some("error".to_string()),
            download_finished: false,
            download_present: false,
            progress: None,
            files: vec![],
            created_at: None,
            private: false,
        };
        assert_eq!(erroring.status(), DownloadStatus::Error);

        let in_flight = TorBoxItem {
            id: 3,
            hash: None,
            name: None,
            size: None,
            download_state: Some("downloading".to_string()),
            download_finished: false,
            download_present: false,
            progress: Some(0.4),
            files: vec![],
            created_at: None,
            private: false,
        };
        assert_eq!(in_flight.status(), DownloadStatus::Downloading);
    }

    #[test]
    fn file_link_carries_item_and_file_ids() {
        let file = TorBoxFile {
            id: 7,
            name: Some("Show/ep.mkv".to_string()),
            short_name: None,
            size: Some(100),
            mimetype: Some("video/x-matroska".to_string()),
        };
        let converted = file.into_file(42);
        assert_eq!(converted.link.as_deref(), Some("42:7"));
        assert_eq!(converted.index, Some(7));
    }

    #[test]
    fn envelope_error_maps_to_kind() {
        let body = r#"{"success":false,"error":"BAD_TOKEN_AUTH","data":null}"#;
        let envelope: ApiEnvelope<Vec<TorBoxItem>> = serde_json::from_str(body).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("BAD_TOKEN_AUTH"));
    }
}
