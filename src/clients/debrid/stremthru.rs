//! StremThru-backed store family.
//!
//! StremThru fronts several debrid stores behind one API; the store name
//! parameterizes the adapter, so one implementation covers the whole family.
//! Torrent-capable only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{DebridError, DebridErrorKind, TorrentCapable};
use crate::models::{
    DebridDownload, DebridFile, DownloadStatus, InfoHash, InstantAvailability,
};

const DEFAULT_BASE_URL: &str = "https://stremthru.elfhosted.com";

/// StremThru pages between 100 and 500 items.
const PAGE_SIZE_MIN: u32 = 100;
const PAGE_SIZE_MAX: u32 = 500;

#[derive(Debug, Clone)]
pub struct StremThruConfig {
    /// Which underlying store to drive (realdebrid, alldebrid, premiumize…).
    pub store: String,

    pub token: String,

    pub client_ip: Option<String>,

    pub base_url: Option<String>,

    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct StremThruClient {
    client: Client,
    base_url: String,
    store: String,
    token: String,
    client_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    error: Option<ApiErrorBody>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MagnetList {
    #[serde(default)]
    items: Vec<Magnet>,
    #[serde(default)]
    total_items: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Magnet {
    id: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    files: Vec<MagnetFile>,
    #[serde(default)]
    added_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MagnetFile {
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckData {
    #[serde(default)]
    items: Vec<CheckItem>,
}

#[derive(Debug, Deserialize)]
struct CheckItem {
    hash: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    files: Vec<MagnetFile>,
}

#[derive(Debug, Deserialize)]
struct GeneratedLink {
    link: String,
}

fn map_status(status: Option<&str>) -> DownloadStatus {
    match status {
        Some("downloaded") => DownloadStatus::Downloaded,
        Some("cached") => DownloadStatus::Cached,
        Some("downloading" | "processing" | "uploading") => DownloadStatus::Downloading,
        Some("failed" | "invalid" | "error") => DownloadStatus::Error,
        _ => DownloadStatus::Queued,
    }
}

impl Magnet {
    fn into_download(self) -> DebridDownload {
        let status = map_status(self.status.as_deref());
        DebridDownload {
            id: self.id,
            hash: self.hash.as_deref().and_then(InfoHash::parse),
            name: self.name,
            status,
            size: self.size,
            files: self.files.into_iter().map(MagnetFile::into_file).collect(),
            added_at: self.added_at,
            private: false,
        }
    }
}

impl MagnetFile {
    fn into_file(self) -> DebridFile {
        let name = self
            .path
            .or(self.name)
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();
        DebridFile {
            index: self.index.and_then(|i| u32::try_from(i).ok()),
            id: None,
            name,
            size: self.size.unwrap_or(0),
            link: self.link,
            mime_type: None,
        }
    }
}

impl StremThruClient {
    pub fn new(config: StremThruConfig) -> Self {
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
            store: config.store,
            token: config.token,
            client_ip: config.client_ip,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("X-StremThru-Store-Name", &self.store)
            .bearer_auth(&self.token)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DebridError> {
        let status = response.status();
        if !status.is_success() {
            let headers = response
                .headers()
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let body = response.text().await.unwrap_or_default();
            return Err(DebridError::from_response(status, headers, body));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(DebridError::from_transport)?;

        if let Some(error) = envelope.error {
            let code = error.code.unwrap_or_default();
            let kind = match code.as_str() {
                "FORBIDDEN" | "UNAUTHORIZED" => DebridErrorKind::Unauthorized,
                "STORE_LIMIT_EXCEEDED" => DebridErrorKind::StoreLimitExceeded,
                "TOO_MANY_REQUESTS" => DebridErrorKind::TooManyRequests,
                "NOT_FOUND" | "MAGNET_INVALID" => DebridErrorKind::NotFound,
                "NOT_IMPLEMENTED" => DebridErrorKind::NotImplemented,
                _ => DebridErrorKind::Unknown,
            };
            return Err(DebridError::new(
                kind,
                status.as_u16(),
                error.message.unwrap_or(code),
            ));
        }

        envelope.data.ok_or_else(|| {
            DebridError::new(
                DebridErrorKind::Unknown,
                status.as_u16(),
                "StremThru response carried no data",
            )
        })
    }
}

#[async_trait]
impl TorrentCapable for StremThruClient {
    async fn list_magnets(
        &self,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Vec<DebridDownload>, DebridError> {
        let limit = page_size.clamp(PAGE_SIZE_MIN, PAGE_SIZE_MAX);
        let mut all = Vec::new();
        for page in 0..max_pages.max(1) {
            let offset = page * limit;
            let response = self
                .request(reqwest::Method::GET, "/v0/store/magnets")
                .query(&[("limit", limit.to_string()), ("offset", offset.to_string())])
                .send()
                .await
                .map_err(DebridError::from_transport)?;
            let data: MagnetList = Self::decode(response).await?;
            let count = data.items.len();
            all.extend(data.items.into_iter().map(Magnet::into_download));
            let done = count < limit as usize
                || data
                    .total_items
                    .is_some_and(|total| (all.len() as u64) >= total);
            if done {
                break;
            }
        }
        Ok(all)
    }

    async fn get_magnet(&self, id: &str) -> Result<DebridDownload, DebridError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v0/store/magnets/{id}"))
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        let magnet: Magnet = Self::decode(response).await?;
        Ok(magnet.into_download())
    }

    async fn remove_magnet(&self, id: &str) -> Result<(), DebridError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/v0/store/magnets/{id}"))
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn add_magnet(&self, magnet: &str) -> Result<DebridDownload, DebridError> {
        let response = self
            .request(reqwest::Method::POST, "/v0/store/magnets")
            .json(&serde_json::json!({ "magnet": magnet }))
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        let magnet: Magnet = Self::decode(response).await?;
        Ok(magnet.into_download())
    }

    async fn add_torrent(&self, _url: &str) -> Result<DebridDownload, DebridError> {
        // The store family only accepts magnets on the wire.
        Err(DebridError::not_implemented("add_torrent"))
    }

    async fn check_magnets(
        &self,
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
        let mut request = self
            .request(reqwest::Method::GET, "/v0/store/magnets/check")
            .query(&[("magnet", joined)]);
        if let Some(ip) = &self.client_ip {
            request = request.query(&[("client_ip", ip.clone())]);
        }
        let response = request.send().await.map_err(DebridError::from_transport)?;
        let data: CheckData = Self::decode(response).await?;

        let mut results: Vec<InstantAvailability> = data
            .items
            .into_iter()
            .filter_map(|item| {
                let hash = InfoHash::parse(&item.hash)?;
                let cached = item.status.as_deref() == Some("cached");
                let files: Vec<DebridFile> =
                    item.files.into_iter().map(MagnetFile::into_file).collect();
                let size = files.iter().map(|f| f.size).max();
                Some(InstantAvailability {
                    hash,
                    cached,
                    size,
                    files,
                    library: false,
                })
            })
            .collect();

        // Hashes the service omitted are definitively not cached.
        for hash in hashes {
            if !results.iter().any(|r| &r.hash == hash) {
                results.push(InstantAvailability {
                    hash: hash.clone(),
                    cached: false,
                    size: None,
                    files: Vec::new(),
                    library: false,
                });
            }
        }
        Ok(results)
    }

    async fn generate_torrent_link(
        &self,
        link: &str,
        client_ip: Option<&str>,
    ) -> Result<String, DebridError> {
        let mut body = serde_json::json!({ "link": link });
        if let Some(ip) = client_ip.or(self.client_ip.as_deref()) {
            body["clientIp"] = serde_json::Value::String(ip.to_string());
        }
        let response = self
            .request(reqwest::Method::POST, "/v0/store/link/generate")
            .json(&body)
            .send()
            .await
            .map_err(DebridError::from_transport)?;
        let generated: GeneratedLink = Self::decode(response).await?;
        Ok(generated.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_family_states() {
        assert_eq!(map_status(Some("downloaded")), DownloadStatus::Downloaded);
        assert_eq!(map_status(Some("cached")), DownloadStatus::Cached);
        assert_eq!(map_status(Some("processing")), DownloadStatus::Downloading);
        assert_eq!(map_status(Some("failed")), DownloadStatus::Error);
        assert_eq!(map_status(Some("queued")), DownloadStatus::Queued);
        assert_eq!(map_status(None), DownloadStatus::Queued);
    }

    #[test]
    fn file_path_preferred_over_name() {
        let file = MagnetFile {
            index: Some(0),
            name: Some("ep.mkv".to_string()),
            path: Some("/Show/ep.mkv".to_string()),
            size: Some(10),
            link: None,
        };
        let converted = file.into_file();
        assert_eq!(converted.name, "Show/ep.mkv");
    }

    #[test]
    fn envelope_error_decodes() {
        let body = r#"{"error":{"code":"STORE_LIMIT_EXCEEDED","message":"quota"},"data":null}"#;
        let envelope: ApiEnvelope<MagnetList> = serde_json::from_str(body).unwrap();
        assert_eq!(
            envelope.error.unwrap().code.as_deref(),
            Some("STORE_LIMIT_EXCEEDED")
        );
    }
}
