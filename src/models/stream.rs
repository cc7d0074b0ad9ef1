use serde::{Deserialize, Serialize};

use super::parsed_file::ParsedFile;
use super::torrent::InfoHash;

/// Final stream classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Debrid,
    P2p,
    Usenet,
    Http,
    Live,
    Youtube,
}

/// The debrid service a stream routes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRef {
    pub id: String,

    pub short_name: String,

    /// Instant availability. `None` only while the candidate is still inside
    /// the processor; the availability step resolves it before output.
    pub cached: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonRef {
    pub name: String,
    pub id: String,
}

/// An error message attached to a single stream entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub title: String,
    pub description: String,
}

/// Top-level error taxonomy, stable across the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Network,
    Unauthorized,
    RateLimited,
    StoreLimitExceeded,
    NotFound,
    NoMatchingFile,
    ParseError,
    Internal,
}

impl ErrorKind {
    /// Whether the request as a whole may continue past this failure.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimited | Self::NotFound
        )
    }
}

/// A per-addon failure captured during aggregation. Never aborts siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonError {
    pub addon_name: String,

    pub kind: ErrorKind,

    pub description: String,
}

impl AddonError {
    #[must_use]
    pub fn timeout(addon_name: impl Into<String>) -> Self {
        Self {
            addon_name: addon_name.into(),
            kind: ErrorKind::Timeout,
            description: "timeout".to_string(),
        }
    }

    #[must_use]
    pub fn network(addon_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            addon_name: addon_name.into(),
            kind: ErrorKind::Network,
            description: description.into(),
        }
    }
}

/// Behavior hints carried on the upstream wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorHints {
    pub binge_group: Option<String>,
    pub filename: Option<String>,
    pub video_size: Option<u64>,
    pub not_web_ready: Option<bool>,
}

/// A stream exactly as an upstream addon returned it, before parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnprocessedStream {
    pub url: Option<String>,

    pub info_hash: Option<String>,

    pub file_idx: Option<u32>,

    pub name: Option<String>,

    pub title: Option<String>,

    pub description: Option<String>,

    pub behavior_hints: Option<BehaviorHints>,

    #[serde(default)]
    pub sources: Vec<String>,
}

impl UnprocessedStream {
    /// The canonical text the parser and regex filters run against.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in [&self.name, &self.title, &self.description] {
            if let Some(text) = part.as_deref()
                && !text.is_empty()
            {
                parts.push(text);
            }
        }
        parts.join("\n")
    }
}

/// A fully processed stream entry, ready for formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedStream {
    pub addon: AddonRef,

    pub kind: StreamKind,

    pub service: Option<ServiceRef>,

    pub url: Option<String>,

    pub info_hash: Option<InfoHash>,

    /// Tracker URLs for magnet construction when the URL is minted lazily.
    #[serde(default)]
    pub sources: Vec<String>,

    pub file_index: Option<u32>,

    pub size: Option<u64>,

    pub folder_size: Option<u64>,

    pub filename: Option<String>,

    pub folder_name: Option<String>,

    pub parsed_file: ParsedFile,

    pub seeders: Option<u32>,

    pub age_hours: Option<u32>,

    #[serde(default)]
    pub languages: Vec<String>,

    pub error: Option<StreamError>,

    pub message: Option<String>,

    #[serde(default)]
    pub library: bool,

    #[serde(default)]
    pub proxied: bool,

    #[serde(default)]
    pub private: bool,

    pub binge_group: Option<String>,

    /// Duration in seconds, when an upstream reported it.
    pub duration: Option<u32>,

    pub bitrate: Option<u64>,

    /// Service-side item id for library-owned streams; lets the resolver
    /// fetch the item directly.
    pub service_item_id: Option<String>,
}

impl ParsedStream {
    /// Every stream either has a direct URL or enough data to mint one.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.url.is_some() || self.info_hash.is_some()
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.service
            .as_ref()
            .is_some_and(|s| s.cached.unwrap_or(false))
    }

    /// The identity of the underlying content, used for deduplication.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<(InfoHash, Option<u32>)> {
        self.info_hash
            .clone()
            .map(|hash| (hash, self.file_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_skips_empty_parts() {
        let stream = UnprocessedStream {
            name: Some("Addon 1080p".to_string()),
            title: None,
            description: Some("Show.S01E01.mkv".to_string()),
            ..UnprocessedStream::default()
        };
        assert_eq!(stream.canonical_text(), "Addon 1080p\nShow.S01E01.mkv");
    }

    #[test]
    fn recoverability_split() {
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(ErrorKind::RateLimited.is_recoverable());
        assert!(!ErrorKind::Unauthorized.is_recoverable());
        assert!(!ErrorKind::StoreLimitExceeded.is_recoverable());
    }
}
