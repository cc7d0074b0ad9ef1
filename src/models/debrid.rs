use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::torrent::InfoHash;

/// Lifecycle of an item on a debrid account.
///
/// Only `Downloaded` yields a playback URL; `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    /// Present in the service's shared cache but not yet materialized on
    /// this account.
    Cached,
    Downloaded,
    Error,
}

impl DownloadStatus {
    #[must_use]
    pub const fn is_playable(self) -> bool {
        matches!(self, Self::Downloaded)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Downloaded | Self::Error)
    }
}

/// One file inside a debrid item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridFile {
    /// Positional index within the bundle, when the service exposes one.
    pub index: Option<u32>,

    pub id: Option<String>,

    /// Path-qualified name as reported by the service.
    pub name: String,

    pub size: u64,

    pub link: Option<String>,

    pub mime_type: Option<String>,
}

impl DebridFile {
    /// Video detection: trust the reported mime type, fall back to guessing
    /// from the filename extension.
    #[must_use]
    pub fn is_video(&self) -> bool {
        if let Some(mime) = &self.mime_type {
            return mime.starts_with("video/");
        }
        mime_guess::from_path(&self.name)
            .first()
            .is_some_and(|m| m.type_() == mime_guess::mime::VIDEO)
    }

    /// Directory depth of the reported path, used as a selection tie-break.
    #[must_use]
    pub fn path_depth(&self) -> usize {
        self.name.matches('/').count()
    }

    /// The final path component.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// A single item on a debrid account, as returned by list/get operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebridDownload {
    pub id: String,

    pub hash: Option<InfoHash>,

    pub name: Option<String>,

    pub status: DownloadStatus,

    pub size: Option<u64>,

    #[serde(default)]
    pub files: Vec<DebridFile>,

    pub added_at: Option<DateTime<Utc>>,

    /// Private items are never auto-removed after playback.
    #[serde(default)]
    pub private: bool,
}

impl DebridDownload {
    #[must_use]
    pub fn video_files(&self) -> Vec<&DebridFile> {
        self.files.iter().filter(|f| f.is_video()).collect()
    }
}

/// Result of an instant-availability probe for one hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantAvailability {
    pub hash: InfoHash,

    pub cached: bool,

    pub size: Option<u64>,

    #[serde(default)]
    pub files: Vec<DebridFile>,

    /// Set when the hash was cross-referenced against the account library.
    #[serde(default)]
    pub library: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(DownloadStatus::Downloaded.is_playable());
        assert!(!DownloadStatus::Cached.is_playable());
        assert!(DownloadStatus::Error.is_terminal());
        assert!(!DownloadStatus::Downloading.is_terminal());
    }

    #[test]
    fn video_detection_by_extension_and_mime() {
        let mkv = DebridFile {
            index: Some(0),
            id: None,
            name: "Show/Show.S01E01.mkv".to_string(),
            size: 1,
            link: None,
            mime_type: None,
        };
        assert!(mkv.is_video());
        assert_eq!(mkv.path_depth(), 1);
        assert_eq!(mkv.basename(), "Show.S01E01.mkv");

        let nfo = DebridFile {
            mime_type: Some("text/plain".to_string()),
            name: "readme.mkv".to_string(),
            ..mkv.clone()
        };
        assert!(!nfo.is_video());
    }
}
