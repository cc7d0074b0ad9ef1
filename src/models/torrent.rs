use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated torrent info-hash: exactly 40 lowercase hex characters.
///
/// Usenet candidates reuse this type for their content digest, which is
/// truncated to the same width so both kinds share cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(String);

impl InfoHash {
    /// Parses and normalizes a hash string. Uppercase hex is accepted and
    /// lowered; anything that is not 40 hex characters is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != 40 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    /// Derives a usenet content digest from arbitrary identifying input
    /// (an NZB url or a service-assigned id), shaped like an info-hash.
    #[must_use]
    pub fn digest(input: &str) -> Self {
        use sha2::{Digest, Sha256};
        let hex = format!("{:x}", Sha256::digest(input.as_bytes()));
        Self(hex[..40].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds a magnet URI from this hash, a display name, and tracker URLs.
    #[must_use]
    pub fn to_magnet(&self, name: &str, trackers: &[String]) -> String {
        let mut magnet = format!(
            "magnet:?xt=urn:btih:{}&dn={}",
            self.0,
            urlencoding::encode(name)
        );
        for tracker in trackers {
            magnet.push_str("&tr=");
            magnet.push_str(&urlencoding::encode(tracker));
        }
        magnet
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for InfoHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom("invalid info hash"))
    }
}

/// Whether a candidate came from the torrent or usenet world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Torrent,
    Usenet,
}

/// A raw search/library candidate before it enters the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnprocessedTorrent {
    pub kind: SourceKind,

    pub hash: InfoHash,

    /// Tracker URLs usable to build a magnet on demand.
    #[serde(default)]
    pub sources: Vec<String>,

    pub title: String,

    pub size: u64,

    pub indexer: Option<String>,

    pub seeders: Option<u32>,

    /// Age in hours since publication, when the indexer reports it.
    pub age_hours: Option<u32>,

    pub download_url: Option<String>,

    pub nzb_url: Option<String>,

    /// Availability was confirmed by the owning service rather than inferred.
    #[serde(default)]
    pub confirmed: bool,

    /// The item already exists on the user's debrid account.
    #[serde(default)]
    pub is_library: bool,

    /// Service-side id of the owned item, set for library candidates so a
    /// later resolve can fetch it directly instead of re-adding by hash.
    pub service_item_id: Option<String>,
}

impl UnprocessedTorrent {
    #[must_use]
    pub fn magnet(&self) -> String {
        self.hash.to_magnet(&self.title, &self.sources)
    }
}
