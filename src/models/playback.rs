use serde::{Deserialize, Serialize};

use super::torrent::{InfoHash, SourceKind};

/// Season/episode context carried into a lazy resolve so the file selector
/// can pick the right file out of a pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackMetadata {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub absolute_episode: Option<u32>,
}

impl PlaybackMetadata {
    /// Stable text form, part of the resolve fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}",
            self.season.map_or(String::new(), |s| s.to_string()),
            self.episode.map_or(String::new(), |e| e.to_string()),
            self.absolute_episode
                .map_or(String::new(), |e| e.to_string()),
        )
    }
}

/// Everything needed to produce a playback URL on demand.
///
/// Serialized (base64 of the JSON form) into the opaque handle embedded in a
/// stream entry, and decoded again when the client dereferences it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackInfo {
    pub kind: SourceKind,

    pub service_id: String,

    pub hash: InfoHash,

    pub nzb_url: Option<String>,

    pub download_url: Option<String>,

    /// Tracker URLs for magnet construction.
    #[serde(default)]
    pub sources: Vec<String>,

    pub metadata: Option<PlaybackMetadata>,

    pub file_index: Option<u32>,

    pub filename: Option<String>,

    /// When set, the item is already on the account and is fetched directly.
    pub service_item_id: Option<String>,

    #[serde(default)]
    pub private: bool,
}

impl PlaybackInfo {
    /// Encodes this info into the opaque URL-safe token placed in stream
    /// entries.
    #[must_use]
    pub fn to_token(&self) -> String {
        use base64::Engine;
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a token minted by [`Self::to_token`].
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let info = PlaybackInfo {
            kind: SourceKind::Torrent,
            service_id: "torbox".to_string(),
            hash: InfoHash::parse(&"b".repeat(40)).unwrap(),
            nzb_url: None,
            download_url: None,
            sources: vec!["udp://t.example:80".to_string()],
            metadata: Some(PlaybackMetadata {
                season: Some(1),
                episode: Some(2),
                absolute_episode: None,
            }),
            file_index: None,
            filename: Some("a.mkv".to_string()),
            service_item_id: None,
            private: false,
        };
        let token = info.to_token();
        let decoded = PlaybackInfo::from_token(&token).unwrap();
        assert_eq!(decoded.service_id, "torbox");
        assert_eq!(decoded.hash, info.hash);
        assert_eq!(decoded.metadata.unwrap().fingerprint(), "1:2:");
    }

    #[test]
    fn bad_token_is_none() {
        assert!(PlaybackInfo::from_token("!!!not-base64!!!").is_none());
        assert!(PlaybackInfo::from_token("aGVsbG8").is_none());
    }
}
