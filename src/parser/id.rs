use serde::{Deserialize, Serialize};
use std::fmt;

/// Media classification derived from the id namespace and the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
    Anime,
}

impl MediaKind {
    /// Maps the client's resource type discriminator onto a kind.
    #[must_use]
    pub fn from_resource_type(resource: &str) -> Option<Self> {
        match resource {
            "movie" => Some(Self::Movie),
            "series" | "tv" => Some(Self::Series),
            "anime" => Some(Self::Anime),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Movie => "movie",
            Self::Series => "series",
            Self::Anime => "anime",
        };
        f.write_str(s)
    }
}

/// Recognized external id namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdNamespace {
    Imdb,
    Tmdb,
    Tvdb,
    Kitsu,
    Anilist,
    Mal,
}

impl IdNamespace {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "imdb" | "tt" => Some(Self::Imdb),
            "tmdb" => Some(Self::Tmdb),
            "tvdb" => Some(Self::Tvdb),
            "kitsu" => Some(Self::Kitsu),
            "anilist" => Some(Self::Anilist),
            "mal" | "myanimelist" => Some(Self::Mal),
            _ => None,
        }
    }

    /// Anime-only catalogs imply the anime kind regardless of discriminator.
    #[must_use]
    pub const fn is_anime_namespace(self) -> bool {
        matches!(self, Self::Kitsu | Self::Anilist | Self::Mal)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Imdb => "imdb",
            Self::Tmdb => "tmdb",
            Self::Tvdb => "tvdb",
            Self::Kitsu => "kitsu",
            Self::Anilist => "anilist",
            Self::Mal => "mal",
        }
    }
}

/// An external identifier decomposed into its parts. Immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedId {
    pub namespace: IdNamespace,

    pub value: String,

    pub media_kind: MediaKind,

    pub season: Option<u32>,

    pub episode: Option<u32>,
}

impl ParsedId {
    /// Decodes any of the supported id forms:
    ///
    /// - `tt1375666`, `tt1375666:2:5`
    /// - `tmdb:12345`, `tmdb:12345:2:5`
    /// - `kitsu-7442`
    /// - bare digits (treated as tmdb, the only bare-numeric upstream)
    ///
    /// `resource` is the request-path discriminator (`movie`/`series`).
    #[must_use]
    pub fn parse(raw: &str, resource: &str) -> Option<Self> {
        let raw = raw.trim().trim_end_matches(".json");
        if raw.is_empty() {
            return None;
        }

        // tt-prefixed imdb, optionally with :season:episode
        if let Some(rest) = raw.strip_prefix("tt")
            && rest.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            let mut parts = rest.split(':');
            let digits = parts.next()?;
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let season = parts.next().and_then(|p| p.parse().ok());
            let episode = parts.next().and_then(|p| p.parse().ok());
            return Some(Self::build(
                IdNamespace::Imdb,
                format!("tt{digits}"),
                resource,
                season,
                episode,
            ));
        }

        // namespace:value[:season:episode]
        if raw.contains(':') {
            let mut parts = raw.split(':');
            let namespace = IdNamespace::parse(parts.next()?)?;
            let value = parts.next()?.to_string();
            if value.is_empty() {
                return None;
            }
            let season = parts.next().and_then(|p| p.parse().ok());
            let episode = parts.next().and_then(|p| p.parse().ok());
            return Some(Self::build(namespace, value, resource, season, episode));
        }

        // namespace-value
        if let Some((ns, value)) = raw.split_once('-')
            && let Some(namespace) = IdNamespace::parse(ns)
            && !value.is_empty()
        {
            return Some(Self::build(
                namespace,
                value.to_string(),
                resource,
                None,
                None,
            ));
        }

        // bare numeric
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Some(Self::build(
                IdNamespace::Tmdb,
                raw.to_string(),
                resource,
                None,
                None,
            ));
        }

        None
    }

    fn build(
        namespace: IdNamespace,
        value: String,
        resource: &str,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Self {
        let media_kind = if namespace.is_anime_namespace() {
            MediaKind::Anime
        } else {
            MediaKind::from_resource_type(resource).unwrap_or(if season.is_some() {
                MediaKind::Series
            } else {
                MediaKind::Movie
            })
        };
        Self {
            namespace,
            value,
            media_kind,
            season,
            episode,
        }
    }

    /// Canonical text form. Re-encoding a parsed id is idempotent:
    /// `encode(parse(encode(parse(x)))) == encode(parse(x))`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = if self.namespace == IdNamespace::Imdb {
            self.value.clone()
        } else {
            format!("{}:{}", self.namespace.as_str(), self.value)
        };
        if let (Some(season), Some(episode)) = (self.season, self.episode) {
            out.push_str(&format!(":{season}:{episode}"));
        }
        out
    }

    /// Cache key for search-metadata lookups.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.media_kind, self.encode())
    }
}

impl fmt::Display for ParsedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
