use serde::{Deserialize, Serialize};

/// Everything the fan-out needs to know about the requested title.
///
/// Built once per request from the parsed id plus a metadata lookup, then
/// passed immutably to every addon call, the library search, and the file
/// selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub primary_title: String,

    /// All known titles: primary, aliases, localized variants.
    pub titles: Vec<String>,

    pub year: Option<i32>,

    pub season: Option<u32>,

    pub episode: Option<u32>,

    /// Episode number counted across all seasons, for absolute-numbered
    /// releases (common for long-running anime).
    pub absolute_episode: Option<u32>,

    /// Absolute number counted from the first episode of the requested
    /// season's continuity block, for split-cour releases.
    pub relative_absolute_episode: Option<u32>,

    pub is_anime: bool,

    /// Runtime in minutes.
    pub runtime: Option<u32>,

    pub genres: Vec<String>,

    /// ISO 639-1 code of the original language, when known.
    pub original_language: Option<String>,

    pub imdb_id: Option<String>,

    pub tmdb_id: Option<i64>,

    pub anilist_id: Option<i64>,
}

impl SearchMetadata {
    /// The set of episode numbers a series candidate may declare and still
    /// match this request.
    #[must_use]
    pub fn acceptable_episodes(&self) -> Vec<u32> {
        let mut episodes = Vec::new();
        for candidate in [
            self.episode,
            self.absolute_episode,
            self.relative_absolute_episode,
        ]
        .into_iter()
        .flatten()
        {
            if !episodes.contains(&candidate) {
                episodes.push(candidate);
            }
        }
        episodes
    }

    #[must_use]
    pub const fn is_series_request(&self) -> bool {
        self.season.is_some() || self.episode.is_some()
    }
}
