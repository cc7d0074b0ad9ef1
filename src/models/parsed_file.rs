use serde::{Deserialize, Serialize};

/// Structured attributes extracted from a release title or filename.
///
/// Every field is optional; the parser never fails, it just leaves what it
/// could not recognize unset. Array fields are sets, order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedFile {
    pub title: Option<String>,

    pub year: Option<i32>,

    pub seasons: Vec<u32>,

    pub episodes: Vec<u32>,

    pub resolution: Option<String>,

    pub quality: Option<String>,

    pub encode: Option<String>,

    pub release_group: Option<String>,

    pub edition: Option<String>,

    pub repack: bool,

    pub remastered: bool,

    pub uncensored: bool,

    pub unrated: bool,

    pub upscaled: bool,

    pub network: Option<String>,

    pub container: Option<String>,

    pub extension: Option<String>,

    pub visual_tags: Vec<String>,

    pub audio_tags: Vec<String>,

    pub audio_channels: Vec<String>,

    pub languages: Vec<String>,

    /// Seasons declared by the enclosing folder rather than the file itself.
    pub folder_seasons: Vec<u32>,

    pub folder_episodes: Vec<u32>,

    pub season_pack: bool,
}

impl ParsedFile {
    /// Merges file-level and folder-level parses into one view.
    ///
    /// Scalars prefer the file except `title`, which prefers the folder
    /// (folder names carry the release title, files often only the episode).
    /// Arrays union-merge and `season_pack` OR-merges. The folder's own
    /// seasons/episodes land in the `folder_*` fields.
    #[must_use]
    pub fn merge(file: Self, folder: Self) -> Self {
        Self {
            title: folder.title.or(file.title.clone()),
            year: file.year.or(folder.year),
            folder_seasons: union(folder.seasons.clone(), file.folder_seasons.clone()),
            folder_episodes: union(folder.episodes.clone(), file.folder_episodes.clone()),
            seasons: file.seasons,
            episodes: file.episodes,
            resolution: file.resolution.or(folder.resolution),
            quality: file.quality.or(folder.quality),
            encode: file.encode.or(folder.encode),
            release_group: file.release_group.or(folder.release_group),
            edition: file.edition.or(folder.edition),
            repack: file.repack || folder.repack,
            remastered: file.remastered || folder.remastered,
            uncensored: file.uncensored || folder.uncensored,
            unrated: file.unrated || folder.unrated,
            upscaled: file.upscaled || folder.upscaled,
            network: file.network.or(folder.network),
            container: file.container.or(folder.container),
            extension: file.extension.or(folder.extension),
            visual_tags: union(file.visual_tags, folder.visual_tags),
            audio_tags: union(file.audio_tags, folder.audio_tags),
            audio_channels: union(file.audio_channels, folder.audio_channels),
            languages: union(file.languages, folder.languages),
            season_pack: file.season_pack || folder.season_pack,
        }
    }

    /// True when the parse declares the requested season, or declares none.
    #[must_use]
    pub fn covers_season(&self, season: u32) -> bool {
        self.seasons.is_empty() || self.seasons.contains(&season)
    }
}

fn union<T: PartialEq>(mut a: Vec<T>, b: Vec<T>) -> Vec<T> {
    for item in b {
        if !a.contains(&item) {
            a.push(item);
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_file_scalars_but_folder_title() {
        let file = ParsedFile {
            title: Some("S02E05".to_string()),
            resolution: Some("1080p".to_string()),
            ..ParsedFile::default()
        };
        let folder = ParsedFile {
            title: Some("My Show".to_string()),
            resolution: Some("720p".to_string()),
            ..ParsedFile::default()
        };
        let merged = ParsedFile::merge(file, folder);
        assert_eq!(merged.title.as_deref(), Some("My Show"));
        assert_eq!(merged.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn merge_unions_arrays_and_ors_season_pack() {
        let file = ParsedFile {
            languages: vec!["en".to_string()],
            season_pack: false,
            ..ParsedFile::default()
        };
        let folder = ParsedFile {
            languages: vec!["en".to_string(), "ja".to_string()],
            seasons: vec![2],
            season_pack: true,
            ..ParsedFile::default()
        };
        let merged = ParsedFile::merge(file, folder);
        assert_eq!(merged.languages, vec!["en".to_string(), "ja".to_string()]);
        assert_eq!(merged.folder_seasons, vec![2]);
        assert!(merged.season_pack);
    }
}
