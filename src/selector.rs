//! Picks exactly one file out of a multi-file debrid bundle.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::clients::debrid::DebridError;
use crate::matcher;
use crate::models::{DebridDownload, DebridFile, ParsedFile, PlaybackMetadata, SearchMetadata};
use crate::parser::parse_title;

/// What the caller is trying to play. Movies leave everything unset.
#[derive(Debug, Clone, Default)]
pub struct EpisodeTarget {
    pub season: Option<u32>,
    /// Any of these episode numbers is acceptable (plain, absolute,
    /// relative-absolute).
    pub episodes: Vec<u32>,
}

impl EpisodeTarget {
    #[must_use]
    pub fn from_search(meta: &SearchMetadata) -> Self {
        Self {
            season: meta.season,
            episodes: meta.acceptable_episodes(),
        }
    }

    #[must_use]
    pub fn from_playback(meta: &PlaybackMetadata) -> Self {
        let mut episodes = Vec::new();
        for episode in [meta.episode, meta.absolute_episode].into_iter().flatten() {
            if !episodes.contains(&episode) {
                episodes.push(episode);
            }
        }
        Self {
            season: meta.season,
            episodes,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.season.is_none() && self.episodes.is_empty()
    }
}

/// Optional caller overrides, honored when they pass the same constraints
/// the automatic pick would.
#[derive(Debug, Clone, Default)]
pub struct SelectionHints<'a> {
    pub chosen_filename: Option<&'a str>,
    pub chosen_index: Option<u32>,
}

/// Deterministically selects the file to play.
///
/// Candidate filenames and the container's own name are parsed once; series
/// requests eliminate files whose seasons or episodes disagree with the
/// target (season packs whose folder-level season matches stay eligible).
/// Ties break on video-ness, size, path depth, then name.
pub fn select_file<'a>(
    download: &'a DebridDownload,
    target: Option<&EpisodeTarget>,
    hints: &SelectionHints<'_>,
) -> Result<&'a DebridFile, DebridError> {
    if download.files.is_empty() {
        return Err(DebridError::no_matching_file());
    }

    let container = download.name.as_deref().map(parse_title).unwrap_or_default();
    let parses: HashMap<usize, ParsedFile> = download
        .files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let parsed = ParsedFile::merge(parse_title(file.basename()), container.clone());
            (i, parsed)
        })
        .collect();

    let eligible: Vec<usize> = (0..download.files.len())
        .filter(|i| target.is_none_or(|t| passes_target(&parses[i], t)))
        .collect();
    if eligible.is_empty() {
        return Err(DebridError::no_matching_file());
    }

    // A caller-chosen file wins when it is still eligible.
    if let Some(index) = hints.chosen_index
        && let Some(&i) = eligible
            .iter()
            .find(|&&i| download.files[i].index == Some(index))
    {
        return Ok(&download.files[i]);
    }
    if let Some(wanted) = hints.chosen_filename
        && let Some(&i) = eligible.iter().find(|&&i| {
            let file = &download.files[i];
            file.basename() == wanted || file.name == wanted
        })
    {
        return Ok(&download.files[i]);
    }

    let best = eligible
        .into_iter()
        .min_by(|&a, &b| rank(&download.files[a], &download.files[b]))
        .expect("eligible set is non-empty");
    Ok(&download.files[best])
}

fn passes_target(parsed: &ParsedFile, target: &EpisodeTarget) -> bool {
    if target.is_empty() {
        return true;
    }

    if let Some(season) = target.season {
        let declared: Vec<u32> = parsed
            .seasons
            .iter()
            .chain(parsed.folder_seasons.iter())
            .copied()
            .collect();
        if !declared.is_empty() && !declared.contains(&season) {
            return false;
        }
    }

    if target.episodes.is_empty() {
        return true;
    }
    if parsed.episodes.is_empty() {
        // Files without their own episode number only qualify through a
        // season pack whose folder-level season already passed above.
        return parsed.season_pack;
    }
    parsed.episodes.iter().any(|e| target.episodes.contains(e))
}

/// Ordering for tie-breaks; `Less` is better.
fn rank(a: &DebridFile, b: &DebridFile) -> Ordering {
    b.is_video()
        .cmp(&a.is_video())
        .then_with(|| b.size.cmp(&a.size))
        .then_with(|| a.path_depth().cmp(&b.path_depth()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Convenience: pick by target built from title-match metadata, reporting
/// whether exactly one playable video exists (drives `defaultVideoId`).
#[must_use]
pub fn sole_video_file(download: &DebridDownload) -> Option<&DebridFile> {
    let videos = download.video_files();
    match videos.as_slice() {
        [only] => Some(only),
        _ => None,
    }
}

/// Whether the container as a whole plausibly holds the requested title.
/// Used by callers that must reject a bundle before inspecting files.
#[must_use]
pub fn container_matches(download: &DebridDownload, meta: &SearchMetadata) -> bool {
    let Some(name) = download.name.as_deref() else {
        return false;
    };
    let parsed = parse_title(name);
    let Some(title) = parsed.title.as_deref() else {
        return false;
    };
    matcher::title_matches(title, &meta.titles, matcher::LIBRARY_MATCH_THRESHOLD)
        && matcher::series_constraints_hold(&parsed, meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadStatus;

    fn file(index: u32, name: &str, size: u64) -> DebridFile {
        DebridFile {
            index: Some(index),
            id: None,
            name: name.to_string(),
            size,
            link: Some(format!("1:{index}")),
            mime_type: None,
        }
    }

    fn pack(name: &str, files: Vec<DebridFile>) -> DebridDownload {
        DebridDownload {
            id: "1".to_string(),
            hash: None,
            name: Some(name.to_string()),
            status: DownloadStatus::Downloaded,
            size: None,
            files,
            added_at: None,
            private: false,
        }
    }

    fn target(season: u32, episodes: &[u32]) -> EpisodeTarget {
        EpisodeTarget {
            season: Some(season),
            episodes: episodes.to_vec(),
        }
    }

    #[test]
    fn picks_requested_episode_from_pack() {
        let download = pack(
            "Show.S02.1080p.WEB-DL-GRP",
            vec![
                file(0, "Show.S02E01.mkv", 900),
                file(1, "Show.S02E05.mkv", 901),
                file(2, "Show.S02E09.mkv", 902),
            ],
        );
        let picked = select_file(&download, Some(&target(2, &[5])), &SelectionHints::default())
            .unwrap();
        assert_eq!(picked.basename(), "Show.S02E05.mkv");
    }

    #[test]
    fn absolute_number_matches_too() {
        let download = pack(
            "Show.S02.1080p",
            vec![
                file(0, "Show.S02E04.mkv", 900),
                file(1, "Show - 17.mkv", 901),
            ],
        );
        let picked = select_file(
            &download,
            Some(&target(2, &[5, 17])),
            &SelectionHints::default(),
        )
        .unwrap();
        assert_eq!(picked.basename(), "Show - 17.mkv");
    }

    #[test]
    fn no_matching_episode_fails() {
        let download = pack(
            "Show.S02.1080p",
            vec![file(0, "Show.S02E01.mkv", 900)],
        );
        let err = select_file(&download, Some(&target(2, &[7])), &SelectionHints::default())
            .unwrap_err();
        assert_eq!(
            err.kind,
            crate::clients::debrid::DebridErrorKind::NoMatchingFile
        );
    }

    #[test]
    fn movie_prefers_largest_video() {
        let download = pack(
            "Movie.2020.2160p.BluRay-GRP",
            vec![
                file(0, "sample.mkv", 50),
                file(1, "Movie.2020.2160p.mkv", 30_000),
                file(2, "cover.jpg", 2),
            ],
        );
        let picked = select_file(&download, None, &SelectionHints::default()).unwrap();
        assert_eq!(picked.basename(), "Movie.2020.2160p.mkv");
    }

    #[test]
    fn video_beats_bigger_non_video() {
        let download = pack(
            "Movie.2020",
            vec![
                file(0, "Movie.iso.dat", 90_000),
                file(1, "Movie.2020.mkv", 30_000),
            ],
        );
        let picked = select_file(&download, None, &SelectionHints::default()).unwrap();
        assert_eq!(picked.basename(), "Movie.2020.mkv");
    }

    #[test]
    fn shallower_path_wins_at_equal_size() {
        let download = pack(
            "Movie.2020",
            vec![
                file(0, "extras/Movie.A.mkv", 1000),
                file(1, "Movie.B.mkv", 1000),
            ],
        );
        let picked = select_file(&download, None, &SelectionHints::default()).unwrap();
        assert_eq!(picked.basename(), "Movie.B.mkv");
    }

    #[test]
    fn chosen_index_wins_when_eligible() {
        let download = pack(
            "Show.S02.1080p",
            vec![
                file(0, "Show.S02E05.Version.A.mkv", 900),
                file(1, "Show.S02E05.Version.B.mkv", 2000),
            ],
        );
        let hints = SelectionHints {
            chosen_filename: None,
            chosen_index: Some(0),
        };
        let picked = select_file(&download, Some(&target(2, &[5])), &hints).unwrap();
        assert_eq!(picked.index, Some(0));
    }

    #[test]
    fn ineligible_chosen_index_falls_back() {
        let download = pack(
            "Show.S02.1080p",
            vec![
                file(0, "Show.S02E01.mkv", 900),
                file(1, "Show.S02E05.mkv", 901),
            ],
        );
        let hints = SelectionHints {
            chosen_filename: None,
            chosen_index: Some(0),
        };
        let picked = select_file(&download, Some(&target(2, &[5])), &hints).unwrap();
        assert_eq!(picked.basename(), "Show.S02E05.mkv");
    }

    #[test]
    fn pack_file_without_episode_number_is_eligible() {
        // A one-file pack named for the whole season still plays.
        let download = pack(
            "Show.S02.COMPLETE.1080p-GRP",
            vec![file(0, "Show.Season.2.mkv", 900)],
        );
        let picked = select_file(&download, Some(&target(2, &[5])), &SelectionHints::default())
            .unwrap();
        assert_eq!(picked.basename(), "Show.Season.2.mkv");
    }

    #[test]
    fn sole_video_detection() {
        let one = pack(
            "Movie",
            vec![file(0, "Movie.mkv", 10), file(1, "info.nfo.txt", 1)],
        );
        assert!(sole_video_file(&one).is_some());

        let two = pack(
            "Movie",
            vec![file(0, "a.mkv", 10), file(1, "b.mkv", 10)],
        );
        assert!(sole_video_file(&two).is_none());
    }

    #[test]
    fn deterministic_selection() {
        let download = pack(
            "Show.S01.1080p",
            vec![
                file(0, "Show.S01E01.mkv", 100),
                file(1, "Show.S01E02.mkv", 100),
            ],
        );
        let a = select_file(&download, None, &SelectionHints::default()).unwrap();
        let b = select_file(&download, None, &SelectionHints::default()).unwrap();
        assert_eq!(a.name, b.name);
    }
}
