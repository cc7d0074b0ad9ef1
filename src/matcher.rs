//! Title matching between parsed release names and request metadata.
//!
//! Matching is done on normalized strings with a token-set similarity ratio,
//! so word order and duplicated tokens do not matter. The library search and
//! the file selector both route through [`title_matches`] and
//! [`series_constraints_hold`].

use crate::models::{ParsedFile, SearchMetadata};

/// Similarity floor for library title matching.
pub const LIBRARY_MATCH_THRESHOLD: f64 = 0.85;

/// Normalizes a title for comparison: lowercase, strip everything that is not
/// alphanumeric, collapse whitespace, drop a leading article.
#[must_use]
pub fn normalize(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    if words.len() > 1
        && let Some(first) = words.first()
        && ["the", "a", "an"].contains(first)
    {
        words.remove(0);
    }
    words.join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - levenshtein(a, b) as f64 / max_len as f64
    }
}

/// Token-set ratio over normalized inputs.
///
/// Tokens common to both sides are compared against each full token set, and
/// the best of the three pairings wins. Symmetric by construction.
#[must_use]
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);
    if norm_a.is_empty() || norm_b.is_empty() {
        return 0.0;
    }
    if norm_a == norm_b {
        return 1.0;
    }

    let mut tokens_a: Vec<&str> = norm_a.split_whitespace().collect();
    let mut tokens_b: Vec<&str> = norm_b.split_whitespace().collect();
    tokens_a.sort_unstable();
    tokens_a.dedup();
    tokens_b.sort_unstable();
    tokens_b.dedup();

    let common: Vec<&str> = tokens_a
        .iter()
        .filter(|t| tokens_b.contains(t))
        .copied()
        .collect();
    let only_a: Vec<&str> = tokens_a
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();
    let only_b: Vec<&str> = tokens_b
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();

    let base = common.join(" ");
    let with_a = join_nonempty(&base, &only_a.join(" "));
    let with_b = join_nonempty(&base, &only_b.join(" "));

    similarity(&base, &with_a)
        .max(similarity(&base, &with_b))
        .max(similarity(&with_a, &with_b))
}

fn join_nonempty(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        base.to_string()
    } else {
        format!("{base} {rest}")
    }
}

/// True when `candidate` reaches `threshold` similarity against any of the
/// known titles.
#[must_use]
pub fn title_matches(candidate: &str, titles: &[String], threshold: f64) -> bool {
    if candidate.trim().is_empty() {
        return false;
    }
    titles
        .iter()
        .any(|t| token_set_ratio(candidate, t) >= threshold)
}

/// Season/episode constraints for series candidates.
///
/// A candidate that declares seasons must include the requested one. A
/// candidate that declares episodes must include the requested episode, its
/// absolute number, or its relative-absolute number. A candidate with no
/// episode info that is a season pack is valid for any episode of its season.
#[must_use]
pub fn series_constraints_hold(parsed: &ParsedFile, meta: &SearchMetadata) -> bool {
    if !meta.is_series_request() {
        return true;
    }

    if let Some(season) = meta.season {
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

    if parsed.episodes.is_empty() {
        // No episode info: only a pack can stand in for a specific episode.
        return parsed.season_pack || meta.episode.is_none();
    }

    let acceptable = meta.acceptable_episodes();
    if acceptable.is_empty() {
        return true;
    }
    parsed.episodes.iter().any(|ep| acceptable.contains(ep))
}

/// Picks the best artwork/logo candidate from a language-tagged list:
/// requested language (lhs of locale) first, then the original language,
/// then English, then the first entry.
#[must_use]
pub fn pick_by_language<'a, 'b, T>(
    items: &'a [T],
    language_of: impl Fn(&T) -> Option<&'b str>,
    requested: Option<&str>,
    original: Option<&str>,
) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }

    let base = |lang: &str| lang.split(['-', '_']).next().unwrap_or(lang).to_lowercase();

    for want in [requested, original, Some("en")].into_iter().flatten() {
        let want = base(want);
        if let Some(item) = items
            .iter()
            .find(|i| language_of(i).is_some_and(|l| base(l) == want))
        {
            return Some(item);
        }
    }
    items.first()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_articles_and_punctuation() {
        assert_eq!(normalize("The Matrix: Reloaded!"), "matrix reloaded");
        assert_eq!(normalize("Re:Zero"), "re zero");
        assert_eq!(normalize("The"), "the");
    }

    #[test]
    fn identical_titles_score_one() {
        assert!((token_set_ratio("Inception", "inception") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reordered_tokens_score_one() {
        assert!((token_set_ratio("Slayer Demon", "Demon Slayer") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn near_miss_scores_below_threshold() {
        assert!(token_set_ratio("Inception", "Interstellar") < LIBRARY_MATCH_THRESHOLD);
    }

    #[test]
    fn subset_scores_high() {
        // A release title carrying extra tokens still matches on the common core.
        let score = token_set_ratio("Breaking Bad", "Breaking Bad Complete Series");
        assert!(score >= LIBRARY_MATCH_THRESHOLD);
    }

    #[test]
    fn symmetry() {
        let pairs = [
            ("The Office", "Office US"),
            ("Frieren", "Frieren Beyond Journey's End"),
            ("abc", "xyz"),
        ];
        for (a, b) in pairs {
            let lhs = token_set_ratio(a, b);
            let rhs = token_set_ratio(b, a);
            assert!((lhs - rhs).abs() < 1e-9, "asymmetric for {a} / {b}");
        }
    }

    fn series_meta(season: u32, episode: u32, absolute: Option<u32>) -> SearchMetadata {
        SearchMetadata {
            primary_title: "Show".to_string(),
            titles: vec!["Show".to_string()],
            year: None,
            season: Some(season),
            episode: Some(episode),
            absolute_episode: absolute,
            relative_absolute_episode: None,
            is_anime: false,
            runtime: None,
            genres: vec![],
            original_language: None,
            imdb_id: None,
            tmdb_id: None,
            anilist_id: None,
        }
    }

    #[test]
    fn wrong_season_rejected() {
        let parsed = ParsedFile {
            seasons: vec![1],
            episodes: vec![5],
            ..ParsedFile::default()
        };
        assert!(!series_constraints_hold(&parsed, &series_meta(2, 5, None)));
    }

    #[test]
    fn absolute_episode_accepted() {
        let parsed = ParsedFile {
            episodes: vec![17],
            ..ParsedFile::default()
        };
        assert!(series_constraints_hold(&parsed, &series_meta(2, 5, Some(17))));
    }

    #[test]
    fn season_pack_matches_any_episode() {
        let parsed = ParsedFile {
            seasons: vec![2],
            season_pack: true,
            ..ParsedFile::default()
        };
        assert!(series_constraints_hold(&parsed, &series_meta(2, 9, None)));
    }

    #[test]
    fn bare_candidate_without_pack_rejected_for_episode() {
        let parsed = ParsedFile::default();
        assert!(!series_constraints_hold(&parsed, &series_meta(2, 9, None)));
    }

    #[test]
    fn language_pick_order() {
        let items = vec![
            ("logo-de", Some("de")),
            ("logo-en", Some("en")),
            ("logo-ja", Some("ja-JP")),
        ];
        fn lang<'a, 'b>(i: &'a (&str, Option<&'b str>)) -> Option<&'b str> {
            i.1
        }

        let picked = pick_by_language(&items, lang, Some("ja"), Some("de")).unwrap();
        assert_eq!(picked.0, "logo-ja");

        let picked = pick_by_language(&items, lang, Some("fr"), Some("de")).unwrap();
        assert_eq!(picked.0, "logo-de");

        let picked = pick_by_language(&items, lang, Some("fr"), Some("it")).unwrap();
        assert_eq!(picked.0, "logo-en");

        let none: Vec<(&str, Option<&str>)> = vec![];
        assert!(pick_by_language(&none, lang, None, None).is_none());
    }
}
