//! Step (d): stable multi-key sort over user-defined criteria.

use std::cmp::Ordering;

use super::Entry;
use crate::config::{SortCriterion, SortDirection, SortKey};

/// Rank tables; earlier is better. Unknown values land after the table.
const RESOLUTION_ORDER: &[&str] = &["2160p", "1440p", "1080p", "720p", "576p", "480p", "360p"];
const QUALITY_ORDER: &[&str] = &[
    "Remux", "BluRay", "WEB-DL", "WEBRip", "BDRip", "HDTV", "DVD", "TVRIP", "SCR", "TS", "CAM",
];

pub(crate) fn sort(entries: &mut [Entry], criteria: &[SortCriterion], service_priority: &[String]) {
    entries.sort_by(|a, b| {
        for criterion in criteria {
            let ordering = compare(a, b, criterion.key, service_priority);
            let ordering = match criterion.direction {
                SortDirection::Descending => ordering,
                SortDirection::Ascending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Compares two entries on one key, `Less` meaning "a sorts first" under the
/// key's natural (descending/best-first) direction.
fn compare(a: &Entry, b: &Entry, key: SortKey, service_priority: &[String]) -> Ordering {
    match key {
        SortKey::Cached => bool_desc(a.stream.is_cached(), b.stream.is_cached()),
        SortKey::Library => bool_desc(a.stream.library, b.stream.library),
        SortKey::Service => {
            let rank = |entry: &Entry| {
                entry
                    .stream
                    .service
                    .as_ref()
                    .and_then(|s| service_priority.iter().position(|p| p == &s.id))
                    .unwrap_or(usize::MAX)
            };
            rank(a).cmp(&rank(b))
        }
        SortKey::Resolution => {
            table_rank(RESOLUTION_ORDER, a.stream.parsed_file.resolution.as_deref())
                .cmp(&table_rank(
                    RESOLUTION_ORDER,
                    b.stream.parsed_file.resolution.as_deref(),
                ))
        }
        SortKey::Size => b.stream.size.unwrap_or(0).cmp(&a.stream.size.unwrap_or(0)),
        SortKey::Quality => table_rank(QUALITY_ORDER, a.stream.parsed_file.quality.as_deref())
            .cmp(&table_rank(
                QUALITY_ORDER,
                b.stream.parsed_file.quality.as_deref(),
            )),
        SortKey::Seeders => b
            .stream
            .seeders
            .unwrap_or(0)
            .cmp(&a.stream.seeders.unwrap_or(0)),
        SortKey::Language => language_rank(a).cmp(&language_rank(b)),
        SortKey::VisualTag => b
            .stream
            .parsed_file
            .visual_tags
            .len()
            .cmp(&a.stream.parsed_file.visual_tags.len()),
        SortKey::AudioChannel => channel_value(b)
            .partial_cmp(&channel_value(a))
            .unwrap_or(Ordering::Equal),
        SortKey::RegexRank => {
            let rank = |entry: &Entry| {
                (
                    !entry.preferred,
                    entry.regex_rank.unwrap_or(usize::MAX),
                )
            };
            rank(a).cmp(&rank(b))
        }
        SortKey::ExpressionRank => b.expression_rank.cmp(&a.expression_rank),
    }
}

fn bool_desc(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}

fn table_rank(table: &[&str], value: Option<&str>) -> usize {
    value
        .and_then(|v| table.iter().position(|t| t.eq_ignore_ascii_case(v)))
        .unwrap_or(table.len())
}

/// Fewer is better here: the position of the entry's best language in its
/// own language list is meaningless, so rank by presence of any language
/// tag at all, multilingual first.
fn language_rank(entry: &Entry) -> usize {
    if entry
        .stream
        .languages
        .iter()
        .any(|l| l == "Multi" || l == "Dual Audio")
    {
        0
    } else if entry.stream.languages.is_empty() {
        2
    } else {
        1
    }
}

fn channel_value(entry: &Entry) -> f32 {
    entry
        .stream
        .parsed_file
        .audio_channels
        .iter()
        .filter_map(|c| c.parse::<f32>().ok())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddonRef, ParsedFile, ParsedStream, ServiceRef, StreamKind};

    fn entry(label: &str, resolution: Option<&str>, size: Option<u64>, cached: bool) -> Entry {
        Entry {
            stream: ParsedStream {
                addon: AddonRef {
                    name: label.to_string(),
                    id: label.to_string(),
                },
                kind: StreamKind::Debrid,
                service: Some(ServiceRef {
                    id: "torbox".to_string(),
                    short_name: "TB".to_string(),
                    cached: Some(cached),
                }),
                url: None,
                info_hash: None,
                sources: vec![],
                file_index: None,
                size,
                folder_size: None,
                filename: None,
                folder_name: None,
                parsed_file: ParsedFile {
                    resolution: resolution.map(ToString::to_string),
                    ..ParsedFile::default()
                },
                seeders: None,
                age_hours: None,
                languages: vec![],
                error: None,
                message: None,
                library: false,
                proxied: false,
                private: false,
                binge_group: None,
                duration: None,
                bitrate: None,
                service_item_id: None,
            },
            raw_text: label.to_string(),
            regex_rank: None,
            preferred: false,
            expression_rank: 0,
        }
    }

    fn criteria(keys: &[SortKey]) -> Vec<SortCriterion> {
        keys.iter()
            .map(|&key| SortCriterion {
                key,
                direction: SortDirection::Descending,
            })
            .collect()
    }

    #[test]
    fn cached_sorts_first() {
        let mut entries = vec![
            entry("uncached", Some("2160p"), None, false),
            entry("cached", Some("720p"), None, true),
        ];
        sort(&mut entries, &criteria(&[SortKey::Cached]), &[]);
        assert_eq!(entries[0].stream.addon.id, "cached");
    }

    #[test]
    fn resolution_then_size() {
        let mut entries = vec![
            entry("small-1080", Some("1080p"), Some(1), true),
            entry("2160", Some("2160p"), Some(2), true),
            entry("big-1080", Some("1080p"), Some(10), true),
        ];
        sort(
            &mut entries,
            &criteria(&[SortKey::Resolution, SortKey::Size]),
            &[],
        );
        let ids: Vec<&str> = entries.iter().map(|e| e.stream.addon.id.as_str()).collect();
        assert_eq!(ids, vec!["2160", "big-1080", "small-1080"]);
    }

    #[test]
    fn ascending_reverses() {
        let mut entries = vec![
            entry("big", Some("1080p"), Some(10), true),
            entry("small", Some("1080p"), Some(1), true),
        ];
        sort(
            &mut entries,
            &[SortCriterion {
                key: SortKey::Size,
                direction: SortDirection::Ascending,
            }],
            &[],
        );
        assert_eq!(entries[0].stream.addon.id, "small");
    }

    #[test]
    fn stability_preserves_source_order_on_ties() {
        let mut entries = vec![
            entry("first", Some("1080p"), Some(5), true),
            entry("second", Some("1080p"), Some(5), true),
            entry("third", Some("1080p"), Some(5), true),
        ];
        sort(
            &mut entries,
            &criteria(&[SortKey::Resolution, SortKey::Size, SortKey::Cached]),
            &[],
        );
        let ids: Vec<&str> = entries.iter().map(|e| e.stream.addon.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn service_priority_ranks_by_position() {
        let mut a = entry("a", None, None, true);
        a.stream.service.as_mut().unwrap().id = "realdebrid".to_string();
        let b = entry("b", None, None, true);

        let mut entries = vec![a, b];
        sort(
            &mut entries,
            &criteria(&[SortKey::Service]),
            &["torbox".to_string(), "realdebrid".to_string()],
        );
        assert_eq!(entries[0].stream.addon.id, "b");
    }

    #[test]
    fn regex_rank_prefers_lower_index_and_preferred() {
        let mut ranked = entry("ranked", None, None, true);
        ranked.regex_rank = Some(0);
        let mut preferred = entry("preferred", None, None, true);
        preferred.preferred = true;
        preferred.regex_rank = Some(3);
        let plain = entry("plain", None, None, true);

        let mut entries = vec![plain, ranked, preferred];
        sort(&mut entries, &criteria(&[SortKey::RegexRank]), &[]);
        let ids: Vec<&str> = entries.iter().map(|e| e.stream.addon.id.as_str()).collect();
        assert_eq!(ids, vec!["preferred", "ranked", "plain"]);
    }
}
