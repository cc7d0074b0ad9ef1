//! Step (c): AND-composed constraint filtering, evaluated in declaration
//! order. Pure over its inputs; regexes come pre-validated from config.

use regex::Regex;

use super::Entry;
use crate::config::{
    ExpressionField, FilterConfig, SelectionFilter, SizeRange, StreamExpression,
};
use crate::models::{ParsedStream, StreamKind};

/// Attribute value for selection filters; absent attributes compare as
/// the literal `"unknown"` so users can target them explicitly.
const UNKNOWN: &str = "unknown";

pub(crate) fn apply(entries: Vec<Entry>, filters: &FilterConfig) -> Vec<Entry> {
    let regexes = CompiledRegexes::compile(filters);

    entries
        .into_iter()
        .filter_map(|mut entry| {
            if !passes(&entry, filters, &regexes) {
                return None;
            }
            entry.regex_rank = regexes.rank(&entry.raw_text);
            entry.preferred = regexes.preferred(&entry.raw_text);
            Some(entry)
        })
        .collect()
}

fn passes(entry: &Entry, filters: &FilterConfig, regexes: &CompiledRegexes) -> bool {
    let stream = &entry.stream;
    let parsed = &stream.parsed_file;

    let checks = [
        selection_scalar(&filters.resolution, parsed.resolution.as_deref()),
        selection_scalar(&filters.quality, parsed.quality.as_deref()),
        selection_scalar(&filters.encode, parsed.encode.as_deref()),
        selection_scalar(&filters.stream_type, Some(kind_name(stream.kind))),
        selection_multi(&filters.visual_tag, &parsed.visual_tags),
        selection_multi(&filters.audio_tag, &parsed.audio_tags),
        selection_multi(&filters.audio_channel, &parsed.audio_channels),
        selection_multi(&filters.language, &stream.languages),
    ];
    if checks.contains(&false) {
        return false;
    }

    if !size_in_range(stream, filters) {
        return false;
    }

    if stream.kind == StreamKind::P2p
        && let Some(floor) = filters.min_seeders
        && stream.seeders.unwrap_or(0) < floor
    {
        return false;
    }

    if let Some(ceiling) = filters.max_age_hours
        && let Some(age) = stream.age_hours
        && age > ceiling
    {
        return false;
    }

    regexes.passes(&entry.raw_text)
}

/// `included` overrides everything; otherwise `required` demands membership
/// and `excluded` forbids it.
fn selection_scalar(filter: &SelectionFilter, value: Option<&str>) -> bool {
    if filter.is_empty() {
        return true;
    }
    let value = value.unwrap_or(UNKNOWN);
    if contains_ci(&filter.included, value) {
        return true;
    }
    if !filter.required.is_empty() && !contains_ci(&filter.required, value) {
        return false;
    }
    !contains_ci(&filter.excluded, value)
}

fn selection_multi(filter: &SelectionFilter, values: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    if values.is_empty() {
        return selection_scalar(filter, None);
    }
    if values.iter().any(|v| contains_ci(&filter.included, v)) {
        return true;
    }
    if !filter.required.is_empty() && !values.iter().any(|v| contains_ci(&filter.required, v)) {
        return false;
    }
    !values.iter().any(|v| contains_ci(&filter.excluded, v))
}

fn contains_ci(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

fn kind_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Debrid => "debrid",
        StreamKind::P2p => "p2p",
        StreamKind::Usenet => "usenet",
        StreamKind::Http => "http",
        StreamKind::Live => "live",
        StreamKind::Youtube => "youtube",
    }
}

fn size_in_range(stream: &ParsedStream, filters: &FilterConfig) -> bool {
    if filters.size_ranges.is_empty() {
        return true;
    }
    let Some(size) = stream.size else {
        return true;
    };
    let range: Option<&SizeRange> = stream
        .parsed_file
        .resolution
        .as_deref()
        .and_then(|r| filters.size_ranges.get(r))
        .or_else(|| filters.size_ranges.get("default"));
    let Some(range) = range else {
        return true;
    };
    if let Some(min) = range.min_bytes
        && size < min
    {
        return false;
    }
    if let Some(max) = range.max_bytes
        && size > max
    {
        return false;
    }
    true
}

pub(crate) struct CompiledRegexes {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    required: Vec<Regex>,
    preferred: Vec<Regex>,
    ranked: Vec<Regex>,
}

impl CompiledRegexes {
    fn compile(filters: &FilterConfig) -> Self {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect::<Vec<_>>()
        };
        Self {
            include: compile(&filters.regex.include),
            exclude: compile(&filters.regex.exclude),
            required: compile(&filters.regex.required),
            preferred: compile(&filters.regex.preferred),
            ranked: compile(&filters.regex.ranked),
        }
    }

    fn passes(&self, text: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(text)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(text)) {
            return false;
        }
        self.required.iter().all(|re| re.is_match(text))
    }

    fn rank(&self, text: &str) -> Option<usize> {
        self.ranked.iter().position(|re| re.is_match(text))
    }

    fn preferred(&self, text: &str) -> bool {
        self.preferred.iter().any(|re| re.is_match(text))
    }
}

/// Evaluates one typed stream expression against a stream.
pub(crate) fn expression_matches(expression: &StreamExpression, stream: &ParsedStream) -> bool {
    let values: Vec<String> = match expression.field {
        ExpressionField::Resolution => option_vec(stream.parsed_file.resolution.as_deref()),
        ExpressionField::Quality => option_vec(stream.parsed_file.quality.as_deref()),
        ExpressionField::Encode => option_vec(stream.parsed_file.encode.as_deref()),
        ExpressionField::ReleaseGroup => {
            option_vec(stream.parsed_file.release_group.as_deref())
        }
        ExpressionField::Language => stream.languages.clone(),
        ExpressionField::VisualTag => stream.parsed_file.visual_tags.clone(),
        ExpressionField::AudioTag => stream.parsed_file.audio_tags.clone(),
        ExpressionField::Addon => vec![stream.addon.id.clone()],
        ExpressionField::Service => {
            option_vec(stream.service.as_ref().map(|s| s.id.as_str()))
        }
        ExpressionField::Cached => vec![stream.is_cached().to_string()],
        ExpressionField::Library => vec![stream.library.to_string()],
        ExpressionField::Filename => option_vec(stream.filename.as_deref()),
    };

    if let Some(wanted) = &expression.equals {
        return values.iter().any(|v| v.eq_ignore_ascii_case(wanted));
    }
    if let Some(fragment) = &expression.contains {
        let fragment = fragment.to_lowercase();
        return values.iter().any(|v| v.to_lowercase().contains(&fragment));
    }
    false
}

fn option_vec(value: Option<&str>) -> Vec<String> {
    value.map(ToString::to_string).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddonRef, ParsedFile};

    fn entry(resolution: Option<&str>, kind: StreamKind, text: &str) -> Entry {
        Entry {
            stream: ParsedStream {
                addon: AddonRef {
                    name: "a".to_string(),
                    id: "a".to_string(),
                },
                kind,
                service: None,
                url: Some("https://x.example/v.mkv".to_string()),
                info_hash: None,
                sources: vec![],
                file_index: None,
                size: Some(2 * 1024 * 1024 * 1024),
                folder_size: None,
                filename: None,
                folder_name: None,
                parsed_file: ParsedFile {
                    resolution: resolution.map(ToString::to_string),
                    ..ParsedFile::default()
                },
                seeders: Some(10),
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
            raw_text: text.to_string(),
            regex_rank: None,
            preferred: false,
            expression_rank: 0,
        }
    }

    #[test]
    fn required_resolution_drops_others() {
        let mut filters = FilterConfig::default();
        filters.resolution.required = vec!["1080p".to_string()];
        let kept = apply(
            vec![
                entry(Some("1080p"), StreamKind::Http, "a"),
                entry(Some("720p"), StreamKind::Http, "b"),
                entry(None, StreamKind::Http, "c"),
            ],
            &filters,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn excluded_resolution_drops_matching() {
        let mut filters = FilterConfig::default();
        filters.resolution.excluded = vec!["720p".to_string()];
        let kept = apply(
            vec![
                entry(Some("1080p"), StreamKind::Http, "a"),
                entry(Some("720p"), StreamKind::Http, "b"),
            ],
            &filters,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].stream.parsed_file.resolution.as_deref(),
            Some("1080p")
        );
    }

    #[test]
    fn included_overrides_exclusion() {
        let mut filters = FilterConfig::default();
        filters.resolution.excluded = vec!["720p".to_string()];
        filters.resolution.included = vec!["720p".to_string()];
        let kept = apply(vec![entry(Some("720p"), StreamKind::Http, "a")], &filters);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn seeder_floor_applies_to_p2p_only() {
        let mut filters = FilterConfig::default();
        filters.min_seeders = Some(50);
        let kept = apply(
            vec![
                entry(None, StreamKind::P2p, "p2p"),
                entry(None, StreamKind::Http, "http"),
            ],
            &filters,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stream.kind, StreamKind::Http);
    }

    #[test]
    fn size_range_per_resolution() {
        let mut filters = FilterConfig::default();
        filters.size_ranges.insert(
            "1080p".to_string(),
            SizeRange {
                min_bytes: Some(3 * 1024 * 1024 * 1024),
                max_bytes: None,
            },
        );
        // 2 GiB 1080p entry is below the floor.
        let kept = apply(vec![entry(Some("1080p"), StreamKind::Http, "a")], &filters);
        assert!(kept.is_empty());
        // Unconstrained resolution passes.
        let kept = apply(vec![entry(Some("720p"), StreamKind::Http, "a")], &filters);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn regex_exclude_and_rank() {
        let mut filters = FilterConfig::default();
        filters.regex.exclude = vec!["(?i)CAM".to_string()];
        filters.regex.ranked = vec!["GRP-A".to_string(), "GRP-B".to_string()];

        let kept = apply(
            vec![
                entry(None, StreamKind::Http, "Movie.1080p.CAM-BAD"),
                entry(None, StreamKind::Http, "Movie.1080p.BluRay.GRP-B"),
            ],
            &filters,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].regex_rank, Some(1));
    }

    #[test]
    fn regex_required_must_all_match(){
        let mut filters = FilterConfig::default();
        filters.regex.required = vec!["1080p".to_string(), "BluRay".to_string()];
        let kept = apply(
            vec![
                entry(None, StreamKind::Http, "Movie.1080p.BluRay-GRP"),
                entry(None, StreamKind::Http, "Movie.1080p.WEB-GRP"),
            ],
            &filters,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn expression_equals_and_contains() {
        let e = entry(Some("2160p"), StreamKind::Http, "x");
        let equals = StreamExpression {
            field: ExpressionField::Resolution,
            equals: Some("2160P".to_string()),
            contains: None,
            rank: 5,
        };
        assert!(expression_matches(&equals, &e.stream));

        let contains = StreamExpression {
            field: ExpressionField::Addon,
            equals: None,
            contains: Some("A".to_string()),
            rank: 1,
        };
        assert!(expression_matches(&contains, &e.stream));
    }
}
