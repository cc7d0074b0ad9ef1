//! The deterministic stream pipeline: enrich, availability, filter, sort,
//! dedupe, binge tagging.
//!
//! Only the availability step talks to the network (batched through the
//! debrid layer); everything after it is pure over its inputs.

mod dedupe;
mod filter;
mod sort;

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::aggregator::{Candidate, CandidateSource};
use crate::clients::debrid::DebridService;
use crate::config::{BingeAttribute, UserConfig};
use crate::matcher;
use crate::models::{
    AddonError, InfoHash, ParsedFile, ParsedStream, SearchMetadata, ServiceRef, SourceKind,
    StreamKind, UnprocessedStream,
};
use crate::parser::parse_title;

/// One candidate moving through the pipeline, with scratch state the final
/// output does not carry.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub stream: ParsedStream,
    /// Canonical text the regex filters and rankers run against.
    pub raw_text: String,
    /// Index of the earliest matching ranked regex, when any.
    pub regex_rank: Option<usize>,
    /// Whether any preferred regex matched.
    pub preferred: bool,
    /// Sum of matched stream-expression ranks.
    pub expression_rank: i32,
}

#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub streams: Vec<ParsedStream>,
    pub errors: Vec<AddonError>,
}

pub struct Processor {
    services: HashMap<String, Arc<DebridService>>,
    service_priority: Vec<String>,
    user: UserConfig,
}

impl Processor {
    #[must_use]
    pub fn new(
        services: HashMap<String, Arc<DebridService>>,
        service_priority: Vec<String>,
        user: UserConfig,
    ) -> Self {
        Self {
            services,
            service_priority,
            user,
        }
    }

    /// Runs the whole pipeline. With `skip_processing` the candidates are
    /// only enriched and presumed cached library copies; filtering, sorting
    /// and deduplication are bypassed.
    pub async fn process(
        &self,
        candidates: Vec<Candidate>,
        metadata: &SearchMetadata,
        skip_processing: bool,
    ) -> ProcessOutcome {
        let total = candidates.len();
        let mut entries: Vec<Entry> = candidates.into_iter().filter_map(enrich).collect();
        let parse_failures = total - entries.len();
        if parse_failures > 0 {
            debug!(dropped = parse_failures, "dropped unparseable candidates");
        }

        if skip_processing {
            for entry in &mut entries {
                if let Some(service) = &mut entry.stream.service {
                    service.cached = Some(true);
                }
                entry.stream.library = true;
            }
            let streams = entries.into_iter().map(finalize).collect();
            return ProcessOutcome {
                streams,
                errors: Vec::new(),
            };
        }

        // Series requests drop candidates whose declared seasons or
        // episodes cannot cover the requested one.
        if metadata.is_series_request() {
            entries.retain(|entry| {
                matcher::series_constraints_hold(&entry.stream.parsed_file, metadata)
            });
        }

        let errors = self.resolve_availability(&mut entries).await;

        let mut entries = filter::apply(entries, &self.user.filters);
        self.apply_expressions(&mut entries);
        sort::sort(&mut entries, &self.user.sort, &self.service_priority);
        let entries = dedupe::dedupe(entries, self.user.dedup_policy, &self.service_priority);
        let entries = self.tag_binge_groups(entries);

        info!(
            event = "processing_finished",
            input = total,
            output = entries.len(),
            "Processing finished"
        );

        ProcessOutcome {
            streams: entries.into_iter().map(finalize).collect(),
            errors,
        }
    }

    /// Step (b): batch unknown-cached debrid candidates by service and probe
    /// instant availability.
    async fn resolve_availability(&self, entries: &mut [Entry]) -> Vec<AddonError> {
        let mut wanted: HashMap<(String, SourceKind), Vec<InfoHash>> = HashMap::new();
        for entry in entries.iter() {
            if entry.stream.kind != StreamKind::Debrid && entry.stream.kind != StreamKind::Usenet {
                continue;
            }
            let Some(service) = &entry.stream.service else {
                continue;
            };
            if service.cached.is_some() {
                continue;
            }
            let Some(hash) = &entry.stream.info_hash else {
                continue;
            };
            let kind = source_kind(entry.stream.kind);
            let bucket = wanted.entry((service.id.clone(), kind)).or_default();
            if !bucket.contains(hash) {
                bucket.push(hash.clone());
            }
        }

        let mut errors = Vec::new();
        for ((service_id, kind), hashes) in wanted {
            let Some(service) = self.services.get(&service_id) else {
                warn!(service = %service_id, "candidate references unconfigured service");
                continue;
            };
            match service.check_cached(kind, &hashes, true).await {
                Ok(results) => {
                    for entry in entries.iter_mut() {
                        let Some(stream_service) = &mut entry.stream.service else {
                            continue;
                        };
                        if stream_service.id != service_id
                            || source_kind(entry.stream.kind) != kind
                        {
                            continue;
                        }
                        let Some(hash) = &entry.stream.info_hash else {
                            continue;
                        };
                        if let Some(availability) = results.get(hash) {
                            stream_service.cached = Some(availability.cached);
                            entry.stream.library |= availability.library;
                            if entry.stream.size.is_none() {
                                entry.stream.size = availability.size;
                            }
                        } else {
                            stream_service.cached = Some(false);
                        }
                    }
                }
                Err(err) => {
                    // Candidates stay uncached rather than vanishing.
                    for entry in entries.iter_mut() {
                        if let Some(stream_service) = &mut entry.stream.service
                            && stream_service.id == service_id
                            && stream_service.cached.is_none()
                            && source_kind(entry.stream.kind) == kind
                        {
                            stream_service.cached = Some(false);
                        }
                    }
                    errors.push(AddonError {
                        addon_name: service_id.clone(),
                        kind: err.error_kind(),
                        description: err.to_string(),
                    });
                }
            }
        }
        errors
    }

    fn apply_expressions(&self, entries: &mut [Entry]) {
        if self.user.expressions.is_empty() {
            return;
        }
        for entry in entries.iter_mut() {
            entry.expression_rank = self
                .user
                .expressions
                .iter()
                .filter(|e| filter::expression_matches(e, &entry.stream))
                .map(|e| e.rank)
                .sum();
        }
    }

    /// Step (f): derive per-stream binge groups from the configured
    /// attributes; unset entirely when autoplay is off.
    fn tag_binge_groups(&self, mut entries: Vec<Entry>) -> Vec<Entry> {
        if !self.user.autoplay.enabled {
            for entry in &mut entries {
                entry.stream.binge_group = None;
            }
            return entries;
        }

        for entry in &mut entries {
            let stream = &entry.stream;
            let mut parts: Vec<String> = Vec::new();
            for attribute in &self.user.autoplay.attributes {
                let part = match attribute {
                    BingeAttribute::Service => stream
                        .service
                        .as_ref()
                        .map(|s| format!("svc:{}", s.id)),
                    BingeAttribute::StreamType => {
                        Some(format!("type:{}", kind_tag(stream.kind)))
                    }
                    BingeAttribute::Addon => Some(format!("addon:{}", stream.addon.id)),
                    BingeAttribute::InfoHash => stream
                        .info_hash
                        .as_ref()
                        .map(|h| format!("hash:{h}")),
                    BingeAttribute::SizeBucket => {
                        stream.size.map(|s| format!("size:{}", size_bucket(s)))
                    }
                    BingeAttribute::Resolution => stream
                        .parsed_file
                        .resolution
                        .as_ref()
                        .map(|r| format!("res:{r}")),
                    BingeAttribute::Quality => stream
                        .parsed_file
                        .quality
                        .as_ref()
                        .map(|q| format!("q:{q}")),
                    BingeAttribute::ReleaseGroup => stream
                        .parsed_file
                        .release_group
                        .as_ref()
                        .map(|g| format!("grp:{g}")),
                };
                if let Some(part) = part {
                    parts.push(part);
                }
            }
            entry.stream.binge_group = (!parts.is_empty()).then(|| parts.join("|"));
        }
        entries
    }
}

const fn source_kind(kind: StreamKind) -> SourceKind {
    match kind {
        StreamKind::Usenet => SourceKind::Usenet,
        _ => SourceKind::Torrent,
    }
}

const fn kind_tag(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Debrid => "debrid",
        StreamKind::P2p => "p2p",
        StreamKind::Usenet => "usenet",
        StreamKind::Http => "http",
        StreamKind::Live => "live",
        StreamKind::Youtube => "youtube",
    }
}

/// Size buckets of two gigabytes keep binge groups stable across encodes of
/// the same release family.
fn size_bucket(size: u64) -> u64 {
    size / (2 * 1024 * 1024 * 1024)
}

/// Step (a): parse and merge titles into a [`ParsedFile`] and normalize the
/// candidate into a [`ParsedStream`]. Returns `None` for candidates with no
/// playable identity (logged, silently dropped per the error policy).
fn enrich(candidate: Candidate) -> Option<Entry> {
    match candidate.source {
        CandidateSource::Library(torrent) => {
            let parsed = parse_title(&torrent.title);
            let kind = match torrent.kind {
                SourceKind::Torrent => StreamKind::Debrid,
                SourceKind::Usenet => StreamKind::Usenet,
            };
            let service = candidate.service_id.map(|id| ServiceRef {
                short_name: short_name(&id),
                id,
                cached: torrent.confirmed.then_some(true),
            });
            let languages = parsed.languages.clone();
            Some(Entry {
                raw_text: torrent.title.clone(),
                stream: ParsedStream {
                    addon: candidate.addon,
                    kind,
                    service,
                    url: None,
                    info_hash: Some(torrent.hash),
                    sources: torrent.sources,
                    file_index: None,
                    size: (torrent.size > 0).then_some(torrent.size),
                    folder_size: None,
                    filename: Some(torrent.title.clone()),
                    folder_name: None,
                    parsed_file: parsed,
                    seeders: torrent.seeders,
                    age_hours: torrent.age_hours,
                    languages,
                    error: None,
                    message: None,
                    library: torrent.is_library,
                    proxied: false,
                    private: false,
                    binge_group: None,
                    duration: None,
                    bitrate: None,
                    service_item_id: torrent.service_item_id,
                },
                regex_rank: None,
                preferred: false,
                expression_rank: 0,
            })
        }
        CandidateSource::Addon(stream) => enrich_addon_stream(candidate.addon, candidate.service_id, stream),
    }
}

fn enrich_addon_stream(
    addon: crate::models::AddonRef,
    service_id: Option<String>,
    stream: UnprocessedStream,
) -> Option<Entry> {
    let raw_text = stream.canonical_text();
    let hints = stream.behavior_hints.clone().unwrap_or_default();

    let filename = hints
        .filename
        .clone()
        .or_else(|| filename_from_text(&raw_text));
    let folder_name = stream.name.clone().filter(|n| {
        // The addon's display name is only folder-ish when it carries
        // release structure of its own.
        let parsed = parse_title(n);
        !parsed.seasons.is_empty() || parsed.resolution.is_some()
    });

    let file_parse = filename.as_deref().map(parse_title).unwrap_or_default();
    let folder_parse = folder_name.as_deref().map(parse_title).unwrap_or_default();
    let parsed = ParsedFile::merge(file_parse, folder_parse);

    let info_hash = stream.info_hash.as_deref().and_then(InfoHash::parse);
    if stream.info_hash.is_some() && info_hash.is_none() {
        debug!(addon = %addon.name, "candidate carried a malformed info hash");
    }
    if info_hash.is_none() && stream.url.is_none() {
        return None;
    }

    let kind = if service_id.is_some() {
        StreamKind::Debrid
    } else if info_hash.is_some() && stream.url.is_none() {
        StreamKind::P2p
    } else {
        StreamKind::Http
    };

    let service = service_id.map(|id| ServiceRef {
        short_name: short_name(&id),
        id,
        cached: None,
    });

    let size = hints.video_size.or_else(|| size_from_text(&raw_text));
    let seeders = seeders_from_text(&raw_text);
    let languages = parsed.languages.clone();

    Some(Entry {
        stream: ParsedStream {
            addon,
            kind,
            service,
            url: stream.url,
            info_hash,
            sources: stream.sources,
            file_index: stream.file_idx,
            size,
            folder_size: None,
            filename,
            folder_name,
            parsed_file: parsed,
            seeders,
            age_hours: None,
            languages,
            error: None,
            message: None,
            library: false,
            proxied: false,
            private: false,
            binge_group: hints.binge_group,
            duration: None,
            bitrate: None,
            service_item_id: None,
        },
        raw_text,
        regex_rank: None,
        preferred: false,
        expression_rank: 0,
    })
}

/// Last step: the availability pass has resolved every debrid candidate's
/// cached flag; surface the invariant while converting to output form.
fn finalize(entry: Entry) -> ParsedStream {
    let stream = entry.stream;
    debug_assert!(
        stream.kind != StreamKind::Debrid
            || stream.service.as_ref().is_some_and(|s| s.cached.is_some()),
        "debrid stream left the pipeline without a resolved cached flag"
    );
    stream
}

/// Service short names shown in formatted output.
fn short_name(service_id: &str) -> String {
    match service_id {
        "torbox" => "TB".to_string(),
        "realdebrid" => "RD".to_string(),
        "alldebrid" => "AD".to_string(),
        "premiumize" => "PM".to_string(),
        "debridlink" => "DL".to_string(),
        "easynews" => "EN".to_string(),
        other => other.chars().take(2).collect::<String>().to_uppercase(),
    }
}

fn filename_from_text(text: &str) -> Option<String> {
    static VIDEO_LINE: OnceLock<Regex> = OnceLock::new();
    let video_line = VIDEO_LINE.get_or_init(|| {
        Regex::new(r"(?i)\.(mkv|mp4|avi|webm|m4v|ts)\s*$")
            .expect("Invalid regex pattern defined in code")
    });
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .find(|line| video_line.is_match(line))
        .or_else(|| lines.first())
        .map(|line| (*line).to_string())
}

fn seeders_from_text(text: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"👤\s*(\d+)").expect("Invalid regex pattern defined in code")
    });
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn size_from_text(text: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"💾\s*([\d.]+)\s*(TB|GB|MB|KB)").expect("Invalid regex pattern defined in code")
    });
    let caps = re.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = match caps.get(2)?.as_str() {
        "TB" => 1024_f64.powi(4),
        "GB" => 1024_f64.powi(3),
        "MB" => 1024_f64.powi(2),
        _ => 1024.0,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((value * unit) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddonRef;

    fn addon_ref() -> AddonRef {
        AddonRef {
            name: "test".to_string(),
            id: "test".to_string(),
        }
    }

    fn stream_candidate(title: &str, hash: Option<String>, service: Option<&str>) -> Candidate {
        Candidate {
            addon: addon_ref(),
            service_id: service.map(ToString::to_string),
            source: CandidateSource::Addon(UnprocessedStream {
                title: Some(title.to_string()),
                info_hash: hash,
                ..UnprocessedStream::default()
            }),
        }
    }

    #[test]
    fn enrich_extracts_text_annotations() {
        let candidate = stream_candidate(
            "Show.S01E01.1080p.WEB-DL.x265-GRP.mkv\n👤 150 💾 2.5 GB",
            Some("a".repeat(40)),
            Some("torbox"),
        );
        let entry = enrich(candidate).unwrap();
        assert_eq!(entry.stream.seeders, Some(150));
        let size = entry.stream.size.unwrap();
        assert!((2_684_000_000..2_685_000_000).contains(&size));
        assert_eq!(entry.stream.kind, StreamKind::Debrid);
        assert_eq!(
            entry.stream.filename.as_deref(),
            Some("Show.S01E01.1080p.WEB-DL.x265-GRP.mkv")
        );
        assert_eq!(entry.stream.parsed_file.resolution.as_deref(), Some("1080p"));
    }

    #[test]
    fn enrich_drops_unplayable_candidates() {
        let no_identity = stream_candidate("Something", None, None);
        assert!(enrich(no_identity).is_none());

        let bad_hash = stream_candidate("Something", Some("xyz".to_string()), None);
        assert!(enrich(bad_hash).is_none());
    }

    #[test]
    fn enrich_classifies_p2p_and_http() {
        let p2p = enrich(stream_candidate("X.1080p.mkv", Some("b".repeat(40)), None)).unwrap();
        assert_eq!(p2p.stream.kind, StreamKind::P2p);

        let http = Candidate {
            addon: addon_ref(),
            service_id: None,
            source: CandidateSource::Addon(UnprocessedStream {
                title: Some("X.1080p.mkv".to_string()),
                url: Some("https://cdn.example/x.mkv".to_string()),
                ..UnprocessedStream::default()
            }),
        };
        assert_eq!(enrich(http).unwrap().stream.kind, StreamKind::Http);
    }

    #[test]
    fn library_candidates_arrive_cached() {
        let candidate = Candidate {
            addon: addon_ref(),
            service_id: Some("torbox".to_string()),
            source: CandidateSource::Library(crate::models::UnprocessedTorrent {
                kind: SourceKind::Torrent,
                hash: InfoHash::parse(&"c".repeat(40)).unwrap(),
                sources: vec![],
                title: "Show.S01.1080p-GRP".to_string(),
                size: 100,
                indexer: Some("library".to_string()),
                seeders: None,
                age_hours: None,
                download_url: None,
                nzb_url: None,
                confirmed: true,
                is_library: true,
                service_item_id: Some("1".to_string()),
            }),
        };
        let entry = enrich(candidate).unwrap();
        assert!(entry.stream.library);
        assert_eq!(entry.stream.service.unwrap().cached, Some(true));
    }

    #[test]
    fn size_buckets_are_two_gigabytes() {
        assert_eq!(size_bucket(1024 * 1024 * 1024), 0);
        assert_eq!(size_bucket(3 * 1024 * 1024 * 1024), 1);
    }

    #[test]
    fn short_names() {
        assert_eq!(short_name("torbox"), "TB");
        assert_eq!(short_name("realdebrid"), "RD");
        assert_eq!(short_name("mystore"), "MY");
    }
}
