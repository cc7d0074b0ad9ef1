//! Fan-out/fan-in scheduler for one stream request.
//!
//! Every upstream addon, every library search and the metadata lookup run as
//! their own task with their own deadline; one failure never cancels the
//! siblings. Arrival order is not meaningful, the processor reorders.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::clients::{AddonClient, MetadataClient};
use crate::config::EngineConfig;
use crate::library::LibraryService;
use crate::matcher;
use crate::models::{
    AddonError, AddonRef, ErrorKind, SearchMetadata, SourceKind, UnprocessedStream,
    UnprocessedTorrent,
};
use crate::parser::{ParsedId, parse_title};

/// One pre-processor candidate with its origin attached.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub addon: AddonRef,
    /// Debrid service this candidate routes through, when known up front.
    pub service_id: Option<String>,
    pub source: CandidateSource,
}

#[derive(Debug, Clone)]
pub enum CandidateSource {
    Addon(UnprocessedStream),
    Library(UnprocessedTorrent),
}

#[derive(Debug, Default)]
pub struct AggregateOutcome {
    pub metadata: Option<SearchMetadata>,
    pub candidates: Vec<Candidate>,
    pub errors: Vec<AddonError>,
}

pub struct Aggregator {
    addons: Vec<Arc<AddonClient>>,
    libraries: Vec<Arc<LibraryService>>,
    metadata: MetadataClient,
    engine: EngineConfig,
}

enum TaskOutput {
    Addon {
        addon: AddonRef,
        service_id: Option<String>,
        streams: Vec<UnprocessedStream>,
        errors: Vec<AddonError>,
    },
    Library {
        addon: AddonRef,
        service_id: String,
        result: Result<Vec<UnprocessedTorrent>, AddonError>,
    },
}

impl Aggregator {
    #[must_use]
    pub fn new(
        addons: Vec<Arc<AddonClient>>,
        libraries: Vec<Arc<LibraryService>>,
        metadata: MetadataClient,
        engine: EngineConfig,
    ) -> Self {
        Self {
            addons,
            libraries,
            metadata,
            engine,
        }
    }

    /// Fans a stream request out to every configured source and gathers
    /// whatever settled before the deadlines.
    pub async fn fetch_streams(
        &self,
        parsed_id: &ParsedId,
        media_type: &str,
        request_deadline: Option<Duration>,
    ) -> AggregateOutcome {
        let started = Instant::now();

        let metadata = match self.metadata.search_metadata(parsed_id).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(id = %parsed_id, error = %err, "metadata lookup failed");
                return AggregateOutcome {
                    metadata: None,
                    candidates: Vec::new(),
                    errors: vec![AddonError {
                        addon_name: "metadata".to_string(),
                        kind: ErrorKind::Network,
                        description: err.to_string(),
                    }],
                };
            }
        };

        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let encoded_id = parsed_id.encode();

        for addon in self.addon_instances(media_type) {
            let addon_ref = AddonRef {
                name: addon.name().to_string(),
                id: addon.id().to_string(),
            };
            let service_id = addon.service_id().map(str::to_string);
            let deadline = self.effective_deadline(addon.timeout(), request_deadline);
            let media_type = media_type.to_string();
            let id = encoded_id.clone();
            tasks.spawn(async move {
                let outcome =
                    tokio::time::timeout(deadline, addon.get_streams(&media_type, &id)).await;
                match outcome {
                    Ok((streams, errors)) => TaskOutput::Addon {
                        addon: addon_ref,
                        service_id,
                        streams,
                        errors,
                    },
                    Err(_) => TaskOutput::Addon {
                        addon: addon_ref.clone(),
                        service_id,
                        streams: Vec::new(),
                        errors: vec![AddonError::timeout(addon_ref.name)],
                    },
                }
            });
        }

        for library in &self.libraries {
            let service = library.service();
            let caps = service.capabilities();
            let kinds = [
                caps.torrent.then_some(SourceKind::Torrent),
                caps.usenet.then_some(SourceKind::Usenet),
            ];
            for kind in kinds.into_iter().flatten() {
                let library = Arc::clone(library);
                let service_id = service.id().to_string();
                let metadata = metadata.clone();
                let deadline = self.effective_deadline(
                    Duration::from_secs(self.engine.default_timeout_secs),
                    request_deadline,
                );
                let addon_ref = AddonRef {
                    name: format!("Library ({service_id})"),
                    id: format!("library-{service_id}"),
                };
                tasks.spawn(async move {
                    let outcome =
                        tokio::time::timeout(deadline, library.search(kind, &metadata)).await;
                    let result = match outcome {
                        Ok(Ok(items)) => Ok(items),
                        Ok(Err(err)) => Err(AddonError {
                            addon_name: addon_ref.name.clone(),
                            kind: err.error_kind(),
                            description: err.to_string(),
                        }),
                        Err(_) => Err(AddonError::timeout(addon_ref.name.clone())),
                    };
                    TaskOutput::Library {
                        addon: addon_ref,
                        service_id,
                        result,
                    }
                });
            }
        }

        let mut candidates = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutput::Addon {
                    addon,
                    service_id,
                    streams,
                    errors: addon_errors,
                }) => {
                    errors.extend(addon_errors);
                    for stream in streams {
                        candidates.push(Candidate {
                            addon: addon.clone(),
                            service_id: service_id.clone(),
                            source: CandidateSource::Addon(stream),
                        });
                    }
                }
                Ok(TaskOutput::Library {
                    addon,
                    service_id,
                    result,
                }) => match result {
                    Ok(items) => {
                        for item in items {
                            candidates.push(Candidate {
                                addon: addon.clone(),
                                service_id: Some(service_id.clone()),
                                source: CandidateSource::Library(item),
                            });
                        }
                    }
                    Err(error) => errors.push(error),
                },
                Err(join_error) => {
                    warn!(error = %join_error, "aggregation task panicked");
                    errors.push(AddonError {
                        addon_name: "aggregator".to_string(),
                        kind: ErrorKind::Internal,
                        description: join_error.to_string(),
                    });
                }
            }
        }

        let before_gate = candidates.len();
        let candidates = title_gate(candidates, &metadata);

        info!(
            event = "aggregation_finished",
            id = %parsed_id,
            candidates = candidates.len(),
            gated = before_gate - candidates.len(),
            errors = errors.len(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Aggregation finished"
        );

        AggregateOutcome {
            metadata: Some(metadata),
            candidates,
            errors,
        }
    }

    /// Addon instances answering for this media type.
    fn addon_instances(&self, media_type: &str) -> Vec<Arc<AddonClient>> {
        self.addons
            .iter()
            .filter(|addon| addon.serves_media_type(media_type))
            .cloned()
            .collect()
    }

    fn effective_deadline(
        &self,
        addon_timeout: Duration,
        request_deadline: Option<Duration>,
    ) -> Duration {
        let clamped = Duration::from_secs(self.engine.clamp_timeout(addon_timeout.as_secs().max(1)));
        match request_deadline {
            Some(request) => clamped.min(request),
            None => clamped,
        }
    }
}

/// Discards candidates whose cleaned parsed title does not reach the match
/// threshold against any known title. Library candidates were matched at
/// search time and pass through.
fn title_gate(candidates: Vec<Candidate>, metadata: &SearchMetadata) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| match &candidate.source {
            CandidateSource::Library(_) => true,
            CandidateSource::Addon(stream) => {
                let text = stream.canonical_text();
                let first_line = text.lines().next().unwrap_or_default();
                let parsed = parse_title(first_line);
                let title = parsed.title.as_deref().unwrap_or(first_line);
                matcher::title_matches(
                    title,
                    &metadata.titles,
                    matcher::LIBRARY_MATCH_THRESHOLD,
                )
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(titles: &[&str]) -> SearchMetadata {
        SearchMetadata {
            primary_title: titles.first().unwrap_or(&"").to_string(),
            titles: titles.iter().map(ToString::to_string).collect(),
            year: None,
            season: None,
            episode: None,
            absolute_episode: None,
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

    fn addon_candidate(first_line: &str) -> Candidate {
        Candidate {
            addon: AddonRef {
                name: "a".to_string(),
                id: "a".to_string(),
            },
            service_id: None,
            source: CandidateSource::Addon(UnprocessedStream {
                title: Some(first_line.to_string()),
                info_hash: Some("a".repeat(40)),
                ..UnprocessedStream::default()
            }),
        }
    }

    #[test]
    fn title_gate_drops_unrelated_candidates() {
        let metadata = meta(&["Inception"]);
        let kept = title_gate(
            vec![
                addon_candidate("Inception.2010.1080p.BluRay.x264-GRP"),
                addon_candidate("Totally.Different.Movie.2011.1080p-GRP"),
            ],
            &metadata,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn title_gate_keeps_library_candidates() {
        let metadata = meta(&["Inception"]);
        let library = Candidate {
            addon: AddonRef {
                name: "lib".to_string(),
                id: "lib".to_string(),
            },
            service_id: Some("torbox".to_string()),
            source: CandidateSource::Library(UnprocessedTorrent {
                kind: SourceKind::Torrent,
                hash: crate::models::InfoHash::parse(&"b".repeat(40)).unwrap(),
                sources: vec![],
                title: "Whatever.Name".to_string(),
                size: 0,
                indexer: None,
                seeders: None,
                age_hours: None,
                download_url: None,
                nzb_url: None,
                confirmed: true,
                is_library: true,
                service_item_id: Some("1".to_string()),
            }),
        };
        let kept = title_gate(vec![library], &metadata);
        assert_eq!(kept.len(), 1);
    }
}
