//! Step (e): duplicate elimination across logical stream identities.
//!
//! The identity of a candidate is `{hash, fileIndex|default}`; elimination
//! policies act across all groups sharing a hash. The input arrives sorted,
//! and survivors keep their relative order, which makes every policy
//! idempotent: a second pass sees only winners and keeps them all.

use std::collections::{HashMap, HashSet};

use super::Entry;
use crate::config::DedupPolicy;
use crate::models::StreamKind;

pub(crate) fn dedupe(
    entries: Vec<Entry>,
    policy: DedupPolicy,
    service_priority: &[String],
) -> Vec<Entry> {
    if policy == DedupPolicy::KeepAll {
        return entries;
    }

    // Indices of entries sharing each hash, in sorted order.
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(hash) = &entry.stream.info_hash {
            groups.entry(hash.to_string()).or_default().push(index);
        }
    }

    let mut keep: HashSet<usize> = HashSet::new();
    for indices in groups.values() {
        match policy {
            DedupPolicy::Conservative => {
                keep.extend(conservative(entries.as_slice(), indices));
            }
            DedupPolicy::Aggressive => {
                keep.extend(aggressive(entries.as_slice(), indices, service_priority));
            }
            DedupPolicy::KeepAll => unreachable!("handled above"),
        }
    }

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let hashless = entry.stream.info_hash.is_none();
            (hashless || keep.contains(&index)).then_some(entry)
        })
        .collect()
}

/// Keeps at most one entry per `{service, fileIndex}`, cached preferred;
/// p2p survives only as the group's last remaining source.
fn conservative(entries: &[Entry], indices: &[usize]) -> Vec<usize> {
    let cached: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| entries[i].stream.is_cached())
        .collect();
    let uncached_service: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| {
            let stream = &entries[i].stream;
            stream.service.is_some() && !stream.is_cached()
        })
        .collect();
    let p2p: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| entries[i].stream.kind == StreamKind::P2p)
        .collect();

    let mut kept = Vec::new();
    if !cached.is_empty() {
        kept.extend(first_per_service(entries, &cached));
    } else if !uncached_service.is_empty() {
        kept.extend(first_per_service(entries, &uncached_service));
    } else if let Some(&first) = p2p.first() {
        kept.push(first);
    }

    // Non-debrid, non-p2p entries (plain http/live) never cross-eliminate.
    kept.extend(indices.iter().copied().filter(|&i| {
        let stream = &entries[i].stream;
        stream.service.is_none() && stream.kind != StreamKind::P2p
    }));
    kept
}

/// Any cached copy wins outright: exactly one survivor per hash, chosen by
/// service priority, and every uncached or p2p copy dies.
fn aggressive(entries: &[Entry], indices: &[usize], service_priority: &[String]) -> Vec<usize> {
    let cached: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| entries[i].stream.is_cached())
        .collect();

    if cached.is_empty() {
        return conservative(entries, indices);
    }

    let best = cached
        .iter()
        .copied()
        .min_by_key(|&i| {
            let rank = entries[i]
                .stream
                .service
                .as_ref()
                .and_then(|s| service_priority.iter().position(|p| p == &s.id))
                .unwrap_or(usize::MAX);
            (rank, i)
        })
        .expect("cached set is non-empty");

    let mut kept = vec![best];
    kept.extend(indices.iter().copied().filter(|&i| {
        let stream = &entries[i].stream;
        stream.service.is_none() && stream.kind != StreamKind::P2p
    }));
    kept
}

/// First (sorted-best) entry per `{service, fileIndex}` pair.
fn first_per_service(entries: &[Entry], indices: &[usize]) -> Vec<usize> {
    let mut seen: HashSet<(String, Option<u32>)> = HashSet::new();
    let mut kept = Vec::new();
    for &index in indices {
        let stream = &entries[index].stream;
        let Some(service) = &stream.service else {
            continue;
        };
        if seen.insert((service.id.clone(), stream.file_index)) {
            kept.push(index);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddonRef, InfoHash, ParsedFile, ParsedStream, ServiceRef};

    fn entry(hash: char, service: Option<(&str, bool)>, kind: StreamKind) -> Entry {
        Entry {
            stream: ParsedStream {
                addon: AddonRef {
                    name: "a".to_string(),
                    id: "a".to_string(),
                },
                kind,
                service: service.map(|(id, cached)| ServiceRef {
                    id: id.to_string(),
                    short_name: id.to_uppercase(),
                    cached: Some(cached),
                }),
                url: None,
                info_hash: InfoHash::parse(&hash.to_string().repeat(40)),
                sources: vec![],
                file_index: None,
                size: None,
                folder_size: None,
                filename: None,
                folder_name: None,
                parsed_file: ParsedFile::default(),
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
            raw_text: String::new(),
            regex_rank: None,
            preferred: false,
            expression_rank: 0,
        }
    }

    fn services_of(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| {
                e.stream
                    .service
                    .as_ref()
                    .map_or("p2p".to_string(), |s| s.id.clone())
            })
            .collect()
    }

    #[test]
    fn conservative_keeps_cached_per_service_drops_uncached() {
        let entries = vec![
            entry('a', Some(("svc-a", true)), StreamKind::Debrid),
            entry('a', Some(("svc-b", true)), StreamKind::Debrid),
            entry('a', Some(("svc-c", false)), StreamKind::Debrid),
        ];
        let kept = dedupe(entries, DedupPolicy::Conservative, &[]);
        assert_eq!(services_of(&kept), vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn aggressive_keeps_exactly_one_by_priority() {
        let entries = vec![
            entry('a', Some(("svc-b", true)), StreamKind::Debrid),
            entry('a', Some(("svc-a", true)), StreamKind::Debrid),
            entry('a', Some(("svc-c", false)), StreamKind::Debrid),
        ];
        let priority = vec!["svc-a".to_string(), "svc-b".to_string()];
        let kept = dedupe(entries, DedupPolicy::Aggressive, &priority);
        assert_eq!(services_of(&kept), vec!["svc-a"]);
    }

    #[test]
    fn keep_all_keeps_all() {
        let entries = vec![
            entry('a', Some(("svc-a", true)), StreamKind::Debrid),
            entry('a', Some(("svc-b", true)), StreamKind::Debrid),
            entry('a', Some(("svc-c", false)), StreamKind::Debrid),
        ];
        assert_eq!(dedupe(entries, DedupPolicy::KeepAll, &[]).len(), 3);
    }

    #[test]
    fn aggressive_drops_p2p_of_cached_hash() {
        let entries = vec![
            entry('a', Some(("svc-a", true)), StreamKind::Debrid),
            entry('a', None, StreamKind::P2p),
        ];
        let kept = dedupe(entries, DedupPolicy::Aggressive, &[]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stream.kind, StreamKind::Debrid);
    }

    #[test]
    fn lone_p2p_survives_conservative() {
        let entries = vec![entry('a', None, StreamKind::P2p)];
        let kept = dedupe(entries, DedupPolicy::Conservative, &[]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn distinct_hashes_do_not_interact() {
        let entries = vec![
            entry('a', Some(("svc-a", true)), StreamKind::Debrid),
            entry('b', Some(("svc-a", false)), StreamKind::Debrid),
        ];
        let kept = dedupe(entries, DedupPolicy::Aggressive, &[]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn hashless_entries_pass_through() {
        let mut e = entry('a', None, StreamKind::Http);
        e.stream.info_hash = None;
        let kept = dedupe(vec![e], DedupPolicy::Aggressive, &[]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn dedupe_is_idempotent_for_every_policy() {
        for policy in [
            DedupPolicy::Conservative,
            DedupPolicy::Aggressive,
            DedupPolicy::KeepAll,
        ] {
            let entries = vec![
                entry('a', Some(("svc-a", true)), StreamKind::Debrid),
                entry('a', Some(("svc-b", true)), StreamKind::Debrid),
                entry('a', Some(("svc-c", false)), StreamKind::Debrid),
                entry('a', None, StreamKind::P2p),
                entry('b', None, StreamKind::P2p),
                entry('c', Some(("svc-a", false)), StreamKind::Debrid),
            ];
            let once = dedupe(entries, policy, &[]);
            let once_services = services_of(&once);
            let twice = dedupe(once, policy, &[]);
            assert_eq!(services_of(&twice), once_services, "policy {policy:?}");
        }
    }
}
