//! Shared application state wired once at startup.
//!
//! Process-scoped singletons (caches, the lock manager, service adapters)
//! live here and are passed around by `Arc` handle; nothing owns anything
//! cyclically, and background tasks only ever hold the service handles they
//! need.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::Aggregator;
use crate::cache::Cache;
use crate::clients::debrid::{
    DebridService, StremThruClient, StremThruConfig, TorBoxClient, TorBoxConfig, TorrentCapable,
    UsenetCapable,
};
use crate::clients::{AddonClient, MetadataClient, expand_presets};
use crate::config::{Config, ServiceConfig};
use crate::library::LibraryService;
use crate::lock::LockManager;
use crate::models::{DebridDownload, InstantAvailability, SearchMetadata};
use crate::processor::Processor;
use crate::resolver::PlaybackResolver;

/// Everything a request handler needs, shared by handle.
pub struct SharedState {
    pub config: Config,

    pub locks: LockManager,

    pub services: HashMap<String, Arc<DebridService>>,

    pub libraries: Vec<Arc<LibraryService>>,

    pub metadata: MetadataClient,

    pub aggregator: Aggregator,

    pub processor: Processor,

    pub resolver: PlaybackResolver,
}

impl SharedState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let locks = LockManager::new();
        let library_cache: Cache<Arc<Vec<DebridDownload>>> = Cache::new("library", 4_096);
        let check_cache: Cache<InstantAvailability> = Cache::new("availability", 100_000);
        let metadata_cache: Cache<SearchMetadata> = Cache::new("search-metadata", 10_000);
        let link_cache: Cache<Option<String>> = Cache::new("playback-links", 100_000);

        let mut services: HashMap<String, Arc<DebridService>> = HashMap::new();
        for service_config in config.services.iter().filter(|s| s.enabled) {
            let service = build_service(
                service_config,
                &config,
                library_cache.clone(),
                check_cache.clone(),
                locks.clone(),
            );
            services.insert(service_config.id.clone(), Arc::new(service));
        }

        let libraries: Vec<Arc<LibraryService>> = services
            .values()
            .map(|service| Arc::new(LibraryService::new(Arc::clone(service))))
            .collect();

        let metadata = MetadataClient::new(
            metadata_cache,
            locks.clone(),
            Duration::from_secs(config.engine.search_cache_ttl_secs),
        );

        let addons: Vec<Arc<AddonClient>> = expand_presets(
            &config.presets,
            &config.services,
            Duration::from_secs(config.engine.default_timeout_secs),
        )
        .into_iter()
        .map(Arc::new)
        .collect();

        let aggregator = Aggregator::new(
            addons,
            libraries.clone(),
            metadata.clone(),
            config.engine.clone(),
        );

        let processor = Processor::new(
            services.clone(),
            config.service_priority(),
            config.user.clone(),
        );

        let resolver = PlaybackResolver::new(
            services.clone(),
            link_cache,
            locks.clone(),
            config.engine.clone(),
        );

        Ok(Self {
            config,
            locks,
            services,
            libraries,
            metadata,
            aggregator,
            processor,
            resolver,
        })
    }
}

fn build_service(
    service_config: &ServiceConfig,
    config: &Config,
    library_cache: Cache<Arc<Vec<DebridDownload>>>,
    check_cache: Cache<InstantAvailability>,
    locks: LockManager,
) -> DebridService {
    let timeout = service_config
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(config.engine.default_timeout_secs));
    let variant = service_config
        .variant
        .clone()
        .unwrap_or_else(|| service_config.id.clone());

    let (torrent, usenet): (
        Option<Arc<dyn TorrentCapable>>,
        Option<Arc<dyn UsenetCapable>>,
    ) = if variant == "torbox" {
        let client = Arc::new(TorBoxClient::new(TorBoxConfig {
            token: service_config.token.clone(),
            client_ip: service_config.client_ip.clone(),
            base_url: service_config.base_url.clone(),
            timeout: Some(timeout),
        }));
        (
            Some(client.clone() as Arc<dyn TorrentCapable>),
            Some(client as Arc<dyn UsenetCapable>),
        )
    } else {
        let client = Arc::new(StremThruClient::new(StremThruConfig {
            store: variant,
            token: service_config.token.clone(),
            client_ip: service_config.client_ip.clone(),
            base_url: service_config.base_url.clone(),
            timeout: Some(timeout),
        }));
        (Some(client as Arc<dyn TorrentCapable>), None)
    };

    DebridService::new(
        service_config.id.clone(),
        short_label(&service_config.id),
        &service_config.token,
        torrent,
        usenet,
        library_cache,
        check_cache,
        locks,
        config.engine.clone(),
    )
}

fn short_label(service_id: &str) -> String {
    match service_id {
        "torbox" => "TB".to_string(),
        "realdebrid" => "RD".to_string(),
        "alldebrid" => "AD".to_string(),
        "premiumize" => "PM".to_string(),
        other => other.chars().take(2).collect::<String>().to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresetConfig;

    #[test]
    fn builds_from_default_config() {
        let state = SharedState::new(Config::default()).unwrap();
        assert!(state.services.is_empty());
        assert!(state.libraries.is_empty());
    }

    #[test]
    fn builds_services_and_libraries() {
        let mut config = Config::default();
        config.services.push(ServiceConfig {
            id: "torbox".to_string(),
            token: "t".to_string(),
            enabled: true,
            client_ip: None,
            base_url: None,
            timeout_secs: None,
            variant: None,
        });
        config.services.push(ServiceConfig {
            id: "realdebrid".to_string(),
            token: "r".to_string(),
            enabled: true,
            client_ip: None,
            base_url: None,
            timeout_secs: None,
            variant: Some("realdebrid".to_string()),
        });
        config.presets.push(PresetConfig {
            name: "torrents".to_string(),
            url: Some("https://addon.example".to_string()),
            use_multiple_instances: true,
            ..PresetConfig::default()
        });

        let state = SharedState::new(config).unwrap();
        assert_eq!(state.services.len(), 2);
        assert_eq!(state.libraries.len(), 2);
        assert!(state.services["torbox"].capabilities().usenet);
        assert!(!state.services["realdebrid"].capabilities().usenet);
    }

    #[test]
    fn disabled_services_are_skipped() {
        let mut config = Config::default();
        config.services.push(ServiceConfig {
            id: "torbox".to_string(),
            token: "t".to_string(),
            enabled: false,
            client_ip: None,
            base_url: None,
            timeout_secs: None,
            variant: None,
        });
        let state = SharedState::new(config).unwrap();
        assert!(state.services.is_empty());
    }
}
