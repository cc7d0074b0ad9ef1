use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub engine: EngineConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub presets: Vec<PresetConfig>,

    pub user: UserConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            suppress_connection_errors: false,
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Externally reachable base URL, used to mint playback handles.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6786,
            cors_allowed_origins: vec!["*".to_string()],
            public_url: "http://localhost:6786".to_string(),
        }
    }
}

/// Engine-wide knobs. Every duration is in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub default_timeout_secs: u64,

    pub max_timeout_secs: u64,

    pub min_timeout_secs: u64,

    pub library_page_size: u32,

    pub library_page_limit: u32,

    pub library_cache_ttl_secs: u64,

    pub library_stale_threshold_secs: u64,

    pub playback_link_validity_secs: u64,

    pub instant_availability_cache_ttl_secs: u64,

    pub search_cache_ttl_secs: u64,

    /// Prefer adding .torrent download URLs over constructing magnets when
    /// an indexer supplied one.
    pub use_torrent_download_url: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 15,
            max_timeout_secs: 50,
            min_timeout_secs: 2,
            library_page_size: 500,
            library_page_limit: 10,
            library_cache_ttl_secs: 86_400,
            library_stale_threshold_secs: 3_600,
            playback_link_validity_secs: 1_200,
            instant_availability_cache_ttl_secs: 1_800,
            search_cache_ttl_secs: 3_600,
            use_torrent_download_url: false,
        }
    }
}

impl EngineConfig {
    /// Clamps an addon/preset timeout into the configured window.
    #[must_use]
    pub const fn clamp_timeout(&self, secs: u64) -> u64 {
        if secs < self.min_timeout_secs {
            self.min_timeout_secs
        } else if secs > self.max_timeout_secs {
            self.max_timeout_secs
        } else {
            secs
        }
    }
}

/// One configured debrid service. Unknown keys are config mistakes and are
/// rejected rather than ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub id: String,

    pub token: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub client_ip: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Adapter family. Defaults to the service id; anything that is not a
    /// natively supported family is driven through the StremThru bridge.
    #[serde(default)]
    pub variant: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One configured addon preset. Expanded into 0..N client instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetConfig {
    pub name: String,

    pub url: Option<String>,

    pub timeout_secs: Option<u64>,

    /// Add one credential-free instance next to the expanded ones.
    pub include_p2p: bool,

    /// Expand into one instance per attached debrid service.
    pub use_multiple_instances: bool,

    /// Splice the first attached service's credential into the URL even
    /// without multi-instance expansion.
    pub services_in_url: bool,

    /// Service ids this preset may expand over; empty means all enabled.
    pub services: Vec<String>,

    /// Media types this preset answers for; empty means all.
    pub media_types: Vec<String>,

    pub resources: Vec<String>,

    /// Extra shouldSkip regexes on top of the built-in noise filters.
    pub skip_patterns: Vec<String>,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: None,
            timeout_secs: None,
            include_p2p: false,
            use_multiple_instances: false,
            services_in_url: false,
            services: Vec::new(),
            media_types: Vec::new(),
            resources: vec!["stream".to_string()],
            skip_patterns: Vec::new(),
        }
    }
}

/// Allow/deny semantics shared by every attribute filter:
/// `required` means the candidate's value must be in the set, `excluded`
/// means it must not be, and `included` overrides both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionFilter {
    pub required: Vec<String>,
    pub excluded: Vec<String>,
    pub included: Vec<String>,
}

impl SelectionFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.excluded.is_empty() && self.included.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SizeRange {
    pub min_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
}

/// The canonical regex filter schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegexFilterConfig {
    /// At least one must match (when non-empty).
    pub include: Vec<String>,
    /// None may match.
    pub exclude: Vec<String>,
    /// All must match.
    pub required: Vec<String>,
    /// Matching candidates sort ahead of non-matching ones.
    pub preferred: Vec<String>,
    /// Ordered list; the earliest matching pattern decides the rank.
    pub ranked: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub resolution: SelectionFilter,
    pub quality: SelectionFilter,
    pub encode: SelectionFilter,
    pub stream_type: SelectionFilter,
    pub visual_tag: SelectionFilter,
    pub audio_tag: SelectionFilter,
    pub audio_channel: SelectionFilter,
    pub language: SelectionFilter,

    /// Per-resolution size windows; the `"default"` key applies to
    /// candidates whose resolution has no window of its own.
    pub size_ranges: std::collections::HashMap<String, SizeRange>,

    /// Minimum seeders for p2p-typed candidates.
    pub min_seeders: Option<u32>,

    /// Maximum age in hours.
    pub max_age_hours: Option<u32>,

    pub regex: RegexFilterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Cached,
    Library,
    Service,
    Resolution,
    Size,
    Quality,
    Seeders,
    Language,
    VisualTag,
    AudioChannel,
    RegexRank,
    ExpressionRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortCriterion {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep at most one entry per service per hash, cached preferred; never
    /// drop the last p2p source.
    #[default]
    Conservative,
    /// Any cached copy of a hash kills all uncached and p2p copies.
    Aggressive,
    KeepAll,
}

/// A typed stream-expression condition used for expression ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamExpression {
    /// Which attribute the condition reads.
    pub field: ExpressionField,
    /// Exact match against the attribute (case-insensitive).
    pub equals: Option<String>,
    /// Substring match against the attribute (case-insensitive).
    pub contains: Option<String>,
    /// Rank contribution when the condition holds.
    pub rank: i32,
}

impl Default for StreamExpression {
    fn default() -> Self {
        Self {
            field: ExpressionField::Resolution,
            equals: None,
            contains: None,
            rank: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionField {
    Resolution,
    Quality,
    Encode,
    ReleaseGroup,
    Language,
    VisualTag,
    AudioTag,
    Addon,
    Service,
    Cached,
    Library,
    Filename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BingeAttribute {
    Service,
    StreamType,
    Addon,
    InfoHash,
    SizeBucket,
    Resolution,
    Quality,
    ReleaseGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoPlayConfig {
    pub enabled: bool,
    pub attributes: Vec<BingeAttribute>,
}

impl Default for AutoPlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attributes: vec![
                BingeAttribute::Service,
                BingeAttribute::StreamType,
                BingeAttribute::Resolution,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatterConfig {
    /// Named formatter id; `custom` reads `template`.
    pub id: String,
    pub template: Option<String>,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            id: "standard".to_string(),
            template: None,
        }
    }
}

/// Per-user processing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    pub filters: FilterConfig,

    pub sort: Vec<SortCriterion>,

    pub dedup_policy: DedupPolicy,

    pub autoplay: AutoPlayConfig,

    pub expressions: Vec<StreamExpression>,

    pub formatter: FormatterConfig,

    /// Service priority for dedup tie-breaks; earlier wins. Defaults to the
    /// declaration order of `services`.
    pub service_priority: Vec<String>,

    /// Fail the whole stream request on resolver errors instead of turning
    /// them into visible info-streams.
    pub strict_resolve_errors: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            filters: FilterConfig::default(),
            sort: vec![
                SortCriterion {
                    key: SortKey::Cached,
                    direction: SortDirection::Descending,
                },
                SortCriterion {
                    key: SortKey::Resolution,
                    direction: SortDirection::Descending,
                },
                SortCriterion {
                    key: SortKey::Size,
                    direction: SortDirection::Descending,
                },
            ],
            dedup_policy: DedupPolicy::default(),
            autoplay: AutoPlayConfig::default(),
            expressions: Vec::new(),
            formatter: FormatterConfig::default(),
            service_priority: Vec::new(),
            strict_resolve_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

const CONFIG_PATH: &str = "config.toml";

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn create_default_if_missing() -> Result<()> {
        if Path::new(CONFIG_PATH).exists() {
            return Ok(());
        }
        let rendered =
            toml::to_string_pretty(&Self::default()).context("Failed to render default config")?;
        std::fs::write(CONFIG_PATH, rendered).context("Failed to write config.toml")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.min_timeout_secs > self.engine.max_timeout_secs {
            bail!("engine.min_timeout_secs exceeds engine.max_timeout_secs");
        }
        if self.engine.library_stale_threshold_secs == 0 {
            bail!("engine.library_stale_threshold_secs must be positive");
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.id.is_empty() {
                bail!("every service needs an id");
            }
            if service.enabled && service.token.is_empty() {
                bail!("service '{}' is enabled but has no token", service.id);
            }
            if !seen.insert(&service.id) {
                bail!("duplicate service id '{}'", service.id);
            }
        }

        for preset in &self.presets {
            if preset.name.is_empty() {
                bail!("every preset needs a name");
            }
            for wanted in &preset.services {
                if !self.services.iter().any(|s| &s.id == wanted) {
                    bail!(
                        "preset '{}' references unknown service '{wanted}'",
                        preset.name
                    );
                }
            }
            for pattern in &preset.skip_patterns {
                regex::Regex::new(pattern).with_context(|| {
                    format!("preset '{}' has invalid skip pattern", preset.name)
                })?;
            }
        }

        for pattern in self
            .user
            .filters
            .regex
            .include
            .iter()
            .chain(&self.user.filters.regex.exclude)
            .chain(&self.user.filters.regex.required)
            .chain(&self.user.filters.regex.preferred)
            .chain(&self.user.filters.regex.ranked)
        {
            regex::Regex::new(pattern).context("invalid user regex filter")?;
        }

        for expression in &self.user.expressions {
            if expression.equals.is_none() && expression.contains.is_none() {
                bail!("stream expression needs either `equals` or `contains`");
            }
        }

        Ok(())
    }

    /// Effective service priority: explicit list first, then declaration
    /// order for anything unlisted.
    #[must_use]
    pub fn service_priority(&self) -> Vec<String> {
        let mut priority = self.user.service_priority.clone();
        for service in &self.services {
            if !priority.contains(&service.id) {
                priority.push(service.id.clone());
            }
        }
        priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn unknown_preset_option_is_rejected() {
        let raw = r#"
            [[presets]]
            name = "x"
            url = "https://a.example"
            definitely_not_an_option = true
        "#;
        let parsed: std::result::Result<Config, _> = toml::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_service_option_is_rejected() {
        let raw = r#"
            [[services]]
            id = "torbox"
            token = "t"
            shady = 1
        "#;
        let parsed: std::result::Result<Config, _> = toml::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn enabled_service_requires_token() {
        let mut config = Config::default();
        config.services.push(ServiceConfig {
            id: "torbox".to_string(),
            token: String::new(),
            enabled: true,
            client_ip: None,
            base_url: None,
            timeout_secs: None,
            variant: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn preset_referencing_unknown_service_fails() {
        let mut config = Config::default();
        config.presets.push(PresetConfig {
            name: "p".to_string(),
            url: Some("https://a.example".to_string()),
            services: vec!["ghost".to_string()],
            ..PresetConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_clamping() {
        let engine = EngineConfig::default();
        assert_eq!(engine.clamp_timeout(1), engine.min_timeout_secs);
        assert_eq!(engine.clamp_timeout(500), engine.max_timeout_secs);
        assert_eq!(engine.clamp_timeout(20), 20);
    }

    #[test]
    fn service_priority_appends_unlisted() {
        let mut config = Config::default();
        for id in ["a", "b", "c"] {
            config.services.push(ServiceConfig {
                id: id.to_string(),
                token: "t".to_string(),
                enabled: true,
                client_ip: None,
                base_url: None,
                timeout_secs: None,
                variant: None,
            });
        }
        config.user.service_priority = vec!["c".to_string()];
        assert_eq!(config.service_priority(), vec!["c", "a", "b"]);
    }

    #[test]
    fn bad_user_regex_rejected() {
        let mut config = Config::default();
        config.user.filters.regex.exclude.push("(".to_string());
        assert!(config.validate().is_err());
    }
}
