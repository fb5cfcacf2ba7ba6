//! Configuration management.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `LITSEARCH_*` environment variables (`__` separates nested keys, e.g.
//! `LITSEARCH_PROVIDERS__SCHOLAR__ENABLED=true`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ProviderId;
use crate::utils::{
    RankingWeights, RateLimit, RateLimitError, RateLimiterSet, RetryConfig,
    DEFAULT_TITLE_THRESHOLD, DEFAULT_USER_AGENT,
};

const CONFIG_FILE_NAME: &str = "config.toml";
const LOCAL_CONFIG_FILE: &str = "litsearch.toml";
const ENV_PREFIX: &str = "LITSEARCH";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub dedup: DedupSettings,

    #[serde(default)]
    pub ranking: RankingWeights,

    /// Per-provider overrides, keyed by provider id
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderSettings>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Query execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Hard ceiling for one query, in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: f64,

    /// Timeout of a single HTTP request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_max_results: default_max_results(),
            user_agent: default_user_agent(),
        }
    }
}

impl SearchSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs_f64(self.deadline_secs.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_deadline_secs() -> f64 {
    30.0
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_results() -> usize {
    50
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Retry/backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,

    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: (self.jitter_min, self.jitter_max),
            ..RetryConfig::default()
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_min() -> f64 {
    0.5
}

fn default_jitter_max() -> f64 {
    1.5
}

/// Deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    /// Normalized-title similarity at or above which two papers merge
    #[serde(default = "default_title_threshold")]
    pub title_similarity_threshold: f64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            title_similarity_threshold: default_title_threshold(),
        }
    }
}

fn default_title_threshold() -> f64 {
    DEFAULT_TITLE_THRESHOLD
}

/// Overrides for one provider; unset fields fall back to built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Contact address for "polite" API pools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailto: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Effective settings of one provider after defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub enabled: bool,
    pub rate_limit: RateLimit,
    pub api_key: Option<String>,
    pub mailto: Option<String>,
    pub base_url: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Conventional environment variables consulted when no key is configured
fn env_api_key(id: ProviderId) -> Option<String> {
    let var = match id {
        ProviderId::PubMed => "NCBI_API_KEY",
        ProviderId::SemanticScholar => "SEMANTIC_SCHOLAR_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn env_mailto(id: ProviderId) -> Option<String> {
    let var = match id {
        ProviderId::Crossref => "CROSSREF_MAILTO",
        ProviderId::OpenAlex => "OPENALEX_EMAIL",
        _ => return None,
    };
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Effective settings for a provider
    pub fn provider(&self, id: ProviderId) -> ProviderConfig {
        let settings = self.providers.get(&id).cloned().unwrap_or_default();
        let default_limit = RateLimit::default_for(id);

        ProviderConfig {
            id,
            // Scholar scrapes HTML and is opt-in
            enabled: settings.enabled.unwrap_or(id != ProviderId::Scholar),
            rate_limit: RateLimit::new(
                settings
                    .requests_per_second
                    .unwrap_or(default_limit.requests_per_second),
                settings
                    .burst
                    .and_then(NonZeroU32::new)
                    .unwrap_or(default_limit.burst),
            ),
            api_key: settings.api_key.or_else(|| env_api_key(id)),
            mailto: settings.mailto.or_else(|| env_mailto(id)),
            base_url: settings.base_url,
        }
    }

    /// Ids of the providers enabled in this configuration
    pub fn enabled_providers(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|id| self.provider(*id).enabled)
            .collect()
    }

    /// One limiter per provider, with configured overrides applied
    pub fn rate_limiters(&self) -> Result<RateLimiterSet, RateLimitError> {
        let mut set = RateLimiterSet::new();
        for id in ProviderId::ALL {
            set.insert(id, self.provider(id).rate_limit)?;
        }
        Ok(set)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.search.deadline_secs.is_finite() || self.search.deadline_secs <= 0.0 {
            return invalid(format!(
                "search.deadline_secs must be positive, got {}",
                self.search.deadline_secs
            ));
        }
        if self.search.request_timeout_secs == 0 {
            return invalid("search.request_timeout_secs must be positive".to_string());
        }
        if self.search.default_max_results == 0 {
            return invalid("search.default_max_results must be positive".to_string());
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if retry.jitter_min < 0.0 || retry.jitter_min > retry.jitter_max {
            return invalid(format!(
                "retry jitter range [{}, {}] is invalid",
                retry.jitter_min, retry.jitter_max
            ));
        }

        let threshold = self.dedup.title_similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!(
                "dedup.title_similarity_threshold must be in (0, 1], got {}",
                threshold
            ));
        }

        for (id, settings) in &self.providers {
            if let Some(rps) = settings.requests_per_second {
                if !rps.is_finite() || rps <= 0.0 {
                    return invalid(format!(
                        "providers.{}.requests_per_second must be positive, got {}",
                        id, rps
                    ));
                }
            }
            if settings.burst == Some(0) {
                return invalid(format!("providers.{}.burst must be at least 1", id));
            }
            if let Some(base_url) = &settings.base_url {
                let parsed = url::Url::parse(base_url).map_err(|e| {
                    ConfigError::Invalid(format!("providers.{}.base_url: {}", id, e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return invalid(format!(
                        "providers.{}.base_url must be http(s), got {}",
                        id, base_url
                    ));
                }
            }
        }

        Ok(())
    }

    /// Render as TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

/// Default config file location: the user config dir, then the working dir
pub fn find_config_file() -> Option<PathBuf> {
    let user = dirs::config_dir().map(|dir| dir.join("litsearch").join(CONFIG_FILE_NAME));
    let local = PathBuf::from(LOCAL_CONFIG_FILE);

    user.into_iter()
        .chain(std::iter::once(local))
        .find(|path| path.is_file())
}

/// Load configuration from `path` (or the default location) and the environment
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path));
        }
        None => {
            if let Some(found) = find_config_file() {
                tracing::debug!("Using config file {}", found.display());
                builder = builder.add_source(config::File::from(found.as_path()));
            }
        }
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.deadline(), Duration::from_secs(30));
        assert_eq!(config.dedup.title_similarity_threshold, 0.92);

        let retry = config.retry.to_retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.jitter, (0.5, 1.5));
    }

    #[test]
    fn test_scholar_is_opt_in() {
        let config = Config::default();
        assert!(!config.provider(ProviderId::Scholar).enabled);
        assert!(config.provider(ProviderId::Arxiv).enabled);
        assert!(!config.enabled_providers().contains(&ProviderId::Scholar));
        assert_eq!(config.enabled_providers().len(), 5);
    }

    #[test]
    fn test_load_config_file() {
        let file = write_config(
            r#"
[search]
deadline_secs = 12.5

[retry]
max_attempts = 5

[dedup]
title_similarity_threshold = 0.95

[providers.scholar]
enabled = true
requests_per_second = 0.2

[providers.crossref]
mailto = "lab@example.org"
base_url = "http://localhost:9999"
burst = 4

[logging]
format = "json"
"#,
        );

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.search.deadline(), Duration::from_millis(12_500));
        assert_eq!(config.search.default_max_results, 50);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.dedup.title_similarity_threshold, 0.95);
        assert_eq!(config.logging.format, LogFormat::Json);

        let scholar = config.provider(ProviderId::Scholar);
        assert!(scholar.enabled);
        assert_eq!(scholar.rate_limit.requests_per_second, 0.2);
        assert_eq!(scholar.rate_limit.burst.get(), 1);

        let crossref = config.provider(ProviderId::Crossref);
        assert_eq!(crossref.mailto.as_deref(), Some("lab@example.org"));
        assert_eq!(crossref.base_url.as_deref(), Some("http://localhost:9999"));
        assert_eq!(crossref.rate_limit.burst.get(), 4);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config("[providers.pubmed]\nrequests_per_second = 0\n");
        assert!(matches!(
            load_config(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.retry.jitter_min = 2.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dedup.title_similarity_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.insert(
            ProviderId::Arxiv,
            ProviderSettings {
                base_url: Some("ftp://example.org".to_string()),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.providers.insert(
            ProviderId::Arxiv,
            ProviderSettings {
                burst: Some(0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limiters_cover_every_provider() {
        let set = Config::default().rate_limiters().unwrap();
        assert_eq!(set.len(), ProviderId::ALL.len());
        let openalex = set.get(ProviderId::OpenAlex).unwrap();
        assert_eq!(openalex.limit(), RateLimit::default_for(ProviderId::OpenAlex));
    }

    #[test]
    fn test_default_config_as_toml() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[search]"));
        assert!(rendered.contains("deadline_secs = 30.0"));
        assert!(rendered.contains("title_similarity_threshold = 0.92"));

        let file = write_config(&rendered);
        let loaded = load_config(Some(file.path())).unwrap();
        assert_eq!(loaded.retry.max_delay_ms, 10_000);
    }
}
