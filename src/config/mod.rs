//! Configuration loading for the lead engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `LEADINTEL_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scoring::{FitTier, ScoringConfig};

const ENV_PREFIX: &str = "LEADINTEL_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `LEADINTEL_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limit_policy: RateLimitPolicyConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Opaque per-provider settings keyed by provider id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderCredentials>,
}

/// Sync scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    /// Interval used when a provider declares none.
    #[serde(default = "default_scheduler_default_interval_minutes")]
    pub default_interval_minutes: u32,
    #[serde(default = "default_scheduler_min_interval_minutes")]
    pub min_interval_minutes: u32,
    #[serde(default = "default_scheduler_max_interval_minutes")]
    pub max_interval_minutes: u32,
    /// Maximum number of jobs kept in the in-memory history.
    #[serde(default = "default_scheduler_job_history_limit")]
    pub job_history_limit: usize,
    /// Terminal jobs older than this are purged from history.
    #[serde(default = "default_scheduler_job_retention_hours")]
    pub job_retention_hours: u64,
    /// Jobs running longer than this are logged at warn level.
    #[serde(default = "default_scheduler_long_running_warn_seconds")]
    pub long_running_warn_seconds: u64,
}

/// Rate limit policy configuration for handling provider rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitPolicyConfig {
    /// Base retry interval in seconds. Backoff grows as `base_seconds * 2^strikes`.
    ///
    /// Environment variable: `LEADINTEL_RATE_LIMIT_BASE_SECONDS`
    #[serde(default = "default_rate_limit_base_seconds")]
    pub base_seconds: u64,

    /// Upper bound for the exponential backoff. Must be >= base_seconds.
    ///
    /// Environment variable: `LEADINTEL_RATE_LIMIT_MAX_SECONDS`
    #[serde(default = "default_rate_limit_max_seconds")]
    pub max_seconds: u64,

    /// Random factor (0.0-1.0) added on top of the computed backoff.
    ///
    /// Environment variable: `LEADINTEL_RATE_LIMIT_JITTER_FACTOR`
    #[serde(default = "default_rate_limit_jitter_factor")]
    pub jitter_factor: f64,

    /// Provider-specific policy overrides
    ///
    /// Environment variable: `LEADINTEL_RATE_LIMIT_OVERRIDE_{PROVIDER}_{SETTING}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_overrides: BTreeMap<String, RateLimitProviderOverride>,
}

/// Provider-specific rate limit policy overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitProviderOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
}

/// Call policy applied to every provider adapter built from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AdapterConfig {
    #[serde(default = "default_adapter_timeout_ms")]
    pub timeout_ms: u64,
    /// Immediate retries for transient failures.
    #[serde(default = "default_adapter_max_transient_retries")]
    pub max_transient_retries: u32,
}

impl AdapterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Discovery poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    #[serde(default = "default_discovery_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Candidates scoring below this are discarded.
    #[serde(default = "default_discovery_min_engagement_score")]
    pub min_engagement_score: u8,
    /// Run a full enrichment pass before persisting a new lead.
    #[serde(default = "default_discovery_auto_enrich")]
    pub auto_enrich: bool,
    #[serde(default = "default_discovery_high_value_score")]
    pub high_value_score: u8,
    #[serde(default = "default_discovery_high_value_confidence")]
    pub high_value_confidence: f64,
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Opaque provider settings (`api_base`, `api_key`, `kind`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCredentials(BTreeMap<String, String>);

impl ProviderCredentials {
    /// Keys that are safe to print in clear text.
    const PUBLIC_KEYS: &'static [&'static str] = &[
        "kind",
        "api_base",
        "interval_minutes",
        "discovery",
        "enabled",
        "sync",
        "confidence",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn redacted(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(key, value)| {
                    if Self::PUBLIC_KEYS.contains(&key.as_str()) {
                        (key.clone(), value.clone())
                    } else {
                        (key.clone(), REDACTED.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            scheduler: SchedulerConfig::default(),
            rate_limit_policy: RateLimitPolicyConfig::default(),
            adapter: AdapterConfig::default(),
            discovery: DiscoveryConfig::default(),
            scoring: ScoringConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: default_scheduler_default_interval_minutes(),
            min_interval_minutes: default_scheduler_min_interval_minutes(),
            max_interval_minutes: default_scheduler_max_interval_minutes(),
            job_history_limit: default_scheduler_job_history_limit(),
            job_retention_hours: default_scheduler_job_retention_hours(),
            long_running_warn_seconds: default_scheduler_long_running_warn_seconds(),
        }
    }
}

impl Default for RateLimitPolicyConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_rate_limit_base_seconds(),
            max_seconds: default_rate_limit_max_seconds(),
            jitter_factor: default_rate_limit_jitter_factor(),
            provider_overrides: BTreeMap::new(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_adapter_timeout_ms(),
            max_transient_retries: default_adapter_max_transient_retries(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            poll_interval_seconds: default_discovery_poll_interval_seconds(),
            min_engagement_score: default_discovery_min_engagement_score(),
            auto_enrich: default_discovery_auto_enrich(),
            high_value_score: default_discovery_high_value_score(),
            high_value_confidence: default_discovery_high_value_confidence(),
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_minutes == 0 || self.min_interval_minutes > self.max_interval_minutes
        {
            return Err(ConfigError::InvalidSchedulerIntervalBounds {
                min: self.min_interval_minutes,
                max: self.max_interval_minutes,
            });
        }

        if !(self.min_interval_minutes..=self.max_interval_minutes)
            .contains(&self.default_interval_minutes)
        {
            return Err(ConfigError::InvalidSchedulerDefaultInterval {
                value: self.default_interval_minutes,
                min: self.min_interval_minutes,
                max: self.max_interval_minutes,
            });
        }

        if self.job_history_limit == 0 {
            return Err(ConfigError::InvalidJobHistoryLimit);
        }

        Ok(())
    }
}

impl RateLimitPolicyConfig {
    /// Validate rate limit policy configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_seconds > self.max_seconds {
            return Err(ConfigError::InvalidRateLimitBounds {
                base: self.base_seconds,
                max: self.max_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRateLimitJitter {
                value: self.jitter_factor,
            });
        }

        for (provider, override_config) in &self.provider_overrides {
            let base = override_config.base_seconds.unwrap_or(self.base_seconds);
            let max = override_config.max_seconds.unwrap_or(self.max_seconds);
            let jitter = override_config.jitter_factor.unwrap_or(self.jitter_factor);

            if base > max {
                return Err(ConfigError::InvalidRateLimitProviderBounds {
                    provider: provider.clone(),
                    base,
                    max,
                });
            }

            if !(0.0..=1.0).contains(&jitter) {
                return Err(ConfigError::InvalidRateLimitProviderJitter {
                    provider: provider.clone(),
                    value: jitter,
                });
            }
        }

        Ok(())
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidDiscoveryPollInterval);
        }
        if self.min_engagement_score > 100 || self.high_value_score > 100 {
            return Err(ConfigError::InvalidDiscoveryScore {
                min_engagement: self.min_engagement_score,
                high_value: self.high_value_score,
            });
        }
        if !(0.0..=1.0).contains(&self.high_value_confidence) {
            return Err(ConfigError::InvalidDiscoveryConfidence {
                value: self.high_value_confidence,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (provider secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.providers = config
            .providers
            .iter()
            .map(|(id, credentials)| (id.clone(), credentials.redacted()))
            .collect();
        if let Some((scheme, _)) = config.database_url.split_once("://")
            && config.database_url.contains('@')
        {
            config.database_url = format!("{scheme}://{REDACTED}");
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter.timeout_ms == 0 {
            return Err(ConfigError::InvalidAdapterTimeout);
        }

        self.scheduler.validate()?;
        self.rate_limit_policy.validate()?;
        self.discovery.validate()?;
        self.scoring
            .validate()
            .map_err(|reason| ConfigError::InvalidScoring { reason })?;

        for (provider, credentials) in &self.providers {
            if let Some(minutes) = credentials.get("interval_minutes") {
                let parsed: Option<u32> = minutes.trim().parse().ok();
                let in_range = parsed.is_some_and(|m| {
                    (self.scheduler.min_interval_minutes..=self.scheduler.max_interval_minutes)
                        .contains(&m)
                });
                if !in_range {
                    return Err(ConfigError::InvalidProviderInterval {
                        provider: provider.clone(),
                        value: minutes.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://leadintel.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_scheduler_default_interval_minutes() -> u32 {
    60
}

fn default_scheduler_min_interval_minutes() -> u32 {
    5
}

fn default_scheduler_max_interval_minutes() -> u32 {
    1440
}

fn default_scheduler_job_history_limit() -> usize {
    500
}

fn default_scheduler_job_retention_hours() -> u64 {
    168
}

fn default_scheduler_long_running_warn_seconds() -> u64 {
    300
}

fn default_rate_limit_base_seconds() -> u64 {
    5
}

fn default_rate_limit_max_seconds() -> u64 {
    900
}

fn default_rate_limit_jitter_factor() -> f64 {
    0.1
}

fn default_adapter_timeout_ms() -> u64 {
    10_000
}

fn default_adapter_max_transient_retries() -> u32 {
    2
}

fn default_discovery_enabled() -> bool {
    true
}

fn default_discovery_poll_interval_seconds() -> u64 {
    300
}

fn default_discovery_min_engagement_score() -> u8 {
    60
}

fn default_discovery_auto_enrich() -> bool {
    true
}

fn default_discovery_high_value_score() -> u8 {
    80
}

fn default_discovery_high_value_confidence() -> f64 {
    0.9
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("scheduler interval bounds are invalid (min: {min}, max: {max})")]
    InvalidSchedulerIntervalBounds { min: u32, max: u32 },
    #[error("scheduler default interval {value} must be between {min} and {max} minutes")]
    InvalidSchedulerDefaultInterval { value: u32, min: u32, max: u32 },
    #[error("scheduler job history limit must be at least 1")]
    InvalidJobHistoryLimit,
    #[error("rate limit base seconds ({base}) cannot be greater than max seconds ({max})")]
    InvalidRateLimitBounds { base: u64, max: u64 },
    #[error("rate limit jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRateLimitJitter { value: f64 },
    #[error(
        "rate limit override for provider '{provider}' has base seconds ({base}) greater than max seconds ({max})"
    )]
    InvalidRateLimitProviderBounds {
        provider: String,
        base: u64,
        max: u64,
    },
    #[error(
        "rate limit override for provider '{provider}' has jitter factor {value} outside 0.0-1.0"
    )]
    InvalidRateLimitProviderJitter { provider: String, value: f64 },
    #[error("adapter timeout must be greater than zero")]
    InvalidAdapterTimeout,
    #[error("discovery poll interval must be greater than zero")]
    InvalidDiscoveryPollInterval,
    #[error(
        "discovery scores must be at most 100 (min engagement: {min_engagement}, high value: {high_value})"
    )]
    InvalidDiscoveryScore { min_engagement: u8, high_value: u8 },
    #[error("discovery high value confidence must be between 0.0 and 1.0, got {value}")]
    InvalidDiscoveryConfidence { value: f64 },
    #[error("invalid fit tier '{entry}'; expected <min_employees>:<score>")]
    InvalidFitTier { entry: String },
    #[error("invalid scoring configuration: {reason}")]
    InvalidScoring { reason: String },
    #[error("provider '{provider}' has an invalid interval_minutes value '{value}'")]
    InvalidProviderInterval { provider: String, value: String },
}

/// Loads configuration using layered `.env` files and `LEADINTEL_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let scheduler = SchedulerConfig {
            default_interval_minutes: take_parsed(&mut layered, "SCHEDULER_DEFAULT_INTERVAL_MINUTES")
                .unwrap_or_else(default_scheduler_default_interval_minutes),
            min_interval_minutes: take_parsed(&mut layered, "SCHEDULER_MIN_INTERVAL_MINUTES")
                .unwrap_or_else(default_scheduler_min_interval_minutes),
            max_interval_minutes: take_parsed(&mut layered, "SCHEDULER_MAX_INTERVAL_MINUTES")
                .unwrap_or_else(default_scheduler_max_interval_minutes),
            job_history_limit: take_parsed(&mut layered, "SCHEDULER_JOB_HISTORY_LIMIT")
                .unwrap_or_else(default_scheduler_job_history_limit),
            job_retention_hours: take_parsed(&mut layered, "SCHEDULER_JOB_RETENTION_HOURS")
                .unwrap_or_else(default_scheduler_job_retention_hours),
            long_running_warn_seconds: take_parsed(
                &mut layered,
                "SCHEDULER_LONG_RUNNING_WARN_SECONDS",
            )
            .unwrap_or_else(default_scheduler_long_running_warn_seconds),
        };

        let mut rate_limit_policy = RateLimitPolicyConfig {
            base_seconds: take_parsed(&mut layered, "RATE_LIMIT_BASE_SECONDS")
                .unwrap_or_else(default_rate_limit_base_seconds),
            max_seconds: take_parsed(&mut layered, "RATE_LIMIT_MAX_SECONDS")
                .unwrap_or_else(default_rate_limit_max_seconds),
            jitter_factor: take_parsed(&mut layered, "RATE_LIMIT_JITTER_FACTOR")
                .unwrap_or_else(default_rate_limit_jitter_factor),
            provider_overrides: BTreeMap::new(),
        };

        let adapter = AdapterConfig {
            timeout_ms: take_parsed(&mut layered, "ADAPTER_TIMEOUT_MS")
                .unwrap_or_else(default_adapter_timeout_ms),
            max_transient_retries: take_parsed(&mut layered, "ADAPTER_MAX_TRANSIENT_RETRIES")
                .unwrap_or_else(default_adapter_max_transient_retries),
        };

        let discovery = DiscoveryConfig {
            enabled: take_parsed(&mut layered, "DISCOVERY_ENABLED")
                .unwrap_or_else(default_discovery_enabled),
            poll_interval_seconds: take_parsed(&mut layered, "DISCOVERY_POLL_INTERVAL_SECONDS")
                .unwrap_or_else(default_discovery_poll_interval_seconds),
            min_engagement_score: take_parsed(&mut layered, "DISCOVERY_MIN_ENGAGEMENT_SCORE")
                .unwrap_or_else(default_discovery_min_engagement_score),
            auto_enrich: take_parsed(&mut layered, "DISCOVERY_AUTO_ENRICH")
                .unwrap_or_else(default_discovery_auto_enrich),
            high_value_score: take_parsed(&mut layered, "DISCOVERY_HIGH_VALUE_SCORE")
                .unwrap_or_else(default_discovery_high_value_score),
            high_value_confidence: take_parsed(&mut layered, "DISCOVERY_HIGH_VALUE_CONFIDENCE")
                .unwrap_or_else(default_discovery_high_value_confidence),
        };

        let mut scoring = ScoringConfig::default();
        if let Some(hot) = take_parsed(&mut layered, "SCORING_HOT_THRESHOLD") {
            scoring.thresholds.hot = hot;
        }
        if let Some(warm) = take_parsed(&mut layered, "SCORING_WARM_THRESHOLD") {
            scoring.thresholds.warm = warm;
        }
        if let Some(weight) = take_parsed(&mut layered, "SCORING_WEIGHT_INTENT") {
            scoring.weights.intent = weight;
        }
        if let Some(weight) = take_parsed(&mut layered, "SCORING_WEIGHT_FIT") {
            scoring.weights.fit = weight;
        }
        if let Some(weight) = take_parsed(&mut layered, "SCORING_WEIGHT_URGENCY") {
            scoring.weights.urgency = weight;
        }
        if let Some(decay) = take_parsed(&mut layered, "SCORING_URGENCY_DECAY_PER_DAY") {
            scoring.urgency_decay_per_day = decay;
        }
        if let Some(fallback) = take_parsed(&mut layered, "SCORING_FIT_FALLBACK") {
            scoring.fit_fallback = fallback;
        }
        if let Some(tiers) = take_string(&mut layered, "SCORING_FIT_TIERS") {
            scoring.fit_tiers = parse_fit_tiers(&tiers)?;
        }

        let mut providers: BTreeMap<String, ProviderCredentials> = BTreeMap::new();
        for (key, value) in &layered {
            if let Some(provider_suffix) = key.strip_prefix("RATE_LIMIT_OVERRIDE_") {
                // RATE_LIMIT_OVERRIDE_<PROVIDER>_<SETTING>
                let Some((provider, setting)) = provider_suffix.split_once('_') else {
                    continue;
                };
                let entry = rate_limit_policy
                    .provider_overrides
                    .entry(provider.to_ascii_lowercase())
                    .or_default();
                match setting.to_ascii_lowercase().as_str() {
                    "base_seconds" => entry.base_seconds = value.trim().parse().ok(),
                    "max_seconds" => entry.max_seconds = value.trim().parse().ok(),
                    "jitter_factor" => entry.jitter_factor = value.trim().parse().ok(),
                    _ => {}
                }
            } else if let Some(provider_suffix) = key.strip_prefix("PROVIDER_") {
                // PROVIDER_<ID>_<KEY>
                let Some((provider, setting)) = provider_suffix.split_once('_') else {
                    continue;
                };
                if provider.is_empty() || setting.is_empty() {
                    continue;
                }
                providers
                    .entry(provider.to_ascii_lowercase())
                    .or_default()
                    .insert(setting, value.clone());
            }
        }

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            scheduler,
            rate_limit_policy,
            adapter,
            discovery,
            scoring,
            providers,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take_string(layered, key).and_then(|v| v.parse().ok())
}

/// Parse `"500:90,50:70"` into fit tiers.
fn parse_fit_tiers(raw: &str) -> Result<Vec<FitTier>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::InvalidFitTier {
                entry: entry.to_string(),
            };
            let (min, score) = entry.split_once(':').ok_or_else(invalid)?;
            Ok(FitTier {
                min_employees: min.trim().parse().map_err(|_| invalid())?,
                score: score.trim().parse().map_err(|_| invalid())?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rate_limit_policy_validation() {
        let mut config = RateLimitPolicyConfig::default();
        assert!(config.validate().is_ok());

        config.base_seconds = 1000;
        config.max_seconds = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimitBounds { .. })
        ));

        let mut config = RateLimitPolicyConfig::default();
        config.jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_override_validation() {
        let mut config = RateLimitPolicyConfig::default();
        config.provider_overrides.insert(
            "ads".to_string(),
            RateLimitProviderOverride {
                base_seconds: Some(2000),
                max_seconds: None,
                jitter_factor: None,
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimitProviderBounds { .. })
        ));
    }

    #[test]
    fn scheduler_default_interval_must_lie_within_bounds() {
        let config = SchedulerConfig {
            default_interval_minutes: 2,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSchedulerDefaultInterval { .. })
        ));
    }

    #[test]
    fn fit_tiers_parse_and_reject_garbage() {
        let tiers = parse_fit_tiers("1000:95, 200:80,10:60").unwrap();
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0].min_employees, 1000);
        assert_eq!(tiers[2].score, 60);

        assert!(matches!(
            parse_fit_tiers("big:90"),
            Err(ConfigError::InvalidFitTier { .. })
        ));
    }

    #[test]
    fn redacted_json_hides_provider_secrets() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "crm".into(),
            ProviderCredentials::new()
                .with("api_key", "super-secret")
                .with("api_base", "https://crm.example.com"),
        );
        config.database_url = "postgres://user:pw@db:5432/leads".into();

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("user:pw"));
        assert!(json.contains("https://crm.example.com"));
    }
}
