//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeSet, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

mod cli;

pub use cli::{CliArgs, Command, ReplayArgs, RuntimeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "catalogcache";
const ENV_PREFIX: &str = "CATALOGCACHE";
const DEFAULT_SCOPE: &str = "/catalog";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub retry_interval: Duration,
    pub write_debounce: Duration,
    pub miss_streak_limit: NonZeroU32,
    pub timestamp_granularity: Duration,
    pub ignored_fields: BTreeSet<String>,
    pub stats_log_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub scope: String,
    pub indexes: Vec<IndexSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub name: String,
    pub kind: IndexKindSetting,
    /// Record attribute to read; defaults to the index name.
    pub attribute: Option<String>,
    pub weight: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKindSetting {
    Field,
    Keyword,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Replay(args) => raw.apply_runtime_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    catalog: RawCatalogSettings,
}

impl RawSettings {
    fn apply_runtime_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_ttl_seconds {
            self.cache.ttl_secs = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_retry_interval_seconds {
            self.cache.retry_interval_secs = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_write_debounce_seconds {
            self.cache.write_debounce_secs = Some(seconds);
        }
        if let Some(limit) = overrides.cache_miss_streak_limit {
            self.cache.miss_streak_limit = Some(u64::from(limit));
        }
        if let Some(scope) = overrides.catalog_scope.as_ref() {
            self.catalog.scope = Some(scope.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            catalog,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let catalog = build_catalog_settings(catalog)?;

        Ok(Self {
            logging,
            cache,
            catalog,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    let ttl = positive_secs(cache.ttl_secs.unwrap_or(defaults.ttl_secs), "cache.ttl_secs")?;
    let retry_interval = positive_secs(
        cache
            .retry_interval_secs
            .unwrap_or(defaults.retry_interval_secs),
        "cache.retry_interval_secs",
    )?;
    let timestamp_granularity = positive_secs(
        cache
            .timestamp_granularity_secs
            .unwrap_or(defaults.timestamp_granularity_secs),
        "cache.timestamp_granularity_secs",
    )?;
    let miss_streak_limit = non_zero_u32(
        cache
            .miss_streak_limit
            .unwrap_or(u64::from(defaults.miss_streak_limit)),
        "cache.miss_streak_limit",
    )?;

    // Zero disables debouncing and hit-rate logging respectively.
    let write_debounce = Duration::from_secs(
        cache
            .write_debounce_secs
            .unwrap_or(defaults.write_debounce_secs),
    );
    let stats_log_interval = Duration::from_secs(
        cache
            .stats_log_interval_secs
            .unwrap_or(defaults.stats_log_interval_secs),
    );

    let ignored_fields = match cache.ignored_fields {
        Some(fields) => fields
            .into_iter()
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect(),
        None => defaults.ignored_fields,
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        ttl,
        retry_interval,
        write_debounce,
        miss_streak_limit,
        timestamp_granularity,
        ignored_fields,
        stats_log_interval,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let scope = catalog
        .scope
        .map(|scope| scope.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
    if scope.is_empty() {
        return Err(LoadError::invalid("catalog.scope", "must not be empty"));
    }

    let mut seen = BTreeSet::new();
    let mut indexes = Vec::with_capacity(catalog.indexes.len());
    for index in catalog.indexes {
        let name = index.name.trim().to_string();
        if name.is_empty() {
            return Err(LoadError::invalid(
                "catalog.indexes",
                "index name must not be empty",
            ));
        }
        if !seen.insert(name.clone()) {
            return Err(LoadError::invalid(
                "catalog.indexes",
                format!("index `{name}` is defined twice"),
            ));
        }
        let weight = non_zero_u32(u64::from(index.weight.unwrap_or(1)), "catalog.indexes.weight")?;
        indexes.push(IndexSettings {
            name,
            kind: index.kind.unwrap_or(IndexKindSetting::Field),
            attribute: index.attribute,
            weight,
        });
    }

    Ok(CatalogSettings { scope, indexes })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
    retry_interval_secs: Option<u64>,
    write_debounce_secs: Option<u64>,
    miss_streak_limit: Option<u64>,
    timestamp_granularity_secs: Option<u64>,
    ignored_fields: Option<Vec<String>>,
    stats_log_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    scope: Option<String>,
    indexes: Vec<RawIndexSettings>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawIndexSettings {
    name: String,
    #[serde(default)]
    kind: Option<IndexKindSetting>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    weight: Option<u32>,
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
