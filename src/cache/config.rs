//! Cache configuration.
//!
//! Controls backend TTLs, breaker cool-down and write debouncing via
//! `catalogcache.toml` (`[cache]` table) or `CATALOGCACHE__CACHE__*` variables.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 7200;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;
const DEFAULT_WRITE_DEBOUNCE_SECS: u64 = 10;
const DEFAULT_MISS_STREAK_LIMIT: u32 = 10;
const DEFAULT_TIMESTAMP_GRANULARITY_SECS: u64 = 60;
const DEFAULT_STATS_LOG_INTERVAL_SECS: u64 = 10;
const DEFAULT_IGNORED_FIELDS: [&str; 3] = ["sort_on", "sort_order", "sort_limit"];

/// Cache configuration from `catalogcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether a cache backend is configured at all. When false the breaker
    /// reports the backend as permanently unavailable.
    pub enabled: bool,
    /// Lifetime of every entry written to the backend.
    pub ttl_secs: u64,
    /// Cool-down after a backend failure before the backend is tried again.
    pub retry_interval_secs: u64,
    /// Identical write batches within this window are skipped.
    pub write_debounce_secs: u64,
    /// Consecutive misses of one key tolerated before the backend is
    /// considered misbehaving.
    pub miss_streak_limit: u32,
    /// Timestamps in query arguments are truncated to this granularity.
    pub timestamp_granularity_secs: u64,
    /// Query arguments that take part in the cache key but never receive
    /// field back-references.
    pub ignored_fields: BTreeSet<String>,
    /// Hit rate is logged when the wall clock is a multiple of this value.
    pub stats_log_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            write_debounce_secs: DEFAULT_WRITE_DEBOUNCE_SECS,
            miss_streak_limit: DEFAULT_MISS_STREAK_LIMIT,
            timestamp_granularity_secs: DEFAULT_TIMESTAMP_GRANULARITY_SECS,
            ignored_fields: DEFAULT_IGNORED_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            stats_log_interval_secs: DEFAULT_STATS_LOG_INTERVAL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_secs: settings.ttl.as_secs(),
            retry_interval_secs: settings.retry_interval.as_secs(),
            write_debounce_secs: settings.write_debounce.as_secs(),
            miss_streak_limit: settings.miss_streak_limit.get(),
            timestamp_granularity_secs: settings.timestamp_granularity.as_secs(),
            ignored_fields: settings.ignored_fields.clone(),
            stats_log_interval_secs: settings.stats_log_interval.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Breaker cool-down in whole seconds, as compared against the clock.
    pub fn retry_interval(&self) -> i64 {
        to_clock_secs(self.retry_interval_secs)
    }

    pub fn write_debounce(&self) -> i64 {
        to_clock_secs(self.write_debounce_secs)
    }

    /// Timestamp truncation granularity, clamped to at least one second.
    pub fn timestamp_granularity(&self) -> i64 {
        to_clock_secs(self.timestamp_granularity_secs).max(1)
    }

    pub fn stats_log_interval(&self) -> i64 {
        to_clock_secs(self.stats_log_interval_secs)
    }

    /// Returns true if `field` should be tracked with a back-reference.
    pub fn tracks_field(&self, field: &str) -> bool {
        !self.ignored_fields.contains(field)
    }
}

fn to_clock_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
