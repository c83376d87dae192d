use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "catalogcache_hit_total",
            Unit::Count,
            "Total number of searches answered from the result cache."
        );
        describe_counter!(
            "catalogcache_miss_total",
            Unit::Count,
            "Total number of searches evaluated against the indexes."
        );
        describe_counter!(
            "catalogcache_breaker_open_total",
            Unit::Count,
            "Total number of backend failures that opened the availability breaker."
        );
        describe_counter!(
            "catalogcache_write_debounced_total",
            Unit::Count,
            "Total number of cache writes skipped as identical to a recent write."
        );
        describe_counter!(
            "catalogcache_invalidated_keys_total",
            Unit::Count,
            "Total number of backend keys deleted by record or field invalidation."
        );
        describe_histogram!(
            "catalogcache_evaluate_ms",
            Unit::Milliseconds,
            "Index evaluation latency on cache miss in milliseconds."
        );
    });
}
