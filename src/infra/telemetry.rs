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

/// Install a global tracing subscriber using the provided logging settings
/// and describe the cache metrics once per process.
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
            "sqlcache_hit_total",
            Unit::Count,
            "Total number of cache hits, labelled by hit kind."
        );
        describe_counter!(
            "sqlcache_miss_total",
            Unit::Count,
            "Total number of cache misses that ran the loader."
        );
        describe_counter!(
            "sqlcache_invalidate_total",
            Unit::Count,
            "Total number of invalidations, labelled by scope."
        );
        describe_counter!(
            "sqlcache_memory_evict_total",
            Unit::Count,
            "Total number of in-memory entries evicted due to capacity."
        );
        describe_histogram!(
            "sqlcache_load_ms",
            Unit::Milliseconds,
            "Loader latency on cache misses in milliseconds."
        );
    });
}
