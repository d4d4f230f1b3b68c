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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "content_blocks_cache_hit_total",
            Unit::Count,
            "Total number of rendered-block cache hits."
        );
        describe_counter!(
            "content_blocks_cache_miss_total",
            Unit::Count,
            "Total number of rendered-block cache misses."
        );
        describe_counter!(
            "content_blocks_cache_set_total",
            Unit::Count,
            "Total number of rendered-block cache writes."
        );
        describe_counter!(
            "content_blocks_cache_delete_total",
            Unit::Count,
            "Total number of rendered-block cache deletions."
        );
        describe_counter!(
            "content_blocks_cache_evict_total",
            Unit::Count,
            "Total number of memory-store evictions due to capacity."
        );
        describe_counter!(
            "content_blocks_inflight_wait_total",
            Unit::Count,
            "Total number of cache misses that waited on an in-flight render."
        );
        describe_histogram!(
            "content_blocks_render_ms",
            Unit::Milliseconds,
            "Block render latency in milliseconds."
        );
    });
}
