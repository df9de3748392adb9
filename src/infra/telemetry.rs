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
            "vitrine_query_cache_hit_total",
            Unit::Count,
            "Total number of query cache hits, labelled by cache."
        );
        describe_counter!(
            "vitrine_query_cache_miss_total",
            Unit::Count,
            "Total number of query cache misses, labelled by cache."
        );
        describe_counter!(
            "vitrine_query_cache_dedup_total",
            Unit::Count,
            "Total number of lookups that joined an in-flight fetch."
        );
        describe_counter!(
            "vitrine_page_cache_hit_total",
            Unit::Count,
            "Total number of page cache hits."
        );
        describe_counter!(
            "vitrine_page_cache_miss_total",
            Unit::Count,
            "Total number of page cache misses."
        );
        describe_counter!(
            "vitrine_prefetch_page_failed_total",
            Unit::Count,
            "Total number of pages that failed to load during prefetch."
        );
        describe_histogram!(
            "vitrine_prefetch_run_ms",
            Unit::Milliseconds,
            "Duration of one prefetch run in milliseconds."
        );
        describe_histogram!(
            "vitrine_batcher_flush_size",
            Unit::Count,
            "Number of queries sent per batcher flush."
        );
    });
}
