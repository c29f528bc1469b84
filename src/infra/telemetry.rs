use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Fails if a subscriber is already installed.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
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
            "moodfeed_cache_hit_total",
            Unit::Count,
            "Total number of server cache hits."
        );
        describe_counter!(
            "moodfeed_cache_miss_total",
            Unit::Count,
            "Total number of server cache misses, including expired entries."
        );
        describe_counter!(
            "moodfeed_cache_evict_total",
            Unit::Count,
            "Total number of server cache evictions, by reason (expired or capacity)."
        );
        describe_counter!(
            "moodfeed_cache_invalidated_total",
            Unit::Count,
            "Total number of server cache entries removed by invalidation."
        );
        describe_counter!(
            "moodfeed_invalidation_failed_total",
            Unit::Count,
            "Total number of invalidation targets that failed to apply a pattern."
        );
        describe_gauge!(
            "moodfeed_cache_event_queue_len",
            Unit::Count,
            "Current number of pending mutation events in the queue."
        );
        describe_counter!(
            "moodfeed_cache_event_dropped_total",
            Unit::Count,
            "Total number of mutation events dropped due to queue overflow."
        );
        describe_histogram!(
            "moodfeed_cache_consume_ms",
            Unit::Milliseconds,
            "Mutation batch consumption latency in milliseconds."
        );
        describe_counter!(
            "moodfeed_dedupe_joined_total",
            Unit::Count,
            "Total number of callers that joined an in-flight request."
        );
        describe_counter!(
            "moodfeed_client_cache_hit_total",
            Unit::Count,
            "Total number of persistent client cache hits."
        );
        describe_counter!(
            "moodfeed_client_cache_miss_total",
            Unit::Count,
            "Total number of persistent client cache misses."
        );
    });
}
