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
            "plantpad_cache_hit_total",
            Unit::Count,
            "Total number of render cache hits."
        );
        describe_counter!(
            "plantpad_cache_miss_total",
            Unit::Count,
            "Total number of render cache misses."
        );
        describe_counter!(
            "plantpad_cache_evict_total",
            Unit::Count,
            "Total number of render cache evictions due to capacity."
        );
        describe_counter!(
            "plantpad_render_success_total",
            Unit::Count,
            "Total number of successful diagram renders."
        );
        describe_counter!(
            "plantpad_render_error_diagram_total",
            Unit::Count,
            "Total number of renders that returned an error graphic."
        );
        describe_counter!(
            "plantpad_render_fallback_total",
            Unit::Count,
            "Total number of renders served from the offline cache."
        );
        describe_counter!(
            "plantpad_render_failure_total",
            Unit::Count,
            "Total number of renders that produced nothing displayable."
        );
        describe_counter!(
            "plantpad_probe_total",
            Unit::Count,
            "Total number of server reachability probes, labeled by result."
        );
        describe_histogram!(
            "plantpad_render_ms",
            Unit::Milliseconds,
            "Render fetch latency in milliseconds."
        );
    });
}
