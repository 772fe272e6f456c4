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

pub(crate) const METRIC_BACKGROUND_FAILED: &str = "canopy_background_failed_total";

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
            "canopy_maps_memo_hit_total",
            Unit::Count,
            "Map lookups served from the in-process memo."
        );
        describe_counter!(
            "canopy_maps_store_hit_total",
            Unit::Count,
            "Map lookups served from the durable snapshot."
        );
        describe_counter!(
            "canopy_maps_rebuild_total",
            Unit::Count,
            "Map rebuilds started."
        );
        describe_counter!(
            "canopy_maps_rebuild_joined_total",
            Unit::Count,
            "Callers that joined a rebuild already in flight."
        );
        describe_counter!(
            "canopy_maps_rebuild_failed_total",
            Unit::Count,
            "Map rebuilds that failed while fetching upstream collections."
        );
        describe_counter!(
            "canopy_maps_stale_served_total",
            Unit::Count,
            "Lookups answered from an expired memo because the rebuild failed."
        );
        describe_histogram!(
            "canopy_maps_rebuild_ms",
            Unit::Milliseconds,
            "Map rebuild latency in milliseconds."
        );
        describe_counter!(
            "canopy_edge_hit_total",
            Unit::Count,
            "Total number of edge response-store hits."
        );
        describe_counter!(
            "canopy_edge_miss_total",
            Unit::Count,
            "Total number of edge response-store misses."
        );
        describe_counter!(
            "canopy_edge_evict_total",
            Unit::Count,
            "Total number of edge response-store evictions due to capacity."
        );
        describe_counter!(
            METRIC_BACKGROUND_FAILED,
            Unit::Count,
            "Fire-and-forget tasks (edge stores, purges, triggered rebuilds) that failed."
        );
    });
}
