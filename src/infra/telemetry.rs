use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        critical::{METRIC_RULES_INLINED, METRIC_STYLESHEETS_DEFERRED, METRIC_TRANSFORM_FALLBACK},
        pipeline::{METRIC_ROUTE_MS, METRIC_ROUTES_WRITTEN},
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so that stdout stays free for the build tool driving us.
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
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
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
            METRIC_ROUTES_WRITTEN,
            Unit::Count,
            "Total number of prerendered documents written."
        );
        describe_histogram!(
            METRIC_ROUTE_MS,
            Unit::Milliseconds,
            "Per-route latency from render call to written file, in milliseconds."
        );
        describe_counter!(
            METRIC_RULES_INLINED,
            Unit::Count,
            "Total number of style rules inlined as critical CSS."
        );
        describe_counter!(
            METRIC_STYLESHEETS_DEFERRED,
            Unit::Count,
            "Total number of stylesheet links rewritten to load without blocking render."
        );
        describe_counter!(
            METRIC_TRANSFORM_FALLBACK,
            Unit::Count,
            "Total number of documents written untransformed after a critical CSS failure."
        );
    });
}
