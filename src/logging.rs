use std::io::{self, Write};

use tracing::Level;
use tracing_core::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::{
    bridge::LogSinkLayer,
    config::TelemetryConfig,
    enrich::SpanContextSink,
    error::TelemetryError,
    setup::Telemetry,
    sink::{JsonSink, LogSink},
};

/// Installs the global `tracing` subscriber writing Cloud Logging structured
/// logs to stdout.
///
/// Every record logged inside a span (or with an attached OpenTelemetry
/// context) carries the trace and span id of that context. When `telemetry`
/// is given, spans are also exported through its tracer provider.
///
/// The filter is read from `RUST_LOG`, defaulting to `config.log_level`. It
/// is the only level filter, so `RUST_LOG=debug` writes debug records even
/// when `LOG_LEVEL` is higher.
pub fn init(config: &TelemetryConfig, telemetry: Option<&Telemetry>) -> Result<(), TelemetryError> {
    let sink = json_sink(io::stdout());
    let tracer = telemetry.map(|telemetry| telemetry.tracer(config.service_name.clone()));
    let otel = tracer
        .clone()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    Registry::default()
        .with(env_filter(config))
        .with(otel)
        .with(layer(sink).with_optional_tracer(tracer))
        .try_init()?;

    tracing::debug!(level = %config.log_level, "logging initialised");
    Ok(())
}

/// Layer handing `tracing` events to `sink`, for composing a custom subscriber.
pub fn layer<K: LogSink + 'static>(sink: K) -> LogSinkLayer<K> {
    LogSinkLayer::new(sink)
}

/// Level filtering is left to the subscriber's filter.
fn json_sink<W: Write>(writer: W) -> SpanContextSink<JsonSink<W>> {
    SpanContextSink::new(JsonSink::new(writer).with_min_level(Level::TRACE))
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy()
}
