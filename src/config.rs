use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use tracing::Level;

use crate::{error::TelemetryError, runtime_stats::MIN_INTERVAL};

/// Port of the Prometheus scrape endpoint, as registered for OpenTelemetry.
pub const DEFAULT_METRICS_PORT: u16 = 9464;

/// Settings for [`setup`](crate::setup::setup) and
/// [`logging::init`](crate::logging::init).
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Reported as the `service.name` resource attribute of every span.
    pub service_name: String,
    /// Records below this level are not written.
    pub log_level: Level,
    /// Comma separated propagator names, `None` for `tracecontext,baggage`.
    pub propagators: Option<String>,
    /// Ratio of traces to sample. `0.0` disables tracing.
    pub trace_sample_ratio: f64,
    /// Address of the Prometheus scrape endpoint. Without one, metrics are
    /// only reachable through [`Telemetry::metrics`](crate::setup::Telemetry::metrics).
    pub metrics_listen: Option<SocketAddr>,
    /// How often runtime statistics are sampled. Never below one second.
    pub runtime_stats_interval: Duration,
    /// Install propagator, metrics recorder and tracer provider as the
    /// process wide defaults.
    pub install_global: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            service_name: env!("CARGO_PKG_NAME").to_string(),
            log_level: Level::INFO,
            propagators: None,
            trace_sample_ratio: 0.0,
            metrics_listen: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_METRICS_PORT,
            )),
            runtime_stats_interval: MIN_INTERVAL,
            install_global: true,
        }
    }
}

impl TelemetryConfig {
    /// Reads the configuration from the environment, falling back to the
    /// defaults for unset variables.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `SERVICE_NAME` | `service_name` |
    /// | `LOG_LEVEL` | `log_level` |
    /// | `OTEL_PROPAGATORS` | `propagators` |
    /// | `OTEL_TRACES_SAMPLER_ARG` | `trace_sample_ratio` |
    /// | `OTEL_EXPORTER_PROMETHEUS_HOST` / `_PORT` | `metrics_listen` |
    pub fn from_env() -> Result<Self, TelemetryError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, TelemetryError> {
        let defaults = TelemetryConfig::default();

        let service_name = lookup("SERVICE_NAME").unwrap_or(defaults.service_name);
        let log_level = parse(&lookup, "LOG_LEVEL")?.unwrap_or(defaults.log_level);
        let propagators = lookup("OTEL_PROPAGATORS").or(defaults.propagators);

        let trace_sample_ratio: f64 =
            parse(&lookup, "OTEL_TRACES_SAMPLER_ARG")?.unwrap_or(defaults.trace_sample_ratio);
        if !(0.0..=1.0).contains(&trace_sample_ratio) {
            return Err(TelemetryError::Config {
                key: "OTEL_TRACES_SAMPLER_ARG",
                value: trace_sample_ratio.to_string(),
            });
        }

        let host: Option<IpAddr> = parse(&lookup, "OTEL_EXPORTER_PROMETHEUS_HOST")?;
        let port: Option<u16> = parse(&lookup, "OTEL_EXPORTER_PROMETHEUS_PORT")?;
        let metrics_listen = match (host, port, defaults.metrics_listen) {
            (None, None, default) => default,
            (host, port, _) => Some(SocketAddr::new(
                host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                port.unwrap_or(DEFAULT_METRICS_PORT),
            )),
        };

        Ok(TelemetryConfig {
            service_name,
            log_level,
            propagators,
            trace_sample_ratio,
            metrics_listen,
            ..defaults
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, TelemetryError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| TelemetryError::Config { key, value })
        })
        .transpose()
}
