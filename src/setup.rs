use std::{
    borrow::Cow,
    sync::{mpsc, Arc},
    thread,
};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use opentelemetry::{
    global,
    propagation::{
        text_map_propagator::FieldIter, Extractor, Injector, TextMapCompositePropagator,
        TextMapPropagator,
    },
    trace::TracerProvider,
    Context, KeyValue,
};
use opentelemetry_sdk::{
    trace::{BatchSpanProcessor, Sampler, SdkTracerProvider},
    Resource,
};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    config::TelemetryConfig,
    error::TelemetryError,
    lifecycle::{Deadline, Setup, ShutdownRegistry},
    propagation,
    runtime_stats::RuntimeStats,
};

/// Sets up propagation, metrics and tracing, in that order, and starts
/// sampling runtime statistics.
///
/// Metrics are pulled: they are served on `config.metrics_listen` when set
/// and can always be rendered through [`Telemetry::metrics`]. Spans are
/// written to stdout, but nothing is sampled unless
/// `config.trace_sample_ratio` says otherwise.
///
/// If a step fails, everything set up before it is shut down again and the
/// returned error carries the step error followed by any shutdown errors.
/// Must be called from within a tokio runtime.
pub fn setup(config: &TelemetryConfig, deadline: Deadline) -> Result<Telemetry, TelemetryError> {
    let mut setup = Setup::new(deadline);

    let propagator = setup.run("propagator", || {
        propagation::from_names(config.propagators.as_deref()).map(Arc::new)
    })?;
    if config.install_global {
        global::set_text_map_propagator(SharedPropagator(propagator.clone()));
    }

    let (recorder, listener) = setup.run("metrics", || build_metrics(config))?;
    let recorder = Arc::new(recorder);
    let scrape = recorder.handle();
    setup.register("metrics", {
        let scrape = scrape.clone();
        move |_| {
            if let Some(listener) = listener {
                listener.abort();
            }
            scrape.run_upkeep();
            Ok(())
        }
    });
    if config.install_global {
        setup.run("metrics recorder", || {
            metrics::set_global_recorder(recorder.clone())
                .map_err(|_| TelemetryError::RecorderInstalled)
        })?;
    }

    let tracer_provider = setup.run("traces", || Ok(build_tracer_provider(config)))?;
    setup.register("traces", {
        let provider = tracer_provider.clone();
        move |deadline| shutdown_tracer_provider(provider, deadline)
    });
    if config.install_global {
        global::set_tracer_provider(tracer_provider.clone());
    }

    let runtime_stats = setup.run("runtime statistics", || {
        RuntimeStats::start(
            recorder.clone(),
            scrape.clone(),
            config.runtime_stats_interval,
        )
    })?;
    setup.register("runtime statistics", move |_| {
        runtime_stats.stop();
        Ok(())
    });

    tracing::info!(
        service = %config.service_name,
        global = config.install_global,
        "telemetry initialised"
    );

    Ok(Telemetry {
        propagator,
        recorder,
        scrape,
        tracer_provider,
        registry: setup.finish(),
    })
}

/// Handle to the telemetry pipeline created by [`setup`].
///
/// Dropping the handle shuts the pipeline down unless [`Telemetry::shutdown`]
/// has been called before.
pub struct Telemetry {
    propagator: Arc<TextMapCompositePropagator>,
    recorder: Arc<PrometheusRecorder>,
    scrape: PrometheusHandle,
    tracer_provider: SdkTracerProvider,
    registry: ShutdownRegistry,
}

impl Telemetry {
    pub fn tracer(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> <SdkTracerProvider as TracerProvider>::Tracer {
        self.tracer_provider.tracer(name)
    }

    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Scrape handle of the metrics recorder, `render()` yields the
    /// Prometheus text format.
    pub fn metrics(&self) -> &PrometheusHandle {
        &self.scrape
    }

    /// Recorder to use with [`metrics::with_local_recorder`] when it was not
    /// installed globally.
    pub fn recorder(&self) -> &PrometheusRecorder {
        &self.recorder
    }

    pub fn propagator(&self) -> &TextMapCompositePropagator {
        &self.propagator
    }

    /// Shuts down every component in setup order and returns the joined
    /// errors. Later calls do nothing and return `Ok(())`.
    pub fn shutdown(&mut self, deadline: &Deadline) -> Result<(), TelemetryError> {
        self.registry.shutdown(deadline)
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if self.is_shut_down() {
            return;
        }
        if let Err(err) = self.shutdown(&Deadline::none()) {
            tracing::warn!(error = %err, "telemetry shutdown on drop failed");
        }
    }
}

fn build_metrics(
    config: &TelemetryConfig,
) -> Result<(PrometheusRecorder, Option<JoinHandle<()>>), TelemetryError> {
    let builder = PrometheusBuilder::new();
    let Some(addr) = config.metrics_listen else {
        return Ok((builder.build_recorder(), None));
    };

    let runtime =
        Handle::try_current().map_err(|_| TelemetryError::NoRuntime("metrics listener"))?;
    let (recorder, exporter) = builder
        .with_http_listener(addr)
        .build()
        .map_err(|err| TelemetryError::component("metrics exporter", err))?;
    let listener = runtime.spawn(async move {
        if let Err(err) = exporter.await {
            tracing::error!(error = ?err, "metrics listener stopped");
        }
    });

    tracing::info!(%addr, "serving metrics");
    Ok((recorder, Some(listener)))
}

fn build_tracer_provider(config: &TelemetryConfig) -> SdkTracerProvider {
    let exporter = opentelemetry_stdout::SpanExporter::default();
    let resource = Resource::builder_empty()
        .with_attributes([KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        )])
        .build();

    SdkTracerProvider::builder()
        .with_sampler(sampler(config.trace_sample_ratio))
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_resource(resource)
        .build()
}

fn sampler(ratio: f64) -> Sampler {
    if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Shuts the provider down, giving up once the deadline has passed.
///
/// The shutdown keeps running in the background after the deadline.
fn shutdown_tracer_provider(
    provider: SdkTracerProvider,
    deadline: &Deadline,
) -> Result<(), TelemetryError> {
    let Some(remaining) = deadline.remaining() else {
        return provider
            .shutdown()
            .map_err(|err| TelemetryError::component("tracer provider", err));
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(provider.shutdown());
    });

    match rx.recv_timeout(remaining) {
        Ok(result) => result.map_err(|err| TelemetryError::component("tracer provider", err)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            Err(TelemetryError::DeadlineExceeded("tracer provider"))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(TelemetryError::component(
            "tracer provider",
            "shutdown thread panicked",
        )),
    }
}

/// Lets the global propagator share the instance held by [`Telemetry`].
#[derive(Debug)]
struct SharedPropagator(Arc<TextMapCompositePropagator>);

impl TextMapPropagator for SharedPropagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.0.inject_context(cx, injector)
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        self.0.extract_with_context(cx, extractor)
    }

    fn fields(&self) -> FieldIter<'_> {
        self.0.fields()
    }
}
