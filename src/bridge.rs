use std::fmt;

use opentelemetry::{
    trace::{noop::NoopTracer, SamplingDecision, SpanContext, TraceContextExt, TraceFlags},
    Context,
};
use serde_json::Value;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_opentelemetry::{OtelData, PreSampledTracer};
use tracing_subscriber::{layer, registry::LookupSpan, Layer};

use crate::{record::LogRecord, sink::LogSink};

/// Layer forwarding `tracing` events to a [`LogSink`].
///
/// The sink receives the OpenTelemetry context of the span the event belongs
/// to, so a [`SpanContextSink`](crate::enrich::SpanContextSink) can correlate
/// the record with its trace. Events outside of any span fall back to the
/// currently attached [`Context`].
///
/// Spans are only sampled once they are exported. Give the layer the tracer
/// of the `tracing_opentelemetry` layer with [`LogSinkLayer::with_tracer`] so
/// the sampling decision is taken up front and logged records carry it.
/// Without a tracer, the sampled flag of an unexported span is taken from its
/// parent.
pub struct LogSinkLayer<K, T = NoopTracer> {
    sink: K,
    tracer: Option<T>,
}

impl<K> LogSinkLayer<K> {
    pub fn new(sink: K) -> Self {
        LogSinkLayer { sink, tracer: None }
    }
}

impl<K, T> LogSinkLayer<K, T> {
    /// Samples spans through `tracer` when their context is first needed.
    pub fn with_tracer<U>(self, tracer: U) -> LogSinkLayer<K, U>
    where
        U: PreSampledTracer,
    {
        LogSinkLayer {
            sink: self.sink,
            tracer: Some(tracer),
        }
    }

    pub(crate) fn with_optional_tracer<U>(self, tracer: Option<U>) -> LogSinkLayer<K, U> {
        LogSinkLayer {
            sink: self.sink,
            tracer,
        }
    }
}

impl<S, K, T> Layer<S> for LogSinkLayer<K, T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    K: LogSink + 'static,
    T: PreSampledTracer + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if !self.sink.enabled(level) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(level, visitor.message.unwrap_or_default());
        for (key, value) in visitor.attributes {
            record.add_attribute(key, value);
        }

        let cx = ctx
            .event_span(event)
            .and_then(|span| {
                let mut extensions = span.extensions_mut();
                let data = extensions.get_mut::<OtelData>()?;
                match &self.tracer {
                    Some(tracer) => Some(tracer.sampled_context(data)),
                    None => span_context(data),
                }
            })
            .unwrap_or_else(Context::current);

        if let Err(err) = self.sink.handle(&cx, record) {
            // Nothing to return the error to from inside a layer.
            eprintln!("failed to emit log record: {err}");
        }
    }
}

/// Rebuilds the context of a span which has not been exported yet.
fn span_context(data: &OtelData) -> Option<Context> {
    let parent = data.parent_cx.span().span_context().clone();
    let span_id = data.builder.span_id?;
    let trace_id = if parent.is_valid() {
        parent.trace_id()
    } else {
        data.builder.trace_id?
    };
    let sampled = match &data.builder.sampling_result {
        Some(result) => result.decision == SamplingDecision::RecordAndSample,
        None => parent.is_sampled(),
    };
    let flags = if sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };

    let span_context = SpanContext::new(
        trace_id,
        span_id,
        flags,
        false,
        parent.trace_state().clone(),
    );
    Some(data.parent_cx.with_remote_span_context(span_context))
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    attributes: Vec<(&'static str, Value)>,
}

impl RecordVisitor {
    fn push(&mut self, field: &Field, value: Value) {
        self.attributes.push((field.name(), value));
    }
}

impl Visit for RecordVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.push(field, Value::from(value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push(field, Value::from(format!("{value:?}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opentelemetry::trace::{SpanId, TraceId, TraceState, TracerProvider as _};
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    use tracing_subscriber::{layer::SubscriberExt, Registry};

    use super::*;
    use crate::{
        enrich::{SpanContextSink, SPAN_ID_KEY, TRACE_KEY, TRACE_SAMPLED_KEY},
        sink::tests::MemorySink,
    };

    fn collect(f: impl FnOnce()) -> Vec<LogRecord> {
        collect_sampled(Sampler::ParentBased(Box::new(Sampler::AlwaysOff)), f)
    }

    fn collect_sampled(sampler: Sampler, f: impl FnOnce()) -> Vec<LogRecord> {
        let sink = Arc::new(MemorySink::default());
        let provider = SdkTracerProvider::builder().with_sampler(sampler).build();
        let tracer = provider.tracer("bridge-test");
        let subscriber = Registry::default()
            .with(tracing_opentelemetry::layer().with_tracer(tracer.clone()))
            .with(LogSinkLayer::new(SpanContextSink::new(sink.clone())).with_tracer(tracer));

        tracing::subscriber::with_default(subscriber, f);

        let records = std::mem::take(&mut *sink.records.lock());
        records
    }

    fn sampled_root_span(sampler: Sampler) -> (Vec<LogRecord>, Option<bool>) {
        let mut span_sampled = None;
        let records = collect_sampled(sampler, || {
            let span = tracing::info_span!("root");
            span.in_scope(|| tracing::info!("hello"));
            span_sampled = Some(span.context().span().span_context().is_sampled());
        });
        (records, span_sampled)
    }

    #[test]
    fn event_fields_become_attributes() {
        let records = collect(|| {
            tracing::warn!(user = "ada", attempt = 3, retry = true, "quota exceeded");
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, tracing::Level::WARN);
        assert_eq!(record.message, "quota exceeded");
        assert_eq!(record.attribute("user"), Some(&Value::from("ada")));
        assert_eq!(record.attribute("attempt"), Some(&Value::from(3)));
        assert_eq!(record.attribute("retry"), Some(&Value::from(true)));
        assert!(record.attribute(TRACE_KEY).is_none());
    }

    #[test]
    fn events_inside_spans_carry_the_trace() {
        let parent = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        let records = collect(|| {
            let _guard = Context::new().with_remote_span_context(parent).attach();
            tracing::info_span!("handle_request").in_scope(|| tracing::info!("hello"));
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.attribute(TRACE_KEY),
            Some(&Value::from("4bf92f3577b34da6a3ce929d0e0e4736"))
        );
        let span_id = record.attribute(SPAN_ID_KEY).and_then(Value::as_str).unwrap();
        assert_eq!(span_id.len(), 16);
        assert_ne!(span_id, "00f067aa0ba902b7");
        assert_eq!(record.attribute(TRACE_SAMPLED_KEY), Some(&Value::Bool(true)));
    }

    #[test]
    fn events_outside_spans_use_the_attached_context() {
        let cx = Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::default(),
            true,
            TraceState::default(),
        ));

        let records = collect(|| {
            let _guard = cx.attach();
            tracing::error!("failed");
        });

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].attribute(SPAN_ID_KEY),
            Some(&Value::from("00f067aa0ba902b7"))
        );
        assert_eq!(
            records[0].attribute(TRACE_SAMPLED_KEY),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn root_spans_log_the_sampler_decision() {
        let (records, span_sampled) = sampled_root_span(Sampler::AlwaysOn);

        assert_eq!(records.len(), 1);
        assert_eq!(span_sampled, Some(true));
        assert_eq!(
            records[0].attribute(TRACE_SAMPLED_KEY),
            Some(&Value::Bool(true))
        );
        assert!(records[0].attribute(TRACE_KEY).is_some());
    }

    #[test]
    fn root_spans_dropped_by_the_sampler_log_unsampled() {
        let (records, span_sampled) = sampled_root_span(Sampler::AlwaysOff);

        assert_eq!(records.len(), 1);
        assert_eq!(span_sampled, Some(false));
        assert_eq!(
            records[0].attribute(TRACE_SAMPLED_KEY),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn logged_ids_match_the_exported_span() {
        let mut exported = None;
        let records = collect_sampled(Sampler::AlwaysOn, || {
            let span = tracing::info_span!("root");
            span.in_scope(|| tracing::info!("hello"));
            let cx = span.context();
            let span_context = cx.span().span_context().clone();
            exported = Some(span_context);
        });

        let exported = exported.unwrap();
        assert_eq!(
            records[0].attribute(TRACE_KEY),
            Some(&Value::from(exported.trace_id().to_string()))
        );
        assert_eq!(
            records[0].attribute(SPAN_ID_KEY),
            Some(&Value::from(exported.span_id().to_string()))
        );
    }
}
