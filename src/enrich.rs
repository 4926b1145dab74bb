use opentelemetry::{trace::TraceContextExt, Context};
use tracing::Level;

use crate::{error::SinkError, record::LogRecord, sink::LogSink};

// Special payload fields recognised by Cloud Logging, see
// https://cloud.google.com/logging/docs/structured-logging#special-payload-fields
pub const TRACE_KEY: &str = "logging.googleapis.com/trace";
pub const SPAN_ID_KEY: &str = "logging.googleapis.com/spanId";
pub const TRACE_SAMPLED_KEY: &str = "logging.googleapis.com/trace_sampled";

/// A [`LogSink`] which adds attributes from the span context of the call
/// before forwarding the record to the wrapped sink.
pub struct SpanContextSink<S> {
    inner: S,
}

impl<S> SpanContextSink<S> {
    pub fn new(inner: S) -> Self {
        SpanContextSink { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: LogSink> LogSink for SpanContextSink<S> {
    fn enabled(&self, level: Level) -> bool {
        self.inner.enabled(level)
    }

    fn handle(&self, cx: &Context, mut record: LogRecord) -> Result<(), SinkError> {
        let span = cx.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            record.add_attribute(TRACE_KEY, span_context.trace_id().to_string());
            record.add_attribute(SPAN_ID_KEY, span_context.span_id().to_string());
            record.add_attribute(TRACE_SAMPLED_KEY, span_context.is_sampled());
        }

        self.inner.handle(cx, record)
    }
}
