use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};

use crate::error::TelemetryError;

/// Propagators used when none are configured, following `OTEL_PROPAGATORS`.
pub const DEFAULT_PROPAGATORS: &str = "tracecontext,baggage";

/// Builds a composite propagator from a comma separated list of names.
///
/// Supported names are `tracecontext`, `baggage`, `jaeger` and `none`.
/// `none` disables propagation and may not be combined with other names.
pub fn from_names(names: Option<&str>) -> Result<TextMapCompositePropagator, TelemetryError> {
    let names = names
        .map(str::trim)
        .filter(|names| !names.is_empty())
        .unwrap_or(DEFAULT_PROPAGATORS);

    let mut propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = Vec::new();
    let mut disabled = false;
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match name.to_ascii_lowercase().as_str() {
            "tracecontext" => propagators.push(Box::new(TraceContextPropagator::new())),
            "baggage" => propagators.push(Box::new(BaggagePropagator::new())),
            "jaeger" => propagators.push(Box::new(opentelemetry_jaeger_propagator::Propagator::new())),
            "none" => disabled = true,
            _ => return Err(TelemetryError::UnknownPropagator(name.to_string())),
        }
    }

    if disabled && !propagators.is_empty() {
        return Err(TelemetryError::UnknownPropagator(names.to_string()));
    }

    Ok(TextMapCompositePropagator::new(propagators))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use opentelemetry::{
        propagation::TextMapPropagator,
        trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
        Context,
    };

    use super::*;

    fn sampled_context() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    fn inject(propagator: &TextMapCompositePropagator) -> HashMap<String, String> {
        let mut carrier = HashMap::new();
        propagator.inject_context(&sampled_context(), &mut carrier);
        carrier
    }

    #[test]
    fn defaults_to_trace_context_and_baggage() {
        let propagator = from_names(None).unwrap();
        let fields: Vec<_> = propagator.fields().collect();
        assert!(fields.contains(&"traceparent"));
        assert!(fields.contains(&"baggage"));

        let carrier = inject(&propagator);
        assert_eq!(
            carrier["traceparent"],
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );
    }

    #[test]
    fn jaeger_can_be_selected() {
        let propagator = from_names(Some(" Jaeger ")).unwrap();
        let carrier = inject(&propagator);
        assert!(carrier.contains_key("uber-trace-id"));
        assert!(!carrier.contains_key("traceparent"));
    }

    #[test]
    fn none_disables_propagation() {
        let propagator = from_names(Some("none")).unwrap();
        assert!(inject(&propagator).is_empty());
    }

    #[test]
    fn rejects_unknown_names() {
        let err = from_names(Some("tracecontext,xray")).unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownPropagator(ref name) if name == "xray"));

        assert!(from_names(Some("none,baggage")).is_err());
    }
}
