use std::{error::Error, fmt, io};

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors produced while setting up or tearing down telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid value {value:?} for {key}")]
    Config { key: &'static str, value: String },

    #[error("unknown propagator {0:?}")]
    UnknownPropagator(String),

    #[error("{0} requires a running tokio runtime")]
    NoRuntime(&'static str),

    #[error("a global metrics recorder is already installed")]
    RecorderInstalled,

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("{component}: {source}")]
    Component {
        component: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{0}: shutdown deadline exceeded")]
    DeadlineExceeded(&'static str),

    #[error(transparent)]
    Joined(Errors),
}

impl TelemetryError {
    pub fn component(component: &'static str, source: impl Into<BoxError>) -> Self {
        TelemetryError::Component {
            component,
            source: source.into(),
        }
    }

    /// Joins `other` after this error.
    pub fn and(self, other: TelemetryError) -> TelemetryError {
        TelemetryError::Joined(Errors(flatten([self, other])))
    }

    /// Iterates over the leaf errors, flattening joined errors.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryError> {
        match self {
            TelemetryError::Joined(errors) => errors.0.iter().collect::<Vec<_>>(),
            other => vec![other],
        }
        .into_iter()
    }
}

/// Several errors reported as one, one per line.
#[derive(Debug)]
pub struct Errors(Vec<TelemetryError>);

impl Errors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Error for Errors {}

/// Combines errors into one.
///
/// Returns `None` when there is nothing to report and the error itself when
/// there is exactly one. Nested joins are flattened.
pub fn join(errors: impl IntoIterator<Item = TelemetryError>) -> Option<TelemetryError> {
    let mut flat = flatten(errors);
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(TelemetryError::Joined(Errors(flat))),
    }
}

fn flatten(errors: impl IntoIterator<Item = TelemetryError>) -> Vec<TelemetryError> {
    let mut flat = Vec::new();
    for err in errors {
        match err {
            TelemetryError::Joined(Errors(inner)) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    flat
}

/// Errors returned by a [`LogSink`](crate::sink::LogSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write log record: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),
}
