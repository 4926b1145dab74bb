use std::{
    io::{self, Write},
    sync::Arc,
};

use opentelemetry::Context;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::Level;

use crate::{
    error::SinkError,
    record::{CloudLogging, LogRecord},
};

/// Destination of log records.
///
/// A sink receives the record together with the context of the call that
/// produced it, so decorators can read the ambient trace context before
/// passing the record on.
pub trait LogSink: Send + Sync {
    /// Whether records at `level` would be kept by this sink.
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn handle(&self, cx: &Context, record: LogRecord) -> Result<(), SinkError>;
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn enabled(&self, level: Level) -> bool {
        (**self).enabled(level)
    }

    fn handle(&self, cx: &Context, record: LogRecord) -> Result<(), SinkError> {
        (**self).handle(cx, record)
    }
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn enabled(&self, level: Level) -> bool {
        (**self).enabled(level)
    }

    fn handle(&self, cx: &Context, record: LogRecord) -> Result<(), SinkError> {
        (**self).handle(cx, record)
    }
}

/// Writes each record as one JSON object per line.
pub struct JsonSink<W> {
    writer: Mutex<W>,
    min_level: Level,
}

impl JsonSink<io::Stdout> {
    pub fn stdout() -> Self {
        JsonSink::new(io::stdout())
    }
}

impl<W: Write> JsonSink<W> {
    /// Creates a sink keeping records at `INFO` and above.
    pub fn new(writer: W) -> Self {
        JsonSink {
            writer: Mutex::new(writer),
            min_level: Level::INFO,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> LogSink for JsonSink<W> {
    fn enabled(&self, level: Level) -> bool {
        // `Level` orders by verbosity: TRACE > DEBUG > INFO > WARN > ERROR.
        level <= self.min_level
    }

    fn handle(&self, _cx: &Context, record: LogRecord) -> Result<(), SinkError> {
        if !self.enabled(record.level) {
            return Ok(());
        }

        let mut line = serde_json::to_vec(&CloudLogging(&record))?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Front-end for emitting records into a sink with an explicit context.
pub struct Logger<K> {
    sink: K,
}

impl<K: LogSink> Logger<K> {
    pub fn new(sink: K) -> Self {
        Logger { sink }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_inner(self) -> K {
        self.sink
    }

    pub fn log<I, A>(
        &self,
        cx: &Context,
        level: Level,
        message: impl Into<String>,
        attributes: I,
    ) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = (A, Value)>,
        A: Into<String>,
    {
        if !self.sink.enabled(level) {
            return Ok(());
        }

        let mut record = LogRecord::new(level, message);
        for (key, value) in attributes {
            record.add_attribute(key, value);
        }
        self.sink.handle(cx, record)
    }

    pub fn info(&self, cx: &Context, message: impl Into<String>) -> Result<(), SinkError> {
        self.log(cx, Level::INFO, message, no_attributes())
    }

    pub fn warn(&self, cx: &Context, message: impl Into<String>) -> Result<(), SinkError> {
        self.log(cx, Level::WARN, message, no_attributes())
    }

    pub fn error(&self, cx: &Context, message: impl Into<String>) -> Result<(), SinkError> {
        self.log(cx, Level::ERROR, message, no_attributes())
    }
}

fn no_attributes() -> [(&'static str, Value); 0] {
    []
}
