//! # Telemetry
//! This crate bootstraps logging, tracing and metrics of a server app in the
//! shape Cloud Logging and a Prometheus scraper expect.
//!
//! ## Setup
//! The telemetry pipeline is created with [`setup::setup`], which returns a
//! [`setup::Telemetry`] handle. The handle gives access to the tracer and
//! metrics recorder and shuts everything down again through
//! [`setup::Telemetry::shutdown`]. This should be one of the first calls of any
//! server binary, right before [`logging::init`].
//!
//! ```ignore
//! let config = TelemetryConfig::from_env()?;
//! let mut telemetry = setup(&config, Deadline::none())?;
//! logging::init(&config, Some(&telemetry))?;
//!
//! // serve requests
//!
//! telemetry.shutdown(&Deadline::after(Duration::from_secs(5)))?;
//! ```
//!
//! ## Structured Logs
//! Log records are written as one JSON object per line, using the
//! `severity`, `timestamp` and `message` keys of the Cloud Logging structured
//! log format. [`enrich::SpanContextSink`] adds the
//! `logging.googleapis.com/trace`, `logging.googleapis.com/spanId` and
//! `logging.googleapis.com/trace_sampled` fields whenever a record is logged
//! within a valid span context, so entries are correlated with their trace.
//!
//! Sinks implement [`sink::LogSink`] and can be used directly through a
//! [`sink::Logger`], or fed from `tracing` events via [`logging::layer`].

pub mod bridge;
pub mod config;
pub mod enrich;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod propagation;
pub mod record;
pub mod runtime_stats;
pub mod setup;
pub mod sink;

pub use config::TelemetryConfig;
pub use error::{SinkError, TelemetryError};
pub use lifecycle::Deadline;
pub use setup::{setup, Telemetry};
