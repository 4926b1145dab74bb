use std::{
    mem,
    time::{Duration, Instant},
};

use crate::error::{self, TelemetryError};

/// Point in time by which a shutdown should have completed.
///
/// The deadline is only handed to the registered teardowns, which decide
/// themselves how to honour it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline, teardowns may block as long as they need.
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Time left until the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|instant| instant.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }
}

type ShutdownFn = Box<dyn FnOnce(&Deadline) -> Result<(), TelemetryError> + Send>;

/// Cleanup callbacks of the installed telemetry components.
///
/// Callbacks run in registration order. The registry is drained by
/// [`ShutdownRegistry::shutdown`], so calling it again does nothing. Nothing
/// stops a component from being shut down twice through other means.
#[derive(Default)]
pub struct ShutdownRegistry {
    funcs: Vec<(&'static str, ShutdownFn)>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &'static str, teardown: F)
    where
        F: FnOnce(&Deadline) -> Result<(), TelemetryError> + Send + 'static,
    {
        self.funcs.push((name, Box::new(teardown)));
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Names of the registered callbacks, in the order they will run.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.funcs.iter().map(|(name, _)| *name)
    }

    /// Runs every registered callback, even after failures, and returns the
    /// joined errors.
    pub fn shutdown(&mut self, deadline: &Deadline) -> Result<(), TelemetryError> {
        let funcs = mem::take(&mut self.funcs);
        let mut errors = Vec::new();

        for (name, teardown) in funcs {
            match teardown(deadline) {
                Ok(()) => tracing::debug!(component = name, "shut down"),
                Err(err) => {
                    tracing::warn!(component = name, error = %err, "shutdown failed");
                    errors.push(err);
                }
            }
        }

        match error::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Runs setup steps in order, rolling back on the first failure.
///
/// When a step fails, every teardown registered so far runs (in registration
/// order) and the step error is joined with the teardown errors.
pub struct Setup {
    registry: ShutdownRegistry,
    deadline: Deadline,
}

impl Setup {
    /// `deadline` bounds the rollback of a failed setup.
    pub fn new(deadline: Deadline) -> Self {
        Setup {
            registry: ShutdownRegistry::new(),
            deadline,
        }
    }

    pub fn run<T, F>(&mut self, step: &'static str, build: F) -> Result<T, TelemetryError>
    where
        F: FnOnce() -> Result<T, TelemetryError>,
    {
        build().map_err(|err| {
            tracing::error!(step, error = %err, "telemetry setup failed, rolling back");
            self.rollback(err)
        })
    }

    pub fn register<F>(&mut self, name: &'static str, teardown: F)
    where
        F: FnOnce(&Deadline) -> Result<(), TelemetryError> + Send + 'static,
    {
        self.registry.register(name, teardown);
    }

    pub fn finish(self) -> ShutdownRegistry {
        self.registry
    }

    fn rollback(&mut self, err: TelemetryError) -> TelemetryError {
        match self.registry.shutdown(&self.deadline) {
            Ok(()) => err,
            Err(rollback) => err.and(rollback),
        }
    }
}
