use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::Recorder;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};

use crate::error::TelemetryError;

/// Lower bound of the sampling interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub const UPTIME: &str = "runtime_uptime_seconds";
pub const WORKERS: &str = "runtime_tokio_workers";
pub const ALIVE_TASKS: &str = "runtime_tokio_alive_tasks";

/// Periodically records statistics of the tokio runtime it was started on.
pub struct RuntimeStats {
    task: JoinHandle<()>,
}

impl RuntimeStats {
    /// Starts sampling on the current tokio runtime.
    ///
    /// `interval` is raised to [`MIN_INTERVAL`] when shorter. Gauges are
    /// recorded through `recorder`, and `metrics` gets its upkeep on every tick.
    pub fn start<R>(
        recorder: Arc<R>,
        metrics: PrometheusHandle,
        interval: Duration,
    ) -> Result<Self, TelemetryError>
    where
        R: Recorder + Send + Sync + 'static,
    {
        let runtime =
            Handle::try_current().map_err(|_| TelemetryError::NoRuntime("runtime statistics"))?;
        let sampler = Sampler {
            runtime: runtime.clone(),
            started: Instant::now(),
        };
        let interval = interval.max(MIN_INTERVAL);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                metrics::with_local_recorder(recorder.as_ref(), || sampler.record());
                metrics.run_upkeep();
            }
        });

        tracing::debug!(?interval, "runtime statistics started");
        Ok(RuntimeStats { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

struct Sampler {
    runtime: Handle,
    started: Instant,
}

impl Sampler {
    fn record(&self) {
        let stats = self.runtime.metrics();
        metrics::gauge!(UPTIME).set(self.started.elapsed().as_secs_f64());
        metrics::gauge!(WORKERS).set(stats.num_workers() as f64);
        metrics::gauge!(ALIVE_TASKS).set(stats.num_alive_tasks() as f64);
    }
}
