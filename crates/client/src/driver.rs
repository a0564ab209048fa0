use std::sync::Arc;

use flowplan_common::{MetricsRegistry, Result};
use flowplan_execution::{JobStats, RunHandle, SharedBackend};
use tracing::{info, warn};

use crate::builder::BuildResult;

/// Runs built plans on the backend that compiled them.
///
/// Build failures and run failures come back through the same channel: a
/// failed build yields a handle that resolves to `FlowError::BuildFailed`
/// without the backend being contacted.
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    backend: SharedBackend,
    metrics: Option<MetricsRegistry>,
}

impl ExecutionDriver {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Submit `build` and return immediately.
    ///
    /// Running the same result again re-submits the same compiled plan; it
    /// never recompiles.
    pub fn run_async(&self, build: &BuildResult) -> RunHandle {
        let plan = match build {
            BuildResult::Ready(plan) => Arc::clone(plan),
            BuildResult::Failed(failure) => {
                warn!(
                    backend = self.backend.name(),
                    phase = %failure.phase,
                    "run requested for a failed build"
                );
                self.record("build_failed");
                let handle = RunHandle::failed(failure.to_error());
                return match &failure.plan_id {
                    Some(id) => handle.with_plan_id(id.clone()),
                    None => handle,
                };
            }
        };
        let plan_id = plan.plan_id.clone();
        match self.backend.submit(plan) {
            Ok(handle) => {
                info!(
                    plan_id = %plan_id.short(),
                    backend = self.backend.name(),
                    "run submitted"
                );
                self.record("submitted");
                handle
            }
            Err(err) => {
                warn!(
                    plan_id = %plan_id.short(),
                    backend = self.backend.name(),
                    error = %err,
                    "backend rejected run"
                );
                self.record("rejected");
                RunHandle::failed(err).with_plan_id(plan_id)
            }
        }
    }

    /// Submit `build` and block the calling thread until the run finishes.
    ///
    /// Must not be called from inside an async task.
    pub fn run_sync(&self, build: &BuildResult) -> Result<JobStats> {
        futures::executor::block_on(self.run_async(build))
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_run_submission(self.backend.name(), outcome);
        }
    }
}
