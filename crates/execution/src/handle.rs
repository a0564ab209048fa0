use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use flowplan_common::{FlowError, PlanId, Result};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::stats::JobStats;

/// Future-like handle to a submitted run.
///
/// Resolves to the run outcome. Cancellation is forwarded to the backend's
/// native mechanism when the handle wraps one; otherwise `cancel` reports
/// `false` and the run continues.
pub struct RunHandle {
    plan_id: Option<PlanId>,
    state: HandleState,
}

enum HandleState {
    Finished(Option<Result<JobStats>>),
    Spawned(JoinHandle<Result<JobStats>>),
    Deferred(BoxFuture<'static, Result<JobStats>>),
}

impl RunHandle {
    /// Handle that resolves to `err` without touching any backend.
    pub fn failed(err: FlowError) -> Self {
        Self {
            plan_id: None,
            state: HandleState::Finished(Some(Err(err))),
        }
    }

    pub fn completed(stats: JobStats) -> Self {
        Self {
            plan_id: None,
            state: HandleState::Finished(Some(Ok(stats))),
        }
    }

    /// Run executing on a tokio runtime; cancellable through task abort.
    pub fn spawned(handle: JoinHandle<Result<JobStats>>) -> Self {
        Self {
            plan_id: None,
            state: HandleState::Spawned(handle),
        }
    }

    /// Run that executes when the handle is first polled, on the polling thread.
    pub fn deferred(fut: BoxFuture<'static, Result<JobStats>>) -> Self {
        Self {
            plan_id: None,
            state: HandleState::Deferred(fut),
        }
    }

    #[must_use]
    pub fn with_plan_id(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn plan_id(&self) -> Option<&PlanId> {
        self.plan_id.as_ref()
    }

    pub fn supports_cancel(&self) -> bool {
        matches!(self.state, HandleState::Spawned(_))
    }

    /// Request cancellation. Returns whether the request was forwarded.
    ///
    /// Aborting stops the run before its next step starts. Partitions
    /// already running on the blocking pool finish, but their output is
    /// discarded.
    pub fn cancel(&self) -> bool {
        match &self.state {
            HandleState::Spawned(handle) => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// True when awaiting the handle would not wait.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Finished(_) => true,
            HandleState::Spawned(handle) => handle.is_finished(),
            HandleState::Deferred(_) => false,
        }
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            HandleState::Finished(_) => "finished",
            HandleState::Spawned(_) => "spawned",
            HandleState::Deferred(_) => "deferred",
        };
        f.debug_struct("RunHandle")
            .field("plan_id", &self.plan_id)
            .field("state", &state)
            .finish()
    }
}

impl Future for RunHandle {
    type Output = Result<JobStats>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = match &mut this.state {
            HandleState::Finished(slot) => Poll::Ready(slot.take().unwrap_or_else(|| {
                Err(FlowError::Execution(
                    "run handle polled after completion".to_string(),
                ))
            })),
            HandleState::Spawned(handle) => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(e)) if e.is_cancelled() => {
                    let plan = this
                        .plan_id
                        .as_ref()
                        .map(|p| p.short().to_string())
                        .unwrap_or_default();
                    Poll::Ready(Err(FlowError::Cancelled(format!("plan {plan}"))))
                }
                Poll::Ready(Err(e)) => Poll::Ready(Err(FlowError::Execution(format!(
                    "run task panicked: {e}"
                )))),
                Poll::Pending => Poll::Pending,
            },
            HandleState::Deferred(fut) => fut.as_mut().poll(cx),
        };
        if polled.is_ready() {
            this.state = HandleState::Finished(None);
        }
        polled
    }
}
