use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle shared by vendors and customers. Tasks are single-use: once `Stopped`, a task
/// never runs again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Running,
    /// Stop was requested while running, the loop has not returned yet.
    Stopping,
    Stopped,
}

/// Cancellation and lifecycle bookkeeping embedded in every task.
#[derive(Debug)]
pub(crate) struct TaskControl {
    cancel: CancellationToken,
    state: watch::Sender<TaskState>,
}

impl TaskControl {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(TaskState::Created);
        Self { cancel: CancellationToken::new(), state }
    }

    /// Move `Created -> Running`. Returns `None` if the task was already started or stopped.
    pub(crate) fn begin(&self) -> Option<RunGuard<'_>> {
        let started = self.state.send_if_modified(|state| {
            if *state == TaskState::Created {
                *state = TaskState::Running;
                true
            } else {
                false
            }
        });
        started.then(|| RunGuard { control: self })
    }

    /// Cancel the task. A task that never started goes straight to `Stopped`.
    pub(crate) fn request_stop(&self) {
        self.cancel.cancel();
        self.state.send_if_modified(|state| match state {
            TaskState::Created => {
                *state = TaskState::Stopped;
                true
            }
            TaskState::Running => {
                *state = TaskState::Stopping;
                true
            }
            TaskState::Stopping | TaskState::Stopped => false,
        });
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Sleep between two cycles. Returns false if the task was cancelled first.
    pub(crate) async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(interval) => true,
        }
    }

    pub(crate) async fn wait_stopped(&self) {
        let mut state = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = state.wait_for(|state| *state == TaskState::Stopped).await;
    }
}

/// Held for the duration of a task's `run`. Dropping it marks the task `Stopped`, including
/// when the runtime drops the run future mid-wait.
pub(crate) struct RunGuard<'a> {
    control: &'a TaskControl,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.control.state.send_replace(TaskState::Stopped);
    }
}
