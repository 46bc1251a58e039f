use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    errors::PoolError,
    pool::{BoundedTicketPool, EnqueueOutcome},
    task::{TaskControl, TaskState},
};

/// Pause between two release batches unless overridden.
pub const DEFAULT_RELEASE_INTERVAL: Duration = Duration::from_secs(1);

/// Producer task: releases `batch_size` tickets per cycle into the pool.
///
/// The loop ends on the first `QuotaMet`, when the pool is stopped, or when [`Vendor::stop`]
/// is called. A full pool is handled by the blocking in [`BoundedTicketPool::try_enqueue`].
#[derive(Debug)]
pub struct Vendor {
    label: String,
    batch_size: usize,
    release_interval: Duration,
    pool: Arc<BoundedTicketPool>,
    control: TaskControl,
    released: AtomicUsize,
}

impl Vendor {
    pub fn new(label: impl Into<String>, batch_size: usize, pool: Arc<BoundedTicketPool>) -> Result<Self, PoolError> {
        let label = label.into();
        if batch_size == 0 {
            error!(vendor = %label, batch_size, "invalid ticket release rate");
            return Err(PoolError::InvalidConfiguration(format!(
                "vendor {} release rate must be positive",
                label
            )));
        }

        info!(vendor = %label, batch_size, "vendor initialised");
        Ok(Self {
            label,
            batch_size,
            release_interval: DEFAULT_RELEASE_INTERVAL,
            pool,
            control: TaskControl::new(),
            released: AtomicUsize::new(0),
        })
    }

    pub fn with_release_interval(mut self, interval: Duration) -> Self {
        self.release_interval = interval;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of tickets this vendor put into the pool.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    pub fn stop(&self) {
        self.control.request_stop();
    }

    pub async fn wait_stopped(&self) {
        self.control.wait_stopped().await
    }

    /// Task body, meant to be spawned on its own worker. Returns once the vendor is done.
    pub async fn run(&self) {
        let Some(_running) = self.control.begin() else {
            warn!(vendor = %self.label, state = ?self.state(), "vendor already started, ignoring run");
            return;
        };
        info!(vendor = %self.label, "vendor started");

        'cycles: while !self.control.is_cancelled() && !self.pool.is_stopped() {
            for _ in 0..self.batch_size {
                let outcome = tokio::select! {
                    biased;
                    _ = self.control.cancelled() => break 'cycles,
                    outcome = self.pool.try_enqueue(&self.label) => outcome,
                };

                match outcome {
                    EnqueueOutcome::Enqueued(ticket) => {
                        self.released.fetch_add(1, Ordering::SeqCst);
                        debug!(vendor = %self.label, ticket = %ticket, "ticket released");
                    }
                    EnqueueOutcome::QuotaMet => {
                        info!(vendor = %self.label, "vendor has completed ticket addition");
                        break 'cycles;
                    }
                    EnqueueOutcome::Stopped => break 'cycles,
                }
            }

            if !self.control.pause(self.release_interval).await {
                break;
            }
        }

        info!(vendor = %self.label, released = self.released(), "vendor stopped");
    }
}
