use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    errors::PoolError,
    pool::{BoundedTicketPool, DequeueOutcome},
    task::{TaskControl, TaskState},
    ticket::Ticket,
};

pub const DEFAULT_RETRIEVAL_INTERVAL: Duration = Duration::from_millis(1000);

/// Consumer task: buys up to `batch_size` tickets per cycle, pausing `retrieval_interval`
/// between cycles.
///
/// The loop ends at end-of-stream, when the pool is stopped, or when [`Customer::stop`] is
/// called. Running out of tickets is a normal finish, not an error.
#[derive(Debug)]
pub struct Customer {
    label: String,
    batch_size: usize,
    retrieval_interval: Duration,
    pool: Arc<BoundedTicketPool>,
    control: TaskControl,
    purchased: Mutex<Vec<Ticket>>,
}

impl Customer {
    pub fn new(
        label: impl Into<String>,
        batch_size: usize,
        retrieval_interval: Duration,
        pool: Arc<BoundedTicketPool>,
    ) -> Result<Self, PoolError> {
        let label = label.into();
        if retrieval_interval.is_zero() {
            error!(customer = %label, "invalid retrieval interval");
            return Err(PoolError::InvalidConfiguration(format!(
                "customer {} retrieval interval must be positive",
                label
            )));
        }

        info!(
            customer = %label,
            batch_size,
            interval_ms = retrieval_interval.as_millis() as u64,
            "customer initialised"
        );
        Ok(Self {
            label,
            batch_size,
            retrieval_interval,
            pool,
            control: TaskControl::new(),
            purchased: Mutex::new(Vec::new()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Tickets bought by this customer, in purchase order.
    pub fn purchased(&self) -> Vec<Ticket> {
        self.purchased.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn purchased_count(&self) -> usize {
        self.purchased.lock().unwrap_or_else(PoisonError::into_inner).len()
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

    pub async fn run(&self) {
        let Some(_running) = self.control.begin() else {
            warn!(customer = %self.label, state = ?self.state(), "customer already started, ignoring run");
            return;
        };
        info!(customer = %self.label, "customer started");

        'cycles: while !self.control.is_cancelled() && !self.pool.is_stopped() {
            // with an empty batch the pool is never asked, so end-of-stream has to be polled
            if self.batch_size == 0 && self.pool.is_complete() {
                break;
            }

            for _ in 0..self.batch_size {
                let outcome = tokio::select! {
                    biased;
                    _ = self.control.cancelled() => break 'cycles,
                    outcome = self.pool.try_dequeue() => outcome,
                };

                match outcome {
                    DequeueOutcome::Ticket(ticket) => {
                        debug!(customer = %self.label, ticket = %ticket, "customer retrieved ticket");
                        self.purchased.lock().unwrap_or_else(PoisonError::into_inner).push(ticket);
                    }
                    DequeueOutcome::EndOfStream => {
                        info!(customer = %self.label, "no more tickets to retrieve");
                        break 'cycles;
                    }
                    DequeueOutcome::Stopped => break 'cycles,
                }
            }

            if !self.control.pause(self.retrieval_interval).await {
                break;
            }
        }

        info!(customer = %self.label, purchased = self.purchased_count(), "customer stopped");
    }
}
