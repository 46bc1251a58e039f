use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{errors::PoolError, ticket::Ticket};

/// Result of a vendor's attempt to release a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The ticket was placed at the back of the pool.
    Enqueued(Ticket),
    /// Every ticket of the quota has already been produced. Nothing was enqueued and the
    /// vendor should stop releasing.
    QuotaMet,
    /// The pool was stopped before space became available.
    Stopped,
}

impl EnqueueOutcome {
    /// Whether the pool accepted the request. A met quota counts as accepted even though no
    /// ticket was added.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Stopped)
    }
}

/// Result of a customer's attempt to buy a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DequeueOutcome {
    Ticket(Ticket),
    /// The quota is produced and the pool is drained, no ticket will ever arrive again.
    EndOfStream,
    Stopped,
}

impl DequeueOutcome {
    pub fn into_ticket(self) -> Option<Ticket> {
        match self {
            DequeueOutcome::Ticket(ticket) => Some(ticket),
            DequeueOutcome::EndOfStream | DequeueOutcome::Stopped => None,
        }
    }
}

/// Point-in-time view of the pool counters, taken under the pool lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub quota: usize,
    pub produced: usize,
    pub sold: usize,
    pub in_pool: usize,
    /// Tickets of the quota not yet produced.
    pub remaining: usize,
}

#[derive(Debug)]
struct PoolState {
    buffer: VecDeque<Ticket>,
    capacity: usize,
    quota: usize,
    produced: usize,
    sold: usize,
    stopped: bool,
}

impl PoolState {
    fn new(capacity: usize, quota: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            quota,
            produced: 0,
            sold: 0,
            stopped: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.produced >= self.quota
    }

    fn is_complete(&self) -> bool {
        self.exhausted() && self.buffer.is_empty()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            quota: self.quota,
            produced: self.produced,
            sold: self.sold,
            in_pool: self.buffer.len(),
            remaining: self.quota.saturating_sub(self.produced),
        }
    }
}

/// Capacity-bounded FIFO of tickets shared by every vendor and customer of a run.
///
/// All counters live behind one mutex so that `in_pool == produced - sold` holds between any
/// two calls. Waiting is done on two [`Notify`]s: vendors wait for space, customers wait for
/// a ticket or for the end of the stream. A waiter always registers with its `Notify` before
/// looking at the state, so a wake-up sent between the check and the wait is never lost.
#[derive(Debug)]
pub struct BoundedTicketPool {
    state: Mutex<PoolState>,
    space_available: Notify,
    ticket_available: Notify,
}

impl BoundedTicketPool {
    pub fn new(capacity: usize, quota: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity(capacity));
        }
        info!(capacity, quota, "ticket pool created");
        Ok(Self {
            state: Mutex::new(PoolState::new(capacity, quota)),
            space_available: Notify::new(),
            ticket_available: Notify::new(),
        })
    }

    // The state is consistent at every unlock, so a poisoned lock is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release one ticket on behalf of `vendor_label`, waiting for space if the pool is full.
    ///
    /// Resolves once the ticket is enqueued, the quota turns out to be met, or the pool is
    /// stopped. Dropping the future while it waits leaves the pool untouched.
    pub async fn try_enqueue(&self, vendor_label: &str) -> EnqueueOutcome {
        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.enqueue_now(vendor_label) {
                return outcome;
            }
            notified.await;
        }
    }

    /// Buy the ticket at the head of the pool, waiting while the pool is empty and more
    /// tickets may still be produced.
    pub async fn try_dequeue(&self) -> DequeueOutcome {
        loop {
            let notified = self.ticket_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.dequeue_now() {
                return outcome;
            }
            notified.await;
        }
    }

    /// `None` means the pool is full and the caller has to wait for space.
    fn enqueue_now(&self, vendor_label: &str) -> Option<EnqueueOutcome> {
        let mut state = self.lock();
        if state.stopped {
            return Some(EnqueueOutcome::Stopped);
        }
        if state.exhausted() {
            return Some(EnqueueOutcome::QuotaMet);
        }
        if state.buffer.len() >= state.capacity {
            return None;
        }

        let ticket = Ticket::issue(vendor_label, state.produced);
        state.buffer.push_back(ticket.clone());
        state.produced += 1;
        let exhausted = state.exhausted();
        let in_pool = state.buffer.len();
        drop(state);

        debug!(ticket = %ticket, in_pool, "ticket added");
        if exhausted {
            // customers parked on an empty pool must learn the stream ended, and vendors
            // parked on a full pool must learn the quota is met
            self.ticket_available.notify_waiters();
            self.space_available.notify_waiters();
        } else {
            self.ticket_available.notify_one();
        }
        Some(EnqueueOutcome::Enqueued(ticket))
    }

    /// `None` means the pool is empty but production is still possible.
    fn dequeue_now(&self) -> Option<DequeueOutcome> {
        let mut state = self.lock();
        if state.stopped {
            return Some(DequeueOutcome::Stopped);
        }
        match state.buffer.pop_front() {
            Some(ticket) => {
                state.sold += 1;
                let in_pool = state.buffer.len();
                drop(state);

                debug!(ticket = %ticket, in_pool, "ticket removed");
                self.space_available.notify_one();
                Some(DequeueOutcome::Ticket(ticket))
            }
            None if state.exhausted() => Some(DequeueOutcome::EndOfStream),
            None => None,
        }
    }

    /// Stop the pool and wake every parked vendor and customer. Idempotent.
    pub fn stop(&self) {
        let was_stopped = std::mem::replace(&mut self.lock().stopped, true);
        if !was_stopped {
            info!("ticket pool stopped");
        }
        self.space_available.notify_waiters();
        self.ticket_available.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// True once the whole quota has been produced and sold.
    pub fn is_complete(&self) -> bool {
        self.lock().is_complete()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats()
    }

    /// Reinitialise the pool for a new run.
    ///
    /// Every vendor and customer of the previous run must have finished before this is
    /// called, otherwise their tickets would be counted against the new run.
    pub fn reset(&self, capacity: usize, quota: usize) -> Result<(), PoolError> {
        if capacity == 0 {
            return Err(PoolError::InvalidCapacity(capacity));
        }
        *self.lock() = PoolState::new(capacity, quota);
        info!(capacity, quota, "ticket pool reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    const BLOCKED: Duration = Duration::from_millis(50);
    const BOUND: Duration = Duration::from_secs(5);

    #[test]
    fn zero_capacity_is_rejected() {
        let err = BoundedTicketPool::new(0, 10).unwrap_err();
        assert_eq!(err, PoolError::InvalidCapacity(0));
    }

    #[tokio::test]
    async fn zero_quota_is_complete_from_the_start() {
        let pool = BoundedTicketPool::new(10, 0).unwrap();
        assert!(pool.is_complete());

        let outcome = pool.try_enqueue("Vendor-1").await;
        assert_eq!(outcome, EnqueueOutcome::QuotaMet);
        assert!(outcome.is_accepted());
        assert_eq!(pool.try_dequeue().await, DequeueOutcome::EndOfStream);

        let stats = pool.stats();
        assert_eq!((stats.produced, stats.sold, stats.in_pool), (0, 0, 0));
    }

    #[tokio::test]
    async fn tickets_come_out_in_release_order() {
        let pool = BoundedTicketPool::new(5, 5).unwrap();
        for label in ["A", "B", "A"] {
            assert!(matches!(pool.try_enqueue(label).await, EnqueueOutcome::Enqueued(_)));
        }

        let ids: Vec<String> = [
            pool.try_dequeue().await,
            pool.try_dequeue().await,
            pool.try_dequeue().await,
        ]
        .into_iter()
        .map(|outcome| outcome.into_ticket().unwrap().id().to_string())
        .collect();
        assert_eq!(ids, vec!["A-0", "B-1", "A-2"]);
    }

    #[tokio::test]
    async fn counters_track_buffer_length() {
        let pool = BoundedTicketPool::new(4, 10).unwrap();
        for _ in 0..3 {
            pool.try_enqueue("V").await;
        }
        pool.try_dequeue().await;

        let stats = pool.stats();
        assert_eq!(stats.produced, 3);
        assert_eq!(stats.sold, 1);
        assert_eq!(stats.in_pool, stats.produced - stats.sold);
        assert_eq!(stats.remaining, 7);
        assert!(!pool.is_complete());
    }

    #[tokio::test]
    async fn quota_met_after_last_ticket() {
        let pool = BoundedTicketPool::new(5, 2).unwrap();
        pool.try_enqueue("V").await;
        pool.try_enqueue("V").await;
        assert_eq!(pool.try_enqueue("V").await, EnqueueOutcome::QuotaMet);
        assert_eq!(pool.stats().in_pool, 2);

        pool.try_dequeue().await;
        pool.try_dequeue().await;
        assert_eq!(pool.try_dequeue().await, DequeueOutcome::EndOfStream);
        assert!(pool.is_complete());
    }

    #[tokio::test]
    async fn full_pool_blocks_vendor_until_a_sale() {
        let pool = Arc::new(BoundedTicketPool::new(1, 10).unwrap());
        pool.try_enqueue("V").await;

        assert!(tokio::time::timeout(BLOCKED, pool.try_enqueue("V")).await.is_err());
        assert_eq!(pool.stats().in_pool, 1);

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.try_enqueue("V").await })
        };
        tokio::time::sleep(BLOCKED).await;
        assert!(!waiting.is_finished());

        pool.try_dequeue().await;
        let outcome = tokio::time::timeout(BOUND, waiting).await.unwrap().unwrap();
        assert_eq!(outcome.into_ticket_id(), Some("V-1".to_string()));
    }

    #[tokio::test]
    async fn empty_pool_blocks_customer_until_a_release() {
        let pool = Arc::new(BoundedTicketPool::new(3, 10).unwrap());
        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.try_dequeue().await })
        };
        tokio::time::sleep(BLOCKED).await;
        assert!(!waiting.is_finished());

        pool.try_enqueue("V").await;
        let outcome = tokio::time::timeout(BOUND, waiting).await.unwrap().unwrap();
        assert_eq!(outcome.into_ticket().map(|t| t.serial()), Some(0));
    }

    #[tokio::test]
    async fn last_release_wakes_every_parked_customer() {
        let pool = Arc::new(BoundedTicketPool::new(3, 1).unwrap());
        let customers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.try_dequeue().await })
            })
            .collect();
        tokio::time::sleep(BLOCKED).await;

        pool.try_enqueue("V").await;

        let mut sold = 0;
        for customer in customers {
            match tokio::time::timeout(BOUND, customer).await.unwrap().unwrap() {
                DequeueOutcome::Ticket(_) => sold += 1,
                DequeueOutcome::EndOfStream => {}
                DequeueOutcome::Stopped => panic!("pool was never stopped"),
            }
        }
        assert_eq!(sold, 1);
        assert!(pool.is_complete());
    }

    #[tokio::test]
    async fn stop_wakes_blocked_vendors_and_customers() {
        let full = Arc::new(BoundedTicketPool::new(1, 10).unwrap());
        full.try_enqueue("V").await;
        let vendor = {
            let pool = full.clone();
            tokio::spawn(async move { pool.try_enqueue("V").await })
        };

        let empty = Arc::new(BoundedTicketPool::new(1, 10).unwrap());
        let customer = {
            let pool = empty.clone();
            tokio::spawn(async move { pool.try_dequeue().await })
        };
        tokio::time::sleep(BLOCKED).await;

        full.stop();
        empty.stop();
        empty.stop();

        let vendor_outcome = tokio::time::timeout(BOUND, vendor).await.unwrap().unwrap();
        assert_eq!(vendor_outcome, EnqueueOutcome::Stopped);
        assert!(!vendor_outcome.is_accepted());
        let customer_outcome = tokio::time::timeout(BOUND, customer).await.unwrap().unwrap();
        assert_eq!(customer_outcome, DequeueOutcome::Stopped);

        // a stopped pool refuses new work without touching the counters
        assert_eq!(full.try_dequeue().await, DequeueOutcome::Stopped);
        assert_eq!(full.stats().in_pool, 1);
    }

    #[tokio::test]
    async fn reset_reinitialises_counters_and_stop_flag() {
        let pool = BoundedTicketPool::new(2, 2).unwrap();
        pool.try_enqueue("V").await;
        pool.stop();

        assert_eq!(pool.reset(0, 5), Err(PoolError::InvalidCapacity(0)));
        assert!(pool.is_stopped());

        pool.reset(3, 5).unwrap();
        assert!(!pool.is_stopped());
        assert_eq!(
            pool.stats(),
            PoolStats { capacity: 3, quota: 5, produced: 0, sold: 0, in_pool: 0, remaining: 5 }
        );
        let ticket = pool.try_enqueue("W").await.into_ticket_id();
        assert_eq!(ticket, Some("W-0".to_string()));
    }

    impl EnqueueOutcome {
        fn into_ticket_id(self) -> Option<String> {
            match self {
                EnqueueOutcome::Enqueued(ticket) => Some(ticket.id().to_string()),
                _ => None,
            }
        }
    }
}
