//! Bounded, quota-aware ticket pool shared by concurrent vendors and customers.
//!
//! Vendors release tickets into a [`BoundedTicketPool`] that never holds more than its
//! capacity and never produces more than its quota. Customers buy tickets in FIFO order
//! until the quota has been produced and sold, or until the run is stopped.

pub mod customer;
pub mod errors;
pub mod pool;
pub mod task;
pub mod ticket;
pub mod vendor;

pub use customer::{Customer, DEFAULT_RETRIEVAL_INTERVAL};
pub use errors::PoolError;
pub use pool::{BoundedTicketPool, DequeueOutcome, EnqueueOutcome, PoolStats};
pub use task::TaskState;
pub use ticket::Ticket;
pub use vendor::{Vendor, DEFAULT_RELEASE_INTERVAL};
