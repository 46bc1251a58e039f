use thiserror::Error;

/// Errors raised while constructing a pool or one of its tasks.
///
/// Contention is never an error: blocked callers are resolved by waking, so these only
/// surface synchronously from constructors and `reset`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid pool capacity {0}, capacity must be greater than zero")]
    InvalidCapacity(usize),

    #[error("invalid task configuration: {0}")]
    InvalidConfiguration(String),
}
