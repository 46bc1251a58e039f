use std::time::Duration;

use thiserror::Error;
use ticket_pool::PoolError;

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("invalid simulation configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build ticket pool or tasks: {0}")]
    Pool(#[from] PoolError),

    #[error("configuration file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("vendors and customers did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}
