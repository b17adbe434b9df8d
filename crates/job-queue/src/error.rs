//! Job queue errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue {0} is closed")]
    Closed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for QueueError {
    fn from(e: std::io::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}
