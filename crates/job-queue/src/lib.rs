//! Durable at-least-once job queue.
//!
//! Jobs carry an identity key so equivalent work is enqueued once. Failed
//! attempts are retried with a configurable backoff; jobs that exhaust
//! their attempts are kept as failed records. When a storage path is set
//! the queue state is snapshotted to disk after every change and restored
//! on open, so pending work survives restarts.

mod error;
mod queue;
mod types;

pub use error::QueueError;
pub use queue::{JobHandler, JobQueue};
pub use types::*;
