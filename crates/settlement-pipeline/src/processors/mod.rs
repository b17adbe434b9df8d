//! Queue consumers.
//!
//! Each processor exposes a `process` method that reports every failure,
//! and a [`JobHandler`](job_queue::JobHandler) implementation that hands
//! only retryable failures back to the queue.

mod confirmations;
mod events;
mod webhooks;

pub use confirmations::{ConfirmationOutcome, ConfirmationProcessor};
pub use events::ChainEventProcessor;
pub use webhooks::{envelope_for, WebhookDeliveryProcessor};

use crate::error::PipelineError;
use tracing::warn;

/// Drop non-retryable failures so the queue completes the job.
fn settle(queue: &str, job_id: &str, result: Result<(), PipelineError>) -> Result<(), PipelineError> {
    match result {
        Err(e) if !e.is_retryable() => {
            warn!(queue, job_id, "Dropping job: {}", e);
            Ok(())
        }
        other => other,
    }
}
