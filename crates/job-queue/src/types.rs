//! Job and queue option types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to run.
    Waiting,
    /// Waiting out a retry backoff.
    Delayed,
    /// Claimed by a worker.
    Active,
    /// Handler succeeded. Kept for identity deduplication.
    Completed,
    /// Attempts exhausted. Kept as a dead-letter record.
    Failed,
}

impl JobState {
    /// Whether the job still has work ahead of it.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed | JobState::Active)
    }
}

/// A unit of work and its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<T> {
    /// Identity key. Enqueuing a second job with the same id is a no-op.
    pub id: String,
    pub data: T,
    pub state: JobState,
    /// Attempts started so far.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub available_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Insertion order, used to break ties between equally-ready jobs.
    pub(crate) seq: u64,
}

impl<T> Job<T> {
    /// A fresh job, ready to run now.
    pub fn new(id: impl Into<String>, data: T, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at: now,
            available_at: now,
            finished_at: None,
            last_error: None,
            seq: 0,
        }
    }

    /// Whether a failure of the current attempt ends the job.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(n-1)` before retry `n`.
    Exponential(Duration),
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential(base) => {
                let exponent = attempt.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub name: String,
    /// Total attempts per job, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
    /// Snapshot file. `None` keeps the queue in memory only.
    pub storage_path: Option<PathBuf>,
    /// Completed jobs retained for deduplication.
    pub completed_retention: usize,
    /// Failed jobs retained for inspection.
    pub failed_retention: usize,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempts: 3,
            backoff: Backoff::Exponential(Duration::from_secs(2)),
            storage_path: None,
            completed_retention: 1000,
            failed_retention: 1000,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_retention(mut self, completed: usize, failed: usize) -> Self {
        self.completed_retention = completed;
        self.failed_retention = failed;
        self
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added(String),
    /// A job with this id is already known to the queue.
    Duplicate(String),
}

impl EnqueueOutcome {
    pub fn id(&self) -> &str {
        match self {
            EnqueueOutcome::Added(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, EnqueueOutcome::Added(_))
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn pending(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}
