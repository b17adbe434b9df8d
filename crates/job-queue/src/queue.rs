//! Durable job queue with worker pool, retries and identity deduplication.

use crate::error::QueueError;
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Snapshot format version.
const DATA_VERSION: u32 = 1;

/// Upper bound on how long an idle worker sleeps before re-checking.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Processes jobs taken from a [`JobQueue`].
///
/// Returning `Err` schedules a retry according to the queue's backoff
/// until attempts are exhausted. Conditions that retrying cannot fix
/// should be logged and returned as `Ok`.
#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    type Error: Display + Send;

    async fn handle(&self, job: &Job<T>) -> Result<(), Self::Error>;
}

/// Persistent queue contents.
#[derive(Debug, Serialize, Deserialize)]
struct QueueData<T> {
    version: u32,
    next_seq: u64,
    jobs: HashMap<String, Job<T>>,
}

impl<T> Default for QueueData<T> {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            next_seq: 0,
            jobs: HashMap::new(),
        }
    }
}

impl<T> QueueData<T> {
    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop the oldest finished jobs in `state` beyond `keep`.
    fn prune(&mut self, state: JobState, keep: usize) {
        let mut finished: Vec<(DateTime<Utc>, u64, String)> = self
            .jobs
            .values()
            .filter(|j| j.state == state)
            .map(|j| (j.finished_at.unwrap_or(j.enqueued_at), j.seq, j.id.clone()))
            .collect();

        if finished.len() <= keep {
            return;
        }

        finished.sort();
        let excess = finished.len() - keep;
        for (_, _, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }
}

enum Claim<T> {
    Ready(Job<T>),
    /// Nothing ready; the earliest delayed job becomes ready after this long.
    Idle(Option<Duration>),
}

struct Inner<T> {
    options: QueueOptions,
    data: Mutex<QueueData<T>>,
    /// Serializes snapshot writes so an older snapshot never lands last.
    persist_lock: Mutex<()>,
    notify: Notify,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// At-least-once job queue.
///
/// Cloning is cheap; clones share the same queue.
pub struct JobQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> JobQueue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Open a queue, restoring its snapshot when a storage path is set.
    ///
    /// Jobs that were active when the previous process stopped are made
    /// ready again.
    pub async fn open(options: QueueOptions) -> Result<Self, QueueError> {
        let data = match &options.storage_path {
            Some(path) => Self::load(&options.name, path).await?,
            None => QueueData::default(),
        };

        let (shutdown, _) = watch::channel(false);

        let queue = Self {
            inner: Arc::new(Inner {
                options,
                data: Mutex::new(data),
                persist_lock: Mutex::new(()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                shutdown,
                workers: Mutex::new(Vec::new()),
            }),
        };

        queue.persist().await?;
        Ok(queue)
    }

    async fn load(name: &str, path: &std::path::Path) -> Result<QueueData<T>, QueueError> {
        if !fs::try_exists(path).await? {
            info!("Queue {} snapshot not found at {:?}, starting fresh", name, path);
            return Ok(QueueData::default());
        }

        let bytes = fs::read(path).await?;
        let mut data: QueueData<T> = serde_json::from_slice(&bytes)?;

        let mut recovered = 0;
        for job in data.jobs.values_mut() {
            if job.state == JobState::Active {
                job.state = JobState::Waiting;
                recovered += 1;
            }
        }

        let counts = data.counts();
        info!(
            "Loaded queue {}: {} pending, {} completed, {} failed ({} recovered from active)",
            name,
            counts.pending(),
            counts.completed,
            counts.failed,
            recovered
        );

        Ok(data)
    }

    /// Write the current snapshot, if this queue is durable.
    pub async fn persist(&self) -> Result<(), QueueError> {
        let Some(path) = &self.inner.options.storage_path else {
            return Ok(());
        };

        let _guard = self.inner.persist_lock.lock().await;
        let bytes = {
            let data = self.inner.data.lock().await;
            serde_json::to_vec(&*data)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved queue {} ({} bytes)", self.inner.options.name, bytes.len());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Add a job. A `job_id` already known to the queue is not added twice.
    pub async fn enqueue(
        &self,
        job_id: Option<String>,
        data: T,
    ) -> Result<EnqueueOutcome, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.inner.options.name.clone()));
        }

        let id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        {
            let mut guard = self.inner.data.lock().await;
            if guard.jobs.contains_key(&id) {
                debug!("Queue {}: job {} already present", self.inner.options.name, id);
                return Ok(EnqueueOutcome::Duplicate(id));
            }

            let mut job = Job::new(id.clone(), data, self.inner.options.attempts);
            job.seq = guard.next_seq;
            guard.next_seq += 1;
            guard.jobs.insert(id.clone(), job);
        }

        self.persist().await?;
        self.inner.notify.notify_one();

        debug!("Queue {}: enqueued job {}", self.inner.options.name, id);
        Ok(EnqueueOutcome::Added(id))
    }

    pub async fn get(&self, id: &str) -> Option<Job<T>> {
        self.inner.data.lock().await.jobs.get(id).cloned()
    }

    pub async fn counts(&self) -> QueueCounts {
        self.inner.data.lock().await.counts()
    }

    /// Jobs whose attempts were exhausted, oldest first.
    pub async fn failed_jobs(&self) -> Vec<Job<T>> {
        let data = self.inner.data.lock().await;
        let mut failed: Vec<Job<T>> = data
            .jobs
            .values()
            .filter(|j| j.state == JobState::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|j| (j.finished_at, j.seq));
        failed
    }

    /// Wait until no job is waiting, delayed or active.
    pub async fn wait_idle(&self, poll: Duration) {
        while self.counts().await.pending() > 0 {
            tokio::time::sleep(poll).await;
        }
    }

    /// Spawn `concurrency` workers running `handler`.
    pub async fn start<H>(&self, handler: Arc<H>, concurrency: usize)
    where
        H: JobHandler<T>,
    {
        let mut workers = self.inner.workers.lock().await;
        for worker_id in 0..concurrency.max(1) {
            let queue = self.clone();
            let handler = handler.clone();
            let shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id, handler, shutdown).await;
            }));
        }

        info!(
            "Queue {} started with {} worker(s)",
            self.inner.options.name,
            workers.len()
        );
    }

    /// Stop accepting jobs, let in-flight jobs finish, and save the snapshot.
    ///
    /// Jobs still waiting or backing off stay in the snapshot for the next run.
    pub async fn close(&self) -> Result<(), QueueError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.inner.shutdown.send(true);
        self.inner.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Queue {} worker ended abnormally: {}", self.inner.options.name, e);
            }
        }

        self.persist().await?;

        let counts = self.counts().await;
        info!(
            "Queue {} closed ({} pending, {} failed)",
            self.inner.options.name,
            counts.pending(),
            counts.failed
        );
        Ok(())
    }

    async fn worker_loop<H>(
        &self,
        worker_id: usize,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        H: JobHandler<T>,
    {
        debug!("Queue {} worker {} running", self.inner.options.name, worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.claim_next().await {
                Claim::Ready(job) => self.run_job(job, handler.clone()).await,
                Claim::Idle(next_due) => {
                    let wait = next_due.unwrap_or(IDLE_POLL).min(IDLE_POLL);
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        debug!("Queue {} worker {} stopped", self.inner.options.name, worker_id);
    }

    async fn claim_next(&self) -> Claim<T> {
        let now = Utc::now();
        let mut data = self.inner.data.lock().await;

        let ready = data
            .jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Delayed))
            .filter(|j| j.available_at <= now)
            .min_by_key(|j| (j.available_at, j.seq))
            .map(|j| j.id.clone());

        if let Some(id) = ready {
            if let Some(job) = data.jobs.get_mut(&id) {
                job.state = JobState::Active;
                job.attempts_made += 1;
                return Claim::Ready(job.clone());
            }
        }

        let next_due = data
            .jobs
            .values()
            .filter(|j| j.state == JobState::Delayed)
            .map(|j| j.available_at)
            .min()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));

        Claim::Idle(next_due)
    }

    async fn run_job<H>(&self, job: Job<T>, handler: Arc<H>)
    where
        H: JobHandler<T>,
    {
        let name = &self.inner.options.name;
        let id = job.id.clone();
        let attempt = job.attempts_made;
        let max_attempts = job.max_attempts;

        // The claimed attempt must be on disk before the handler has side effects.
        if let Err(e) = self.persist().await {
            error!("Queue {}: failed to save snapshot: {}", name, e);
        }

        // Run in its own task so a panicking handler counts as a failed attempt.
        let outcome = tokio::spawn(async move {
            handler.handle(&job).await.map_err(|e| e.to_string())
        })
        .await
        .unwrap_or_else(|e| Err(format!("handler panicked: {}", e)));

        let mut retry_scheduled = false;
        {
            let mut data = self.inner.data.lock().await;
            let now = Utc::now();

            if let Some(job) = data.jobs.get_mut(&id) {
                match &outcome {
                    Ok(()) => {
                        job.state = JobState::Completed;
                        job.finished_at = Some(now);
                        job.last_error = None;
                        debug!("Queue {}: job {} completed on attempt {}", name, id, attempt);
                    }
                    Err(e) if attempt < max_attempts => {
                        let delay = self.inner.options.backoff.delay(attempt);
                        job.state = JobState::Delayed;
                        job.available_at = now + chrono_duration(delay);
                        job.last_error = Some(e.clone());
                        retry_scheduled = true;
                        warn!(
                            "Queue {}: job {} attempt {}/{} failed, retrying in {:?}: {}",
                            name, id, attempt, max_attempts, delay, e
                        );
                    }
                    Err(e) => {
                        job.state = JobState::Failed;
                        job.finished_at = Some(now);
                        job.last_error = Some(e.clone());
                        error!(
                            "Queue {}: job {} failed after {} attempts, giving up: {}",
                            name, id, attempt, e
                        );
                    }
                }
            }

            let completed_retention = self.inner.options.completed_retention;
            let failed_retention = self.inner.options.failed_retention;
            data.prune(JobState::Completed, completed_retention);
            data.prune(JobState::Failed, failed_retention);
        }

        if let Err(e) = self.persist().await {
            error!("Queue {}: failed to save snapshot: {}", name, e);
        }

        if retry_scheduled {
            self.inner.notify.notify_one();
        }
    }
}

fn chrono_duration(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}
