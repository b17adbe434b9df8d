//! Channel-backed subscriptions with an explicit stop handle.

use crate::error::ChainError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Items delivered by a live node subscription.
pub struct Subscription<T> {
    pub receiver: mpsc::Receiver<Result<T, ChainError>>,
    pub stop: StopHandle,
}

impl<T> Subscription<T> {
    pub fn into_parts(self) -> (mpsc::Receiver<Result<T, ChainError>>, StopHandle) {
        (self.receiver, self.stop)
    }
}

/// Cancels the task that feeds a [`Subscription`].
///
/// Dropping the handle also cancels the feed, but [`StopHandle::stop`]
/// additionally waits for the feeding task to unwind.
pub struct StopHandle {
    name: String,
    signal: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StopHandle {
    pub fn new(name: impl Into<String>, signal: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            signal,
            task: Some(task),
        }
    }

    /// Build a handle plus the receiver a feeding task should watch.
    pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.borrow()
    }

    /// Signal the feeding task and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.signal.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    debug!("Subscription {} task ended abnormally: {}", self.name, e);
                }
            }
        }
        debug!("Subscription {} stopped", self.name);
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        let _ = self.signal.send(true);
    }
}

/// Spawn a task that forwards `source` into a bounded channel until the
/// stop signal fires or either side closes.
pub fn spawn_feed<T, S>(name: impl Into<String>, capacity: usize, source: S) -> Subscription<T>
where
    T: Send + 'static,
    S: futures::Stream<Item = Result<T, ChainError>> + Send + 'static,
{
    use futures::StreamExt;

    let name = name.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (signal, mut stopped) = StopHandle::channel();
    let feed_name = name.clone();

    let task = tokio::spawn(async move {
        let mut source = Box::pin(source);
        loop {
            tokio::select! {
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
                item = source.next() => {
                    match item {
                        Some(item) => {
                            if tx.send(item).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            debug!("Subscription {} source ended", feed_name);
                            break;
                        }
                    }
                }
            }
        }
    });

    Subscription {
        receiver: rx,
        stop: StopHandle::new(name, signal, task),
    }
}
