//! Long-lived chain subscriptions feeding the pipeline queues.

mod blocks;
mod events;

pub use blocks::BlockWatcher;
pub use events::{validate_log, ChainEventWatcher};

use chain_client::StopHandle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Running watcher: the subscription stop handles plus the tasks
/// consuming them.
pub struct WatcherHandle {
    name: &'static str,
    stops: Vec<StopHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatcherHandle {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            stops: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, stop: StopHandle, task: JoinHandle<()>) {
        self.stops.push(stop);
        self.tasks.push(task);
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Cancel every subscription and wait for the consumers to finish.
    pub async fn stop(self) {
        for stop in self.stops {
            stop.stop().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("{} consumer ended abnormally: {}", self.name, e);
            }
        }
        debug!("{} stopped", self.name);
    }
}
