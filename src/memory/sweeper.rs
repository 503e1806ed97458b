//! Background removal of expired memories.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::MemoryStore;

/// Running sweeper task. Call [`SweeperHandle::stop`] to end it.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Memory sweeper task did not exit cleanly");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl MemoryStore {
    /// Run [`clean_expired`](MemoryStore::clean_expired) every `interval`.
    ///
    /// The first sweep happens one interval after start. Failed sweeps are
    /// logged and retried on the next tick.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let store = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately once
            ticker.tick().await;

            info!(interval_secs = interval.as_secs_f64(), "Memory sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.clean_expired().await {
                            Ok(0) => debug!("No expired memories"),
                            Ok(removed) => debug!(removed, "Sweep finished"),
                            Err(e) => warn!(error = %e, "Sweep failed, retrying next tick"),
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Memory sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}
