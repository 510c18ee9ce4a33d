//! Retention sweep for finished tasks.
//!
//! Terminal records are kept for a retention window so clients can poll for
//! results, then evicted to keep the in-memory store from growing without
//! bound. Non-terminal records are never touched, whatever their age.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::store::TaskStore;

pub struct Janitor {
    store: Arc<TaskStore>,
    retention: Duration,
    interval: Duration,
}

impl Janitor {
    pub fn new(store: Arc<TaskStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Sweep forever. Sleeps first so freshly finished tasks are never
    /// evicted right at startup; an individual sweep going wrong never stops
    /// the loop.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            let evicted = self.sweep(Utc::now()).await;
            if evicted > 0 {
                tracing::info!("Cleaned up {} old tasks", evicted);
            }
        }
    }

    /// Evict every terminal record whose `end_time` is further in the past
    /// than the retention window. Returns the number evicted. `now` is a
    /// parameter so tests can drive the sweep with a synthetic clock.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(retention) => retention,
            Err(e) => {
                tracing::error!("Error in task cleanup: invalid retention window: {}", e);
                return 0;
            }
        };

        let mut evicted = 0;
        for (id, record) in self.store.scan_terminal().await {
            // Terminal records always carry an end time; skip defensively if
            // one does not.
            let Some(end_time) = record.end_time else {
                continue;
            };
            if now - end_time > retention {
                if self.store.remove(id).await.is_some() {
                    evicted += 1;
                }
            }
        }
        evicted
    }
}
