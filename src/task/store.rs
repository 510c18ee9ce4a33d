//! Concurrency-safe task storage.
//!
//! The store is the single source of truth for task lifecycle state, shared
//! by reference between the dispatcher, the runners and the janitor. All
//! record access goes through the store lock, so progress writes from a
//! running task never race with dispatcher reads or janitor eviction.
//! Spawned worker handles are tracked alongside the records so outstanding
//! tasks stay enumerable.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use super::record::TaskRecord;

/// Errors from store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} already exists")]
    Duplicate(Uuid),
    #[error("task {0} not found")]
    NotFound(Uuid),
}

/// Shared map of task id to record, plus the worker-handle registry.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    // Separate lock: joining a worker must not hold up record access.
    workers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created record. With v4 ids a duplicate should be
    /// unreachable; it is still an error, never an overwrite.
    pub async fn create(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        tasks.insert(record.id, record);
        Ok(())
    }

    /// Immutable copy of one record.
    pub async fn snapshot(&self, id: Uuid) -> Option<TaskRecord> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Atomic read-modify-write of one record.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        mutate(record);
        Ok(())
    }

    /// Remove a record along with its worker handle, returning the record.
    /// Dropping the handle detaches a still-running worker; it never aborts.
    pub async fn remove(&self, id: Uuid) -> Option<TaskRecord> {
        let removed = self.tasks.write().await.remove(&id);
        if removed.is_some() {
            self.workers.lock().await.remove(&id);
        }
        removed
    }

    /// Copies of every terminal record, for the janitor and resource listing.
    pub async fn scan_terminal(&self) -> Vec<(Uuid, TaskRecord)> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|(_, record)| record.status.is_terminal())
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Track the detached unit driving a task.
    pub async fn register_worker(&self, id: Uuid, handle: JoinHandle<()>) {
        self.workers.lock().await.insert(id, handle);
    }

    /// Await the worker for a task, removing it from the registry. Returns
    /// `None` when no worker is registered; the inner `Err` carries a panic
    /// that escaped the runner.
    pub async fn join_worker(&self, id: Uuid) -> Option<Result<(), JoinError>> {
        let handle = self.workers.lock().await.remove(&id)?;
        Some(handle.await)
    }

    /// Number of tracked worker handles (finished ones included until their
    /// record is evicted).
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }
}
