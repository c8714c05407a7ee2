//! Bounded pool of tokio tasks with one result slot per unit of work.

use crate::core::domain::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};

/// Parallelism used when the platform cannot report it.
pub const FALLBACK_PARALLELISM: usize = 4;

/// Returns the machine's available parallelism.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_PARALLELISM)
}

/// A collection of tasks that run on distinct tokio tasks, at most
/// `max_parallelism` at a time.
///
/// Every spawned unit owns a slot in the output of [`WorkerPool::join_all`],
/// in spawn order. A unit that panics yields `SyncError::Worker` in its own
/// slot; siblings are unaffected.
pub struct WorkerPool<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<T>,
    slots: HashMap<Id, usize>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
            slots: HashMap::new(),
        }
    }

    /// Spawns a unit immediately; it starts executing once a permit is free.
    pub fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let handle = self.set.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if the pool is dropped.
            let _permit = semaphore.acquire_owned().await;
            unit.await
        });
        let slot = self.slots.len();
        self.slots.insert(handle.id(), slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Waits for every unit and returns their outputs in spawn order.
    pub async fn join_all(mut self) -> Vec<SyncResult<T>> {
        let mut results: Vec<Option<SyncResult<T>>> =
            std::iter::repeat_with(|| None).take(self.slots.len()).collect();

        while let Some(joined) = self.set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, output)) => (id, Ok(output)),
                Err(e) => (e.id(), Err(SyncError::Worker(e.to_string()))),
            };
            if let Some(&slot) = self.slots.get(&id) {
                results[slot] = Some(outcome);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(SyncError::Worker("unit was never joined".into()))))
            .collect()
    }
}
