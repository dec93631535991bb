//! Fixed-capacity task executor.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskPoolError {
    #[error("{0} pool is saturated")]
    Saturated(String),

    #[error("{0} pool has been released")]
    Released(String),
}

/// Runs at most `capacity` tasks at once; each task holds one slot until it
/// completes.
#[derive(Debug)]
pub struct TaskPool {
    name: String,
    capacity: usize,
    slots: Arc<Semaphore>,
}

impl TaskPool {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Spawn `task` if a slot is free, otherwise fail without queueing.
    pub fn try_submit<F>(&self, task: F) -> Result<JoinHandle<()>, TaskPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(self.try_acquire()?.spawn(task))
    }

    /// Wait for a free slot, then spawn `task`.
    pub async fn submit<F>(&self, task: F) -> Result<JoinHandle<()>, TaskPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(self.acquire().await?.spawn(task))
    }

    /// Reserve a slot without waiting. Lets callers keep ownership of the
    /// task's inputs when the pool is full.
    pub fn try_acquire(&self) -> Result<Slot, TaskPoolError> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .map(|permit| Slot { permit })
            .map_err(|e| match e {
                TryAcquireError::NoPermits => TaskPoolError::Saturated(self.name.clone()),
                TryAcquireError::Closed => TaskPoolError::Released(self.name.clone()),
            })
    }

    /// Wait until a slot frees up and reserve it.
    pub async fn acquire(&self) -> Result<Slot, TaskPoolError> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map(|permit| Slot { permit })
            .map_err(|_| TaskPoolError::Released(self.name.clone()))
    }

    /// Whether [`release`](TaskPool::release) was called.
    pub fn is_released(&self) -> bool {
        self.slots.is_closed()
    }

    /// Refuse further submissions. Running tasks are not affected.
    pub fn release(&self) {
        self.slots.close();
    }
}

/// A reserved slot in a [`TaskPool`].
#[derive(Debug)]
pub struct Slot {
    permit: OwnedSemaphorePermit,
}

impl Slot {
    /// Run `task` in this slot; the slot frees when the task completes.
    pub fn spawn<F>(self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            let _permit = permit;
            task.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn try_submit_fails_when_saturated() {
        let pool = TaskPool::new("reader", 1);
        let (release, hold) = oneshot::channel::<()>();
        let first = pool
            .try_submit(async move {
                let _ = hold.await;
            })
            .unwrap();
        assert_eq!(pool.running(), 1);

        let err = pool.try_submit(async {}).unwrap_err();
        assert_eq!(err, TaskPoolError::Saturated("reader".to_string()));

        release.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(pool.running(), 0);
        pool.try_submit(async {}).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn submit_waits_for_a_slot() {
        let pool = Arc::new(TaskPool::new("importer", 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let handle = pool
                .submit(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            handles.push(handle);
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn released_pool_rejects_tasks() {
        let pool = TaskPool::new("reader", 4);
        assert!(!pool.is_released());
        pool.release();
        assert!(pool.is_released());
        assert_eq!(
            pool.try_submit(async {}).unwrap_err(),
            TaskPoolError::Released("reader".to_string())
        );
        assert!(matches!(
            pool.submit(async {}).await,
            Err(TaskPoolError::Released(_))
        ));
    }

    #[tokio::test]
    async fn reserved_slot_counts_as_running() {
        let pool = TaskPool::new("reader", 1);
        let slot = pool.try_acquire().unwrap();
        assert_eq!(pool.running(), 1);
        assert!(matches!(pool.try_acquire(), Err(TaskPoolError::Saturated(_))));
        drop(slot);
        assert_eq!(pool.running(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let pool = TaskPool::new("reader", 0);
        assert_eq!(pool.capacity(), 1);
    }
}
