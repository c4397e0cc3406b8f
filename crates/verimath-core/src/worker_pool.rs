//! Bounded worker pool for subgoal execution
//!
//! Provides:
//! - A fixed number of worker slots (semaphore permits)
//! - Tracking of the subgoals currently holding a slot
//! - Pool statistics, including the peak number of concurrent subgoals

use crate::error::PoolError;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Work items that obtained a worker
    pub total_dispatched: usize,
    /// Work items that ran to completion
    pub completed: usize,
    /// Most work items holding a worker at once
    pub peak_active: usize,
}

/// Removes an entry from the active map when the work item finishes or is cancelled
struct ActiveGuard<'a> {
    active: &'a DashMap<String, Instant>,
    id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Semaphore-bounded pool; one pool per attempt
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    permits: Arc<Semaphore>,
    /// Subgoal id to start time
    active: DashMap<String, Instant>,
    stats: Mutex<PoolStats>,
}

impl WorkerPool {
    /// Create new pool; at least one worker
    #[inline]
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
            active: DashMap::new(),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Run `work` once a worker is free
    ///
    /// # Errors
    /// - `PoolError::Closed` if the pool was closed before a worker freed up
    pub async fn run<F, T>(&self, id: &str, work: F) -> Result<T, PoolError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        self.active.insert(id.to_string(), Instant::now());
        let guard = ActiveGuard {
            active: &self.active,
            id: id.to_string(),
        };
        {
            let mut stats = self.stats.lock().await;
            stats.total_dispatched += 1;
            stats.peak_active = stats.peak_active.max(self.active.len());
        }

        let out = work.await;
        drop(guard);

        let mut stats = self.stats.lock().await;
        stats.completed += 1;
        Ok(out)
    }

    /// Reject work still waiting for a worker
    pub fn close(&self) {
        self.permits.close();
    }

    /// Get pool statistics
    #[inline]
    pub async fn stats(&self) -> PoolStats {
        self.stats.lock().await.clone()
    }

    /// Work items currently holding a worker
    #[inline]
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Upper bound on concurrently held workers
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_workers
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_work_and_counts() {
        let pool = WorkerPool::new(2);
        let out = pool.run("s1", async { 21 * 2 }).await.unwrap();
        assert_eq!(out, 42);

        let stats = pool.stats().await;
        assert_eq!(stats.total_dispatched, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn width_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let sleepy = |id: &'static str| {
            let pool = &pool;
            async move {
                pool.run(id, tokio::time::sleep(Duration::from_millis(20)))
                    .await
                    .unwrap();
            }
        };
        futures::future::join_all(vec![sleepy("a"), sleepy("b"), sleepy("c"), sleepy("d")]).await;

        let stats = pool.stats().await;
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.peak_active, 2);
    }

    #[tokio::test]
    async fn zero_width_is_one_worker() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn cancelled_work_releases_its_slot() {
        let pool = WorkerPool::new(1);
        let slow = pool.run("slow", tokio::time::sleep(Duration::from_secs(5)));
        let timed_out = tokio::time::timeout(Duration::from_millis(5), slow).await;
        assert!(timed_out.is_err());
        assert_eq!(pool.active_count(), 0);
        assert!(pool.run("next", async {}).await.is_ok());
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert_eq!(pool.run("s1", async {}).await, Err(PoolError::Closed));
    }
}
