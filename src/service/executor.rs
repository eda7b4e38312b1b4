//! Bounded worker pool for invocations.
//!
//! Submission waits for a free worker, so a saturated pool pushes back on
//! the read loop that is feeding it. Jobs run on tokio's blocking pool;
//! their continuations run as ordinary tasks.

use crate::error::constants::ERR_POOL_CLOSED;
use crate::error::{RemoteError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct WorkerPool {
    workers: usize,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl WorkerPool {
    /// Pool running at most `workers` jobs at once (minimum 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            tasks: TaskTracker::new(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers not currently running a job
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Jobs submitted and not yet finished, continuations included
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run `job` on a worker once one is free, then pass its outcome to
    /// `then`. The worker stays occupied until `then` completes.
    ///
    /// Waits while the pool is saturated. Fails only when the pool has been
    /// shut down.
    pub async fn submit<J, T, C, Fut>(&self, job: J, then: C) -> Result<()>
    where
        J: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        C: FnOnce(std::result::Result<T, JoinError>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RemoteError::InvalidState(ERR_POOL_CLOSED))?;

        self.tasks.spawn(async move {
            let outcome = tokio::task::spawn_blocking(job).await;
            then(outcome).await;
            drop(permit);
        });
        Ok(())
    }

    /// Refuse new jobs and wait up to `timeout` for running ones. Returns
    /// whether everything finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.permits.close();
        self.tasks.close();

        let remaining = self.tasks.len();
        if remaining > 0 {
            debug!(remaining, "Waiting for in-flight invocations");
        }
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = self.tasks.len(), "Worker pool shutdown timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_jobs_run_and_report() {
        let pool = WorkerPool::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..4u32 {
            let tx = tx.clone();
            pool.submit(move || i * 10, move |out| async move {
                let _ = tx.send(out.unwrap_or_default());
            })
            .await
            .unwrap_or_else(|e| panic!("submit failed: {e}"));
        }
        drop(tx);

        let mut results = Vec::new();
        while let Some(v) = rx.recv().await {
            results.push(v);
        }
        results.sort_unstable();
        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                |_| async {},
            )
            .await
            .unwrap_or_else(|e| panic!("submit failed: {e}"));
        }

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_millis(10)).await);
        assert!(pool.is_closed());

        let result = pool.submit(|| (), |_| async {}).await;
        assert!(matches!(result, Err(RemoteError::InvalidState(_))));
    }

    #[test]
    fn test_zero_workers_rounds_up() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }
}
