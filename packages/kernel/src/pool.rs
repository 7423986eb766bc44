//! Shared worker pool for blind work spawned by the bus and its services.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::KernelError;

/// A bounded set of background tasks.
///
/// At most `concurrency` tasks run at once; the rest wait for a permit.
/// [`WorkerPool::shutdown`] closes the pool, waits for in-flight work up to a
/// grace period, then aborts whatever is left.
#[derive(Debug)]
pub struct WorkerPool {
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            closed: AtomicBool::new(false),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` on the pool.
    pub fn spawn<F>(&self, work: F) -> Result<(), KernelError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(KernelError::PoolClosed);
        }

        let permits = Arc::clone(&self.permits);
        let mut tasks = self.tasks();
        // Reap finished tasks so the set does not grow without bound
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
        Ok(())
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the pool and wait up to `grace` for running work.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut tasks = std::mem::take(&mut *self.tasks());

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                log_join_result(result);
            }
        })
        .await;

        if drained.is_ok() {
            return 0;
        }

        let remaining = tasks.len();
        tracing::warn!(
            "Worker pool did not drain within {:?}, aborting {} tasks",
            grace,
            remaining
        );
        tasks.shutdown().await;
        remaining
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!("Pooled task panicked: {}", e);
    }
}
