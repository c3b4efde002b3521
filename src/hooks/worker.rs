//! Bounded background task pool
//!
//! Fire-and-forget work (e.g. annotating the knowledge store after a
//! pre-action check) is spawned here so the response can be written first.
//! Concurrency is limited by a semaphore; tasks are tracked in a `JoinSet`
//! and drained with a timeout before the process exits. Task errors and
//! panics are logged and never propagate.

use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Tracks bounded background tasks for eventual draining
pub struct BackgroundPool {
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
}

impl BackgroundPool {
    /// Pool running at most `max_concurrent` tasks at a time
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a tracked task. Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending = PendingGuard(Arc::clone(&self.pending));

        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.spawn(async move {
            // The semaphore is never closed, so acquire only fails on shutdown.
            let _pending = pending;
            let _permit = permits.acquire_owned().await.ok();
            if let Err(e) = future.await {
                tracing::debug!(task = name, error = %e, "Background task failed");
            }
        });
    }

    /// Wait for every tracked task
    pub async fn drain_all(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background task panicked");
            }
        }
    }

    /// Wait for every tracked task, giving up after `timeout`.
    ///
    /// Returns `true` if all tasks completed. Unfinished tasks are aborted
    /// when their `JoinSet` is dropped.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        let finished = tokio::time::timeout(timeout, self.drain_all()).await.is_ok();
        if !finished {
            tracing::debug!(pending = self.pending_count(), "Background drain timed out");
        }
        finished
    }

    /// Approximate number of tasks not yet finished
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Decrements the pending count when the task finishes, panics or is aborted
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for BackgroundPool {
    fn default() -> Self {
        Self::new(4)
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("pending_count", &self.pending_count())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
