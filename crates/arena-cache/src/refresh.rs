//! Background refresh of stale entries.
//!
//! Readers that hit a stale entry return it immediately and hand a
//! [`RefreshTask`] to the [`RefreshScheduler`]. A fixed pool of workers pulls
//! tasks from a bounded queue; when the queue is full the task is rejected
//! (and its lock released) rather than spawning unbounded work.
//!
//! Each task runs under the recompute lock of its target key, with a timeout
//! bounded by the lock's remaining lease and with panic isolation. Only a
//! successful refresh releases the lock. A failed, panicked or timed-out one
//! keeps it until the lease runs out, so the stale entry is served without
//! retries for one lease and at most one refresh per key is ever in flight.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::CacheError;
use crate::lock::{DynLock, LockHandle, lock_key};
use crate::metrics::{self, RefreshEvent};

/// Worker pool and queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub pool_size: usize,
    pub queue_capacity: usize,
    /// Lease of a lock the worker takes itself
    pub lease: Duration,
    pub timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 256,
            lease: Duration::from_secs(15),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Recompute job run by a refresh worker.
pub type RefreshJob = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CacheError>> + Send>;

/// Boxes an async closure into a [`RefreshJob`].
pub fn refresh_job<F, Fut>(f: F) -> RefreshJob
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CacheError>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// A scheduled refresh of one cache key.
pub struct RefreshTask {
    target_key: String,
    lock: Option<LockHandle>,
    job: RefreshJob,
    scheduled_at: Instant,
}

impl RefreshTask {
    pub fn new(target_key: impl Into<String>, job: RefreshJob) -> Self {
        Self {
            target_key: target_key.into(),
            lock: None,
            job,
            scheduled_at: Instant::now(),
        }
    }

    /// Hands an already-held recompute lock to the worker.
    pub fn with_lock(mut self, handle: LockHandle) -> Self {
        self.lock = Some(handle);
        self
    }

    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    pub fn scheduled_at(&self) -> Instant {
        self.scheduled_at
    }
}

impl std::fmt::Debug for RefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTask")
            .field("target_key", &self.target_key)
            .field("lock", &self.lock)
            .field("scheduled_at", &self.scheduled_at)
            .finish_non_exhaustive()
    }
}

/// Bounded pool running [`RefreshTask`]s.
pub struct RefreshScheduler {
    sender: RwLock<Option<mpsc::Sender<RefreshTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    lock: DynLock,
    settings: RefreshSettings,
}

impl RefreshScheduler {
    /// Spawns the worker pool. Must be called from within a tokio runtime.
    pub fn start(lock: DynLock, settings: RefreshSettings) -> Arc<Self> {
        let pool_size = settings.pool_size.max(1);
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..pool_size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let lock = Arc::clone(&lock);
                tokio::spawn(worker_loop(worker, rx, lock, settings))
            })
            .collect();

        debug!(
            pool_size,
            queue_capacity = settings.queue_capacity,
            "refresh scheduler started"
        );

        Arc::new(Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            lock,
            settings,
        })
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    /// Tasks waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Queues `task` without waiting.
    ///
    /// # Errors
    ///
    /// [`CacheError::RefreshRejected`] when the queue is full and
    /// [`CacheError::SchedulerClosed`] after [`RefreshScheduler::shutdown`].
    /// In both cases a lock carried by the task is released in the background.
    pub fn submit(&self, task: RefreshTask) -> Result<(), CacheError> {
        let sender = self.sender.read().clone();
        let Some(sender) = sender else {
            self.release_carried(task);
            return Err(CacheError::SchedulerClosed);
        };

        match sender.try_send(task) {
            Ok(()) => {
                metrics::record_refresh(RefreshEvent::Submitted);
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                metrics::record_refresh(RefreshEvent::Rejected);
                debug!(key = %task.target_key, "refresh queue full, dropping refresh");
                let key = task.target_key.clone();
                self.release_carried(task);
                Err(CacheError::RefreshRejected { key })
            }
            Err(TrySendError::Closed(task)) => {
                self.release_carried(task);
                Err(CacheError::SchedulerClosed)
            }
        }
    }

    /// Queues `job` for `target_key`; the worker takes the lock itself.
    pub fn submit_refresh(
        &self,
        target_key: impl Into<String>,
        job: RefreshJob,
    ) -> Result<(), CacheError> {
        self.submit(RefreshTask::new(target_key, job))
    }

    /// Stops accepting tasks, lets the workers drain the queue and waits for them.
    pub async fn shutdown(&self) {
        drop(self.sender.write().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "refresh worker ended abnormally");
            }
        }
        debug!("refresh scheduler stopped");
    }

    // detached: submit never waits on the lock service
    fn release_carried(&self, task: RefreshTask) {
        if let Some(handle) = task.lock {
            let lock = Arc::clone(&self.lock);
            tokio::spawn(async move { release(&lock, &handle).await });
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RefreshTask>>>,
    lock: DynLock,
    settings: RefreshSettings,
) {
    loop {
        let task = rx.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };
        run_task(task, &lock, &settings).await;
    }
    debug!(worker, "refresh worker exiting");
}

async fn run_task(task: RefreshTask, lock: &DynLock, settings: &RefreshSettings) {
    let RefreshTask {
        target_key,
        lock: carried,
        job,
        scheduled_at,
    } = task;

    let handle = match carried {
        Some(handle) if handle.remaining_lease() >= settings.timeout => handle,
        carried => {
            // too little lease left to cover a full run; start over on a fresh one
            if let Some(stale) = carried {
                release(lock, &stale).await;
            }
            match lock.try_acquire(&lock_key(&target_key), settings.lease).await {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    metrics::record_refresh(RefreshEvent::Skipped);
                    debug!(key = %target_key, "refresh already in progress elsewhere");
                    return;
                }
                Err(e) => {
                    metrics::record_refresh(RefreshEvent::Skipped);
                    warn!(key = %target_key, error = %e, "refresh skipped, lock service unavailable");
                    return;
                }
            }
        }
    };

    let queued_ms = scheduled_at.elapsed().as_millis() as u64;
    let budget = settings.timeout.min(handle.remaining_lease());
    let result = tokio::time::timeout(budget, async move {
        AssertUnwindSafe(async move { job().await })
            .catch_unwind()
            .await
    })
    .await;

    match result {
        Ok(Ok(Ok(()))) => {
            metrics::record_refresh(RefreshEvent::Completed);
            debug!(key = %target_key, queued_ms, "refresh completed");
            release(lock, &handle).await;
            return;
        }
        Ok(Ok(Err(e))) => {
            metrics::record_refresh(RefreshEvent::Failed);
            warn!(key = %target_key, error = %e, "refresh failed");
        }
        Ok(Err(panic)) => {
            metrics::record_refresh(RefreshEvent::Failed);
            let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(key = %target_key, panic = %panic_msg, "refresh panicked");
        }
        Err(_) => {
            metrics::record_refresh(RefreshEvent::Failed);
            error!(
                key = %target_key,
                timeout_ms = budget.as_millis() as u64,
                "refresh timed out"
            );
        }
    }

    // the held lease throttles retries of a failing key to one per lease
    debug!(
        key = %target_key,
        retry_after_ms = handle.remaining_lease().as_millis() as u64,
        "refresh lock kept until lease expiry"
    );
}

async fn release(lock: &DynLock, handle: &LockHandle) {
    if let Err(e) = lock.release(handle).await {
        warn!(key = %handle.key(), error = %e, "failed to release refresh lock");
    }
}
