//! Background worker pool with bounded concurrency and a FIFO queue.
//!
//! The projects list needs its persistence jobs to run off the interactive
//! thread, one at a time, in the order they were requested. Each project
//! needs the same for its actions. [`WorkerPool`] provides both.
//!
//! # Architecture
//!
//! ```text
//!  start(job) ──► queue (VecDeque, unbounded) ──► dispatcher task
//!                                                   │ acquire permit (Semaphore)
//!                                                   ▼
//!                                             spawn_blocking(job)
//!                                                   │ release permit
//!                                                   ▼
//!                                             JobHandle resolves
//! ```
//!
//! The dispatcher takes a semaphore permit *before* popping the next job, so
//! with a single permit no two jobs ever overlap and jobs run strictly in
//! submission order. Queued jobs never expire; they wait as long as needed.
//!
//! # Example
//!
//! ```no_run
//! use stm32pio_gui::pool::WorkerPool;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::single(&tokio::runtime::Handle::current(), "settings");
//!     let first = pool.start(|| println!("first"));
//!     let second = pool.start(|| println!("second"));
//!     assert!(first.wait().await);
//!     assert!(second.wait().await);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify, Semaphore};
use tracing::{debug, error, trace};

use crate::utils::locks::lock;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    id: u64,
    job: Job,
    done: oneshot::Sender<bool>,
}

struct PoolShared {
    /// Pool name used in diagnostics.
    name: String,
    /// Jobs waiting for a worker.
    queue: Mutex<VecDeque<QueuedJob>>,
    /// Signalled on every push and on shutdown.
    available: Notify,
    /// Set when the owning [`WorkerPool`] is dropped.
    closed: AtomicBool,
    /// Number of jobs queued or running.
    pending: watch::Sender<usize>,
    next_id: AtomicU64,
}

/// Executes deferred callables on blocking threads, at most `max_workers`
/// at a time.
///
/// Dropping the pool does not cancel anything: the dispatcher keeps draining
/// the queue and exits once it is empty.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    max_workers: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("max_workers", &self.max_workers)
            .field("pending", &self.pending())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool whose dispatcher runs on `handle`.
    ///
    /// A `max_workers` of zero is treated as one.
    #[must_use]
    pub fn new(handle: &Handle, name: impl Into<String>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (pending, _) = watch::channel(0);
        let shared = Arc::new(PoolShared {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            pending,
            next_id: AtomicU64::new(1),
        });

        let permits = Arc::new(Semaphore::new(max_workers));
        handle.spawn(run_dispatch_loop(Arc::clone(&shared), permits));

        Self {
            shared,
            max_workers,
        }
    }

    /// Creates a pool that runs one job at a time.
    #[must_use]
    pub fn single(handle: &Handle, name: impl Into<String>) -> Self {
        Self::new(handle, name, 1)
    }

    /// Maximum number of jobs that may run concurrently.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Queues `job` behind everything submitted before it.
    pub fn start<F>(&self, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, done_rx) = oneshot::channel();

        self.shared.pending.send_modify(|count| *count += 1);
        lock(&self.shared.queue).push_back(QueuedJob {
            id,
            job: Box::new(job),
            done,
        });
        self.shared.available.notify_one();
        trace!(pool = %self.shared.name, job = id, "Queued job");

        JobHandle { id, done: done_rx }
    }

    /// Drops every job that has not started yet and returns how many were
    /// dropped. Running jobs are unaffected.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *lock(&self.shared.queue));
        let count = dropped.len();
        if count > 0 {
            self.shared
                .pending
                .send_modify(|pending| *pending = pending.saturating_sub(count));
            debug!(pool = %self.shared.name, count, "Cleared queued jobs");
        }
        // Dropping the senders resolves the cleared handles with `false`.
        drop(dropped);
        count
    }

    /// Number of jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.shared.pending.borrow()
    }

    /// Waits until every queued and running job has finished.
    pub async fn wait_for_done(&self) {
        let mut pending = self.shared.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.available.notify_one();
    }
}

/// Completion handle of one queued job.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    done: oneshot::Receiver<bool>,
}

impl JobHandle {
    /// Pool-unique job number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the job. Returns `false` if it panicked or was cleared from
    /// the queue before it started.
    pub async fn wait(self) -> bool {
        self.done.await.unwrap_or(false)
    }

    /// Blocking version of [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_wait(self) -> bool {
        self.done.blocking_recv().unwrap_or(false)
    }
}

async fn run_dispatch_loop(shared: Arc<PoolShared>, permits: Arc<Semaphore>) {
    debug!(pool = %shared.name, "Starting worker pool dispatcher");

    loop {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let next = loop {
            let popped = lock(&shared.queue).pop_front();
            if popped.is_some() {
                break popped;
            }
            if shared.closed.load(Ordering::Acquire) {
                break None;
            }
            shared.available.notified().await;
        };

        let Some(QueuedJob { id, job, done }) = next else {
            break;
        };

        let job_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            trace!(pool = %job_shared.name, job = id, "Running job");
            let completed = match tokio::task::spawn_blocking(job).await {
                Ok(()) => true,
                Err(e) => {
                    error!(pool = %job_shared.name, job = id, error = %e, "Worker job panicked");
                    false
                }
            };
            drop(permit);
            job_shared
                .pending
                .send_modify(|count| *count = count.saturating_sub(1));
            let _ = done.send(completed);
        });
    }

    debug!(pool = %shared.name, "Worker pool dispatcher terminated");
}
