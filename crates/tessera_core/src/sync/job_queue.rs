//! # Job Queue
//!
//! Fixed pool of worker threads pulling closures from one FIFO.
//!
//! ```text
//!   submit() ──┐
//!   submit() ──┼──> [Mutex<VecDeque<Job>>] ──> worker 0..N ──> JobHandle
//!   submit() ──┘        + Condvar                (catch_unwind)
//! ```
//!
//! Two ways down:
//! - [`JobQueue::stop`] runs everything already queued, then joins.
//! - [`JobQueue::abort`] discards queued jobs, then joins.
//!
//! Either way no job runs after the call returns.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::SystemConfig;

/// Why a job produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The queue was stopped or aborted and accepts no new work.
    #[error("job queue is shutting down")]
    ShuttingDown,
    /// The job was discarded by [`JobQueue::abort`] before it ran.
    #[error("job was aborted before it ran")]
    Aborted,
    /// The job panicked.
    #[error("job panicked: {0}")]
    Panicked(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a job's result lands.
struct ResultSlot<T> {
    result: Mutex<Option<Result<T, JobError>>>,
    ready: Condvar,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn set(&self, result: Result<T, JobError>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }
}

/// Fills the slot exactly once. Dropped unused, it reports the job aborted.
struct Completion<T> {
    slot: Option<Arc<ResultSlot<T>>>,
}

impl<T> Completion<T> {
    fn complete(mut self, result: Result<T, JobError>) {
        if let Some(slot) = self.slot.take() {
            slot.set(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.set(Err(JobError::Aborted));
        }
    }
}

/// Handle to the eventual result of a submitted job.
pub struct JobHandle<T> {
    slot: Arc<ResultSlot<T>>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job has finished and returns its value.
    ///
    /// # Errors
    ///
    /// [`JobError::Panicked`] if the job panicked, [`JobError::Aborted`] if
    /// it was discarded.
    pub fn wait(self) -> Result<T, JobError> {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            self.slot.ready.wait(&mut result);
        }
    }

    /// Waits up to `timeout`. Returns true if the result is ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut result = self.slot.result.lock();
        while result.is_none() {
            if self.slot.ready.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        result.is_some()
    }

    /// Returns true if the result is ready.
    pub fn is_done(&self) -> bool {
        self.slot.result.lock().is_some()
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

struct State {
    jobs: VecDeque<Job>,
    /// Workers leave once the queue is empty.
    exiting: bool,
    accepting: bool,
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
}

/// Worker-thread pool with a shared FIFO of jobs.
///
/// # Example
///
/// ```rust
/// use tessera_core::JobQueue;
///
/// let queue = JobQueue::new(2);
/// let handle = queue.submit(|| 6 * 7).unwrap();
/// assert_eq!(handle.wait(), Ok(42));
/// ```
pub struct JobQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    threads: usize,
}

impl JobQueue {
    /// Starts a pool of `threads` workers. 0 means one per core plus one.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get) + 1
        } else {
            threads
        };

        let mut queue = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    jobs: VecDeque::new(),
                    exiting: false,
                    accepting: true,
                }),
                work: Condvar::new(),
            }),
            workers: Vec::with_capacity(threads),
            threads,
        };
        queue.spawn_workers();
        queue
    }

    /// Starts a pool sized by [`SystemConfig::job_workers`].
    #[must_use]
    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(config.job_workers)
    }

    fn spawn_workers(&mut self) {
        for index in 0..self.threads {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("tessera-worker-{index}"))
                .spawn(move || Self::worker_loop(&shared));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(error) => tracing::warn!(index, %error, "failed to spawn job worker"),
            }
        }
        tracing::debug!(workers = self.workers.len(), "job queue started");
    }

    fn worker_loop(shared: &Shared) {
        loop {
            let job = {
                let mut state = shared.state.lock();
                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        break job;
                    }
                    if state.exiting {
                        return;
                    }
                    shared.work.wait(&mut state);
                }
            };
            job();
        }
    }

    /// Queues a job and returns a handle to its result.
    ///
    /// A panic inside the job is caught and reported through the handle;
    /// the worker keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::ShuttingDown`] after [`stop`](Self::stop) or
    /// [`abort`](Self::abort) until [`start`](Self::start) is called.
    pub fn submit<F, T>(&self, job: F) -> Result<JobHandle<T>, JobError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(ResultSlot::new());
        let completion = Completion {
            slot: Some(Arc::clone(&slot)),
        };
        let boxed: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            completion.complete(result);
        });

        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return Err(JobError::ShuttingDown);
            }
            state.jobs.push_back(boxed);
        }
        self.shared.work.notify_one();

        Ok(JobHandle { slot })
    }

    /// Runs every queued job, then joins all workers.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            state.exiting = true;
        }
        self.join();
    }

    /// Discards queued jobs, lets running ones finish, then joins all
    /// workers. Handles of discarded jobs resolve to [`JobError::Aborted`].
    pub fn abort(&mut self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            state.exiting = true;
            std::mem::take(&mut state.jobs)
        };
        if !discarded.is_empty() {
            tracing::debug!(discarded = discarded.len(), "job queue aborted");
        }
        // Resolve the handles outside the lock.
        drop(discarded);
        self.join();
    }

    fn join(&mut self) {
        self.shared.work.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("job worker terminated abnormally");
            }
        }
        tracing::debug!("job queue stopped");
    }

    /// Restarts the workers after [`stop`](Self::stop) or [`abort`](Self::abort).
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            state.exiting = false;
            state.accepting = true;
        }
        self.spawn_workers();
    }

    /// Blocks until every queued job has run. The queue keeps accepting
    /// work afterwards.
    pub fn wait(&mut self) {
        self.stop();
        self.start();
    }

    /// Number of jobs waiting for a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Number of worker threads when running.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Returns true while workers are alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("threads", &self.threads)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_submit_returns_value() {
        let queue = JobQueue::new(2);
        let handles: Vec<_> = (0..10).map(|i| queue.submit(move || i * 2).unwrap()).collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_is_reported_and_worker_survives() {
        let queue = JobQueue::new(1);
        let bad = queue.submit(|| -> u32 { panic!("boom") }).unwrap();
        assert_eq!(bad.wait(), Err(JobError::Panicked("boom".to_string())));

        let good = queue.submit(|| 7).unwrap();
        assert_eq!(good.wait(), Ok(7));
    }

    #[test]
    fn test_stop_drains_queue() {
        let mut queue = JobQueue::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                queue
                    .submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        queue.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert!(handles.iter().all(JobHandle::is_done));
        assert_eq!(queue.submit(|| ()).unwrap_err(), JobError::ShuttingDown);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut queue = JobQueue::new(2);
        queue.stop();
        assert!(!queue.is_running());

        queue.start();
        assert!(queue.is_running());
        assert_eq!(queue.submit(|| "again").unwrap().wait(), Ok("again"));
    }

    #[test]
    fn test_wait_timeout() {
        let queue = JobQueue::new(1);
        let slow = queue
            .submit(|| thread::sleep(Duration::from_millis(200)))
            .unwrap();
        assert!(!slow.wait_timeout(Duration::from_millis(1)));
        assert!(slow.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_threads_picks_default() {
        let queue = JobQueue::new(0);
        assert!(queue.threads() >= 2);
        assert_eq!(JobQueue::from_config(&SystemConfig { job_workers: 3, ..SystemConfig::default() }).threads(), 3);
    }
}
