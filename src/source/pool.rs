//! Pull scheduler managing one worker per pull source.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::traits::{Ingest, PullSource, SchedulerError};
use super::worker::{DEFAULT_IMMEDIATE_THRESHOLD, WorkerThread};

/// Default time to wait for workers during shutdown (5 seconds).
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between stopped-checks during shutdown.
pub const DEFAULT_STOP_POLL: Duration = Duration::from_millis(100);

/// Owns the pull workers and fans the scheduler tick out to them.
///
/// Workers that do not stop within the timeout are detached rather than
/// destroyed, so a source stuck inside `pull` never has its thread torn down
/// mid-call.
pub struct ThreadPool {
    ingest: Arc<dyn Ingest>,
    workers: Vec<WorkerThread>,
    stopping: bool,
    immediate_threshold: u32,
    stop_timeout: Duration,
    stop_poll: Duration,
}

impl ThreadPool {
    /// Create an empty pool forwarding pulled data to `ingest`.
    pub fn new(ingest: Arc<dyn Ingest>) -> Self {
        Self {
            ingest,
            workers: Vec::new(),
            stopping: false,
            immediate_threshold: DEFAULT_IMMEDIATE_THRESHOLD,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            stop_poll: DEFAULT_STOP_POLL,
        }
    }

    /// Set the immediate-update staleness threshold for workers added later.
    pub fn with_immediate_threshold(mut self, ticks: u32) -> Self {
        self.immediate_threshold = ticks;
        self
    }

    /// Set the shutdown wait bound and polling delay.
    pub fn with_stop_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.stop_timeout = timeout;
        self.stop_poll = poll.max(Duration::from_millis(1));
        self
    }

    /// Register a pull source. Ignored once the pool is stopping.
    pub fn add_pull_source(&mut self, source: Arc<dyn PullSource>) {
        if self.stopping {
            tracing::debug!(source = %source.header().name, "Pool stopping, pull source ignored");
            return;
        }
        let worker = WorkerThread::new(source).with_immediate_threshold(self.immediate_threshold);
        tracing::debug!(source = %worker.name(), interval = worker.interval(), "Pull source added");
        self.workers.push(worker);
    }

    /// Spawn every worker thread.
    ///
    /// # Errors
    /// Returns the first `SchedulerError::Spawn`; workers started before the
    /// failure keep running until [`ThreadPool::stop_all`].
    pub fn start_all(&mut self) -> Result<(), SchedulerError> {
        for worker in &mut self.workers {
            worker.start(Arc::clone(&self.ingest))?;
        }
        tracing::info!(workers = self.workers.len(), "Pull scheduler started");
        Ok(())
    }

    /// Tick every worker once.
    pub fn process(&mut self, immediate: bool) {
        if self.stopping {
            return;
        }
        let signaled = self
            .workers
            .iter_mut()
            .map(|w| w.process(immediate))
            .filter(|&s| s)
            .count();
        if signaled > 0 {
            tracing::trace!(signaled, immediate, "Pull workers released");
        }
    }

    /// Stop every worker and wait for them within the stop timeout.
    ///
    /// Returns the number of workers abandoned because they did not stop.
    pub fn stop_all(&mut self) -> usize {
        self.stopping = true;
        for worker in &self.workers {
            worker.stop();
        }

        let deadline = Instant::now() + self.stop_timeout;
        while !self.workers.iter().all(WorkerThread::is_stopped) && Instant::now() < deadline {
            thread::sleep(self.stop_poll);
        }

        let mut abandoned = 0;
        for mut worker in self.workers.drain(..) {
            if !worker.join() {
                tracing::warn!(source = %worker.name(), "Pull worker did not stop, detaching");
                abandoned += 1;
            }
        }
        tracing::info!(abandoned, "Pull scheduler stopped");
        abandoned
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns `true` once [`ThreadPool::stop_all`] has been called.
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Worker views in registration order.
    pub fn workers(&self) -> &[WorkerThread] {
        &self.workers
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("stopping", &self.stopping)
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Wake any remaining workers; they exit on their own
        for worker in &self.workers {
            worker.stop();
        }
    }
}
