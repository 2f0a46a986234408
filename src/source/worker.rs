//! Per-source pull worker.
//!
//! Each worker owns an OS thread that blocks on a binary semaphore with a
//! bounded timeout. The scheduler tick calls [`WorkerThread::process`], which
//! counts down the source's interval and releases the semaphore when a pull
//! is due.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::semaphore::Semaphore;
use super::traits::{Ingest, PullSource, SchedulerError, clamp_interval};

// =============================================================================
// Constants
// =============================================================================

/// Maximum time a worker blocks before re-checking its running flag.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Ticks above which an immediate update request forces a pull.
pub const DEFAULT_IMMEDIATE_THRESHOLD: u32 = 120;

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct WorkerShared {
    running: AtomicBool,
    stopped: AtomicBool,
    semaphore: Semaphore,
    pulls: AtomicU64,
}

/// Marks the worker stopped when its thread exits, including by panic.
struct ExitGuard(Arc<WorkerShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.stopped.store(true, Ordering::Release);
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Drives one [`PullSource`] on its own thread.
pub struct WorkerThread {
    name: String,
    source: Arc<dyn PullSource>,
    shared: Arc<WorkerShared>,
    interval: u32,
    countdown: u32,
    immediate_threshold: u32,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Create a worker for `source`. The thread is not started.
    pub fn new(source: Arc<dyn PullSource>) -> Self {
        let name = source.header().name.clone();
        let interval = clamp_interval(&name, source.pull_interval());
        Self {
            name,
            source,
            shared: Arc::new(WorkerShared {
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                semaphore: Semaphore::binary(),
                pulls: AtomicU64::new(0),
            }),
            interval,
            countdown: 0,
            immediate_threshold: DEFAULT_IMMEDIATE_THRESHOLD,
            handle: None,
        }
    }

    /// Override the immediate-update staleness threshold.
    pub fn with_immediate_threshold(mut self, ticks: u32) -> Self {
        self.immediate_threshold = ticks;
        self
    }

    /// Spawn the worker thread. A second call is a no-op.
    ///
    /// # Errors
    /// Returns `SchedulerError::Spawn` if the thread cannot be created.
    pub fn start(&mut self, ingest: Arc<dyn Ingest>) -> Result<(), SchedulerError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);

        let name = self.name.clone();
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("pull-{}", self.name))
            .spawn(move || run(name, source, shared, ingest))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                SchedulerError::Spawn {
                    source_name: self.name.clone(),
                    source: e,
                }
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Advance the countdown by one tick.
    ///
    /// Releases the worker when the countdown expires. With `immediate` set,
    /// also releases it if the countdown entering this tick is above the
    /// staleness threshold. Returns `true` when the worker was signaled.
    pub fn process(&mut self, immediate: bool) -> bool {
        let stale = immediate && self.countdown > self.immediate_threshold;
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 || stale {
            self.shared.semaphore.signal();
            self.countdown = self.interval;
            true
        } else {
            false
        }
    }

    /// Request the worker to exit and wake it.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.semaphore.signal();
    }

    /// Returns `true` once the worker thread has left its loop.
    ///
    /// A worker that was never started counts as stopped.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_none() || self.shared.stopped.load(Ordering::Acquire)
    }

    /// Join the thread if it has stopped. Returns `false` if still running.
    pub(crate) fn join(&mut self) -> bool {
        if !self.is_stopped() {
            return false;
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!(source = %self.name, "Pull worker panicked");
        }
        true
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull interval in ticks after clamping.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Ticks remaining until the next scheduled pull.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Number of `pull` calls made so far.
    pub fn pull_count(&self) -> u64 {
        self.shared.pulls.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("countdown", &self.countdown)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

fn run(
    name: String,
    source: Arc<dyn PullSource>,
    shared: Arc<WorkerShared>,
    ingest: Arc<dyn Ingest>,
) {
    let _exit = ExitGuard(Arc::clone(&shared));
    tracing::debug!(source = %name, "Pull worker started");

    while shared.running.load(Ordering::Acquire) {
        if shared.semaphore.wait(WAIT_TIMEOUT) && shared.running.load(Ordering::Acquire) {
            shared.pulls.fetch_add(1, Ordering::Relaxed);
            if let Some(data) = source.pull() {
                if !data.is_empty() {
                    ingest.ingest(&data);
                }
                source.complete(Some(data));
            }
        }
    }

    source.complete(None);
    tracing::debug!(source = %name, "Pull worker exited");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::{MonitorData, SourceHeader};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    pub(crate) struct CountingSource {
        header: SourceHeader,
        interval: u32,
        pub pulls: AtomicUsize,
        pub completed: Mutex<Vec<Option<MonitorData>>>,
    }

    impl CountingSource {
        pub(crate) fn new(name: &str, interval: u32) -> Self {
            Self {
                header: SourceHeader::new(1, 1024, name, "counting source"),
                interval,
                pulls: AtomicUsize::new(0),
                completed: Mutex::new(Vec::new()),
            }
        }
    }

    impl PullSource for CountingSource {
        fn header(&self) -> &SourceHeader {
            &self.header
        }

        fn pull_interval(&self) -> u32 {
            self.interval
        }

        fn pull(&self) -> Option<MonitorData> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst);
            Some(MonitorData::new(0, self.header.source_id, format!("sample-{n}")))
        }

        fn complete(&self, data: Option<MonitorData>) {
            self.completed.lock().push(data);
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingIngest {
        pub records: Mutex<Vec<MonitorData>>,
    }

    impl Ingest for RecordingIngest {
        fn ingest(&self, data: &MonitorData) -> bool {
            self.records.lock().push(data.clone());
            true
        }
    }

    pub(crate) fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_process_signals_every_interval() {
        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("cpu", 2)));
        let signals: Vec<bool> = (0..6).map(|_| worker.process(false)).collect();
        assert_eq!(signals, vec![true, false, true, false, true, false]);
    }

    #[test]
    fn test_process_interval_one_signals_every_tick() {
        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("cpu", 1)));
        assert!((0..4).all(|_| worker.process(false)));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let worker = WorkerThread::new(Arc::new(CountingSource::new("cpu", 0)));
        assert_eq!(worker.interval(), 1);
    }

    #[test]
    fn test_immediate_ignored_for_short_interval() {
        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("cpu", 5)));
        assert!(worker.process(false));
        assert!(!worker.process(true));
        assert_eq!(worker.countdown(), 4);
    }

    #[test]
    fn test_immediate_forces_long_interval_source() {
        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("env", 300)));
        assert!(worker.process(false));
        assert!(!worker.process(false));
        assert!(worker.process(true));
        assert_eq!(worker.countdown(), 300);
    }

    #[test]
    fn test_immediate_threshold_checked_before_tick() {
        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("env", 300)));
        assert!(worker.process(false));
        for _ in 0..179 {
            assert!(!worker.process(false));
        }
        assert_eq!(worker.countdown(), 121);
        assert!(worker.process(true));

        let mut worker = WorkerThread::new(Arc::new(CountingSource::new("env", 300)));
        assert!(worker.process(false));
        for _ in 0..180 {
            assert!(!worker.process(false));
        }
        assert_eq!(worker.countdown(), 120);
        assert!(!worker.process(true));
        assert_eq!(worker.countdown(), 119);
    }

    #[test]
    fn test_immediate_threshold_override() {
        let mut worker =
            WorkerThread::new(Arc::new(CountingSource::new("cpu", 5))).with_immediate_threshold(2);
        assert!(worker.process(false));
        assert!(worker.process(true));
    }

    #[test]
    fn test_worker_pulls_and_ingests() {
        let source = Arc::new(CountingSource::new("cpu", 2));
        let ingest = Arc::new(RecordingIngest::default());
        let mut worker = WorkerThread::new(source.clone());
        worker.start(ingest.clone()).unwrap();

        assert!(worker.process(false));
        assert!(wait_for(|| ingest.records.lock().len() == 1));
        assert!(!worker.process(false));
        assert!(worker.process(false));
        assert!(wait_for(|| ingest.records.lock().len() == 2));
        assert_eq!(source.pulls.load(Ordering::SeqCst), 2);
        assert_eq!(worker.pull_count(), 2);

        worker.stop();
        assert!(wait_for(|| worker.is_stopped()));
        assert!(worker.join());

        let completed = source.completed.lock();
        assert_eq!(completed.len(), 3);
        assert!(completed[0].is_some());
        assert!(completed[2].is_none());
    }

    #[test]
    fn test_stop_without_signal_exits_promptly() {
        let source = Arc::new(CountingSource::new("cpu", 10));
        let mut worker = WorkerThread::new(source.clone());
        worker.start(Arc::new(RecordingIngest::default())).unwrap();

        let start = Instant::now();
        worker.stop();
        assert!(wait_for(|| worker.is_stopped()));
        assert!(start.elapsed() < WAIT_TIMEOUT);
        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
        assert_eq!(source.completed.lock().as_slice(), &[None]);
    }

    #[test]
    fn test_unstarted_worker_is_stopped() {
        let worker = WorkerThread::new(Arc::new(CountingSource::new("cpu", 1)));
        assert!(worker.is_stopped());
    }
}
