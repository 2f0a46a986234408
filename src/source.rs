//! Source Layer
//!
//! Data record contract, source capabilities, and the pull scheduler that
//! drives polled sources on independent countdown timers.
//!
//! # Architecture
//!
//! - [`MonitorData`]: The record every source hands to the agent
//! - [`PullSource`] / [`PushSource`]: Capabilities exposed by plugins
//! - [`WorkerThread`]: One OS thread per pull source, gated by a [`Semaphore`]
//! - [`ThreadPool`]: Owns the workers and fans the per-tick `process` call out
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oculus_agent::source::{Ingest, MonitorData, ThreadPool};
//!
//! struct Discard;
//! impl Ingest for Discard {
//!     fn ingest(&self, _data: &MonitorData) -> bool {
//!         true
//!     }
//! }
//!
//! let mut pool = ThreadPool::new(Arc::new(Discard));
//! // pool.add_pull_source(source);
//! pool.start_all().expect("spawn workers");
//! pool.process(false);
//! pool.stop_all();
//! ```

mod pool;
mod semaphore;
mod traits;
mod worker;

pub use pool::{DEFAULT_STOP_POLL, DEFAULT_STOP_TIMEOUT, ThreadPool};
pub use semaphore::Semaphore;
pub use traits::{
    Ingest, MonitorData, PullSource, PushSource, SchedulerError, SourceHeader, clamp_interval,
};
pub use worker::{DEFAULT_IMMEDIATE_THRESHOLD, WAIT_TIMEOUT, WorkerThread};
