//! Bucket Layer
//!
//! Bounded per-source buffers with spill, an incremental publish cursor, and
//! range reads for consumers that track their own position.
//!
//! # Architecture
//!
//! - [`DataBucket`]: One provider/source feed, guarded by its own lock
//! - [`BucketContents`]: The locked entry store (spill, cursor, range reads)
//! - [`PersistentHistory`]: Read-only view of persistent entries handed to sinks
//!   while a publish holds the bucket lock
//! - [`BucketRegistry`]: All buckets, routing ingested data and fanning
//!   publish/republish across them
//!
//! # Example
//!
//! ```rust
//! use oculus_agent::bucket::{BucketSink, DataBucket, PersistentHistory};
//! use oculus_agent::connector::FanOutReport;
//! use oculus_agent::source::MonitorData;
//!
//! struct Print;
//! impl BucketSink for Print {
//!     fn send(&self, topic: &str, data: &[u8], _history: &PersistentHistory<'_>) -> FanOutReport {
//!         println!("{topic}: {} bytes", data.len());
//!         FanOutReport::delivered(1)
//!     }
//! }
//!
//! let bucket = DataBucket::new(0, 1, 100, "cpu");
//! bucket.add(&MonitorData::new(0, 1, vec![0u8; 40])).unwrap();
//! let summary = bucket.publish(&Print);
//! assert_eq!(summary.entries, 1);
//! ```

mod contents;
mod data_bucket;
mod error;
mod registry;

pub use contents::{BucketContents, NextData, PersistentHistory};
pub use data_bucket::{
    BucketSink, BucketStats, DEFAULT_PUBLISH_SIZE_LIMIT, DataBucket, PublishSummary,
};
pub use error::BucketError;
pub use registry::BucketRegistry;
