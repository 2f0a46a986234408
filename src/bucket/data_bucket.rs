//! Bounded per-source data bucket.

use parking_lot::Mutex;

use crate::connector::{FanOutReport, SinkFailure};
use crate::source::MonitorData;

use super::contents::{BucketContents, Entry, NextData, PersistentHistory};
use super::error::BucketError;

/// Default cap on a single publish transmission (1 MiB).
pub const DEFAULT_PUBLISH_SIZE_LIMIT: u32 = 1024 * 1024;

/// Destination for published batches.
pub trait BucketSink {
    /// Deliver one batch on `topic` and report each connector's outcome.
    ///
    /// Called with the bucket lock held; `history` exposes the bucket's
    /// published persistent entries. A batch no connector accepted
    /// (`succeeded == 0`) ends the pass and stays unpublished.
    fn send(&self, topic: &str, data: &[u8], history: &PersistentHistory<'_>) -> FanOutReport;
}

/// Outcome of a publish or republish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Batches at least one connector accepted.
    pub batches: usize,
    /// Entries in accepted batches.
    pub entries: usize,
    /// Payload bytes in accepted batches.
    pub bytes: usize,
    /// Successful connector sends, summed over all batches.
    pub deliveries: usize,
    /// Connector failures in send order.
    pub failures: Vec<SinkFailure>,
    /// Entries left for a later pass because no connector accepted them.
    pub deferred: usize,
    /// Publish cursor after the pass.
    pub last_published: u64,
}

impl PublishSummary {
    /// Returns `true` if every batch reached every connector.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty() && self.deferred == 0
    }

    pub(crate) fn merge(&mut self, other: PublishSummary) {
        self.batches += other.batches;
        self.entries += other.entries;
        self.bytes += other.bytes;
        self.deliveries += other.deliveries;
        self.failures.extend(other.failures);
        self.deferred += other.deferred;
        self.last_published = self.last_published.max(other.last_published);
    }

    fn record(&mut self, report: FanOutReport) -> bool {
        self.deliveries += report.succeeded;
        self.failures.extend(report.failures);
        report.succeeded > 0
    }
}

/// Point-in-time counters of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketStats {
    pub entries: usize,
    pub current_size: u64,
    pub persistent_size: u64,
    pub last_published: u64,
    pub master_id: u64,
    pub spilled: u64,
    pub rejected: u64,
}

/// Bounded, ordered store for one provider/source feed.
///
/// Ingestion and publish serialize on the bucket's own lock; different buckets
/// never contend.
pub struct DataBucket {
    provider_id: u32,
    source_id: u32,
    unique_id: String,
    capacity: u32,
    persistent_limit: u32,
    publish_size_limit: u32,
    contents: Mutex<BucketContents>,
}

impl DataBucket {
    /// Create an empty bucket.
    ///
    /// The persistent limit defaults to the capacity.
    pub fn new(provider_id: u32, source_id: u32, capacity: u32, unique_id: impl Into<String>) -> Self {
        Self {
            provider_id,
            source_id,
            unique_id: unique_id.into(),
            capacity,
            persistent_limit: capacity,
            publish_size_limit: DEFAULT_PUBLISH_SIZE_LIMIT,
            contents: Mutex::new(BucketContents::new()),
        }
    }

    /// Cap each publish transmission at `bytes` (minimum 1).
    pub fn with_publish_size_limit(mut self, bytes: u32) -> Self {
        self.publish_size_limit = bytes.max(1);
        self
    }

    /// Cap resident persistent data at `bytes`.
    pub fn with_persistent_limit(mut self, bytes: u32) -> Self {
        self.persistent_limit = bytes;
        self
    }

    /// Store a copy of `data`, spilling published entries if needed.
    ///
    /// Returns the id assigned to the new entry.
    ///
    /// # Errors
    /// Rejects mismatched identity, empty payloads, entries that do not fit,
    /// and persistent entries over the persistent limit. A rejected add has no
    /// effect on the stored entries.
    pub fn add(&self, data: &MonitorData) -> Result<u64, BucketError> {
        if data.provider_id != self.provider_id || data.source_id != self.source_id {
            tracing::warn!(
                bucket = %self.unique_id,
                provider_id = data.provider_id,
                source_id = data.source_id,
                "Data routed to wrong bucket"
            );
            return Err(BucketError::IdentityMismatch {
                unique_id: self.unique_id.clone(),
                provider_id: data.provider_id,
                source_id: data.source_id,
            });
        }
        if data.is_empty() {
            tracing::warn!(bucket = %self.unique_id, "Empty record dropped");
            return Err(BucketError::EmptyPayload);
        }

        let size = data.size();
        let mut contents = self.contents.lock();

        if data.persistent && contents.persistent_size() + u64::from(size) > u64::from(self.persistent_limit) {
            contents.record_rejection();
            tracing::warn!(bucket = %self.unique_id, size, limit = self.persistent_limit,
                "Persistent limit reached in bucket");
            return Err(BucketError::PersistentLimitExceeded {
                unique_id: self.unique_id.clone(),
                size,
                limit: self.persistent_limit,
            });
        }

        if size > self.capacity || !contents.spill(u64::from(size), u64::from(self.capacity)) {
            contents.record_rejection();
            tracing::warn!(bucket = %self.unique_id, size, capacity = self.capacity,
                "No room in bucket");
            return Err(BucketError::CapacityExceeded {
                unique_id: self.unique_id.clone(),
                size,
                capacity: self.capacity,
            });
        }

        let id = contents.push(data.data.clone(), data.persistent);
        tracing::trace!(bucket = %self.unique_id, id, size, persistent = data.persistent, "Entry added");
        Ok(id)
    }

    /// Send every unpublished entry to `sink` and advance the publish cursor.
    ///
    /// Entries are concatenated into batches of at most
    /// `min(current_size, publish_size_limit)` bytes on topic `unique_id`. An
    /// entry larger than the cap is sent on its own. The cursor advances only
    /// past batches some connector accepted, so undelivered entries are never
    /// spilled.
    pub fn publish(&self, sink: &dyn BucketSink) -> PublishSummary {
        let mut contents = self.contents.lock();
        let limit = self.batch_limit(&contents);

        let pass = {
            let history = PersistentHistory::new(&self.unique_id, &contents);
            let batches = plan_batches(contents.unpublished(), limit);
            send_batches(batches, &self.unique_id, sink, &history)
        };

        if let Some(last) = pass.last_id {
            contents.advance_published(last);
        }
        if pass.summary.batches > 0 {
            tracing::debug!(bucket = %self.unique_id, batches = pass.summary.batches,
                entries = pass.summary.entries, bytes = pass.summary.bytes, "Bucket published");
        }
        if pass.summary.deferred > 0 {
            tracing::debug!(bucket = %self.unique_id, deferred = pass.summary.deferred,
                "No connector accepted batch, publish deferred");
        }

        PublishSummary {
            last_published: contents.last_published(),
            ..pass.summary
        }
    }

    /// Resend all published history on `prefix + unique_id`, followed by an
    /// empty end-of-history message.
    pub fn republish(&self, prefix: &str, sink: &dyn BucketSink) -> PublishSummary {
        let contents = self.contents.lock();
        let limit = self.batch_limit(&contents);
        let topic = format!("{prefix}{}", self.unique_id);

        let history = PersistentHistory::new(&self.unique_id, &contents);
        let batches = plan_batches(contents.published(), limit);
        let mut pass = send_batches(batches, &topic, sink, &history);
        pass.summary.record(sink.send(&topic, &[], &history));

        tracing::debug!(bucket = %self.unique_id, topic = %topic,
            entries = pass.summary.entries, "Bucket history republished");

        PublishSummary {
            last_published: contents.last_published(),
            ..pass.summary
        }
    }

    /// Read the entries following `after_id`.
    ///
    /// See [`BucketContents::next_data`].
    pub fn next_data(&self, after_id: u64, max_bytes: u32) -> Option<NextData> {
        self.contents.lock().next_data(after_id, max_bytes)
    }

    /// Run `f` with the bucket locked.
    pub fn with_contents<R>(&self, f: impl FnOnce(&BucketContents) -> R) -> R {
        f(&*self.contents.lock())
    }

    /// Snapshot of the bucket counters.
    pub fn stats(&self) -> BucketStats {
        let contents = self.contents.lock();
        BucketStats {
            entries: contents.len(),
            current_size: contents.current_size(),
            persistent_size: contents.persistent_size(),
            last_published: contents.last_published(),
            master_id: contents.master_id(),
            spilled: contents.spilled(),
            rejected: contents.rejected(),
        }
    }

    pub fn provider_id(&self) -> u32 {
        self.provider_id
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn persistent_limit(&self) -> u32 {
        self.persistent_limit
    }

    /// Returns `true` if the record's identity belongs to this bucket.
    pub fn matches(&self, provider_id: u32, source_id: u32) -> bool {
        self.provider_id == provider_id && self.source_id == source_id
    }

    fn batch_limit(&self, contents: &BucketContents) -> usize {
        let limit = contents.current_size().min(u64::from(self.publish_size_limit));
        usize::try_from(limit).unwrap_or(usize::MAX).max(1)
    }
}

impl std::fmt::Debug for DataBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBucket")
            .field("unique_id", &self.unique_id)
            .field("provider_id", &self.provider_id)
            .field("source_id", &self.source_id)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for DataBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "bucket '{}' [{}:{}] capacity={} used={} entries={} last_published={} spilled={} rejected={}",
            self.unique_id,
            self.provider_id,
            self.source_id,
            self.capacity,
            stats.current_size,
            stats.entries,
            stats.last_published,
            stats.spilled,
            stats.rejected,
        )
    }
}

struct BatchPass {
    summary: PublishSummary,
    last_id: Option<u64>,
}

#[derive(Default)]
struct Batch {
    data: Vec<u8>,
    entries: usize,
    last_id: u64,
}

/// Group entries into batches of at most `limit` bytes. An entry over the
/// limit forms a batch of its own.
fn plan_batches<'a>(entries: impl Iterator<Item = &'a Entry>, limit: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::default();

    for entry in entries {
        if current.entries > 0 && current.data.len() + entry.data.len() > limit {
            batches.push(std::mem::take(&mut current));
        }
        current.data.extend_from_slice(&entry.data);
        current.entries += 1;
        current.last_id = entry.id;
    }

    if current.entries > 0 {
        batches.push(current);
    }
    batches
}

/// Send batches in order, stopping at the first one no connector accepted.
fn send_batches(
    batches: Vec<Batch>,
    topic: &str,
    sink: &dyn BucketSink,
    history: &PersistentHistory<'_>,
) -> BatchPass {
    let mut pass = BatchPass {
        summary: PublishSummary::default(),
        last_id: None,
    };

    let mut batches = batches.into_iter();
    for batch in batches.by_ref() {
        if !pass.summary.record(sink.send(topic, &batch.data, history)) {
            pass.summary.deferred += batch.entries;
            break;
        }
        pass.summary.batches += 1;
        pass.summary.entries += batch.entries;
        pass.summary.bytes += batch.data.len();
        pass.last_id = Some(batch.last_id);
    }
    pass.summary.deferred += batches.map(|b| b.entries).sum::<usize>();
    pass
}
