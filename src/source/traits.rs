//! Core source traits and the ingestion data record.

use bytes::Bytes;
use thiserror::Error;

/// Minimum pull interval, in scheduler ticks.
pub const MIN_PULL_INTERVAL: u32 = 1;

/// Errors raised while running the pull scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker for source '{source_name}': {source}")]
    Spawn {
        /// Name of the pull source the worker was created for.
        source_name: String,
        /// Underlying I/O error from the thread builder.
        #[source]
        source: std::io::Error,
    },
}

/// A single record crossing the ingestion boundary.
///
/// `provider_id` identifies the plugin instance, `source_id` one of its feeds.
/// Persistent records are never spilled from their bucket once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorData {
    /// Plugin instance identifier.
    pub provider_id: u32,
    /// Feed identifier within the provider.
    pub source_id: u32,
    /// Raw payload bytes.
    pub data: Bytes,
    /// Exempt from spill when set.
    pub persistent: bool,
}

impl MonitorData {
    /// Create a non-persistent record.
    pub fn new(provider_id: u32, source_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            provider_id,
            source_id,
            data: data.into(),
            persistent: false,
        }
    }

    /// Mark the record as persistent.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Payload size in bytes, saturating at `u32::MAX`.
    pub fn size(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    /// Returns `true` when there is no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Static description shared by push and pull sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHeader {
    /// Feed identifier within the provider.
    pub source_id: u32,
    /// Byte budget for the bucket created for this source.
    pub capacity: u32,
    /// Stable external name; becomes the bucket's unique id.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl SourceHeader {
    /// Create a header.
    pub fn new(
        source_id: u32,
        capacity: u32,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source_id,
            capacity,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A feed that submits data on its own schedule through an agent handle.
pub trait PushSource: Send + Sync + 'static {
    /// Source description.
    fn header(&self) -> &SourceHeader;
}

/// A feed that must be polled by the scheduler.
///
/// `pull` runs on the source's dedicated worker thread. Every record returned
/// from `pull` is handed back through `complete` once the agent has copied it,
/// and `complete(None)` is delivered exactly once when the worker exits.
pub trait PullSource: Send + Sync + 'static {
    /// Source description.
    fn header(&self) -> &SourceHeader;

    /// Pull interval in scheduler ticks.
    fn pull_interval(&self) -> u32;

    /// Produce the next record, if any.
    fn pull(&self) -> Option<MonitorData>;

    /// Return ownership of a pulled record to the source.
    fn complete(&self, data: Option<MonitorData>) {
        let _ = data;
    }
}

/// Ingestion entry point used by pull workers.
pub trait Ingest: Send + Sync + 'static {
    /// Store a record. Returns `false` when the record was dropped.
    fn ingest(&self, data: &MonitorData) -> bool;
}

/// Clamp a pull interval to [`MIN_PULL_INTERVAL`].
pub fn clamp_interval(name: &str, interval: u32) -> u32 {
    if interval < MIN_PULL_INTERVAL {
        tracing::warn!(source = %name, min_interval = MIN_PULL_INTERVAL,
            "Pull interval is less than minimum allowed. Using minimum interval."
        );
        MIN_PULL_INTERVAL
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_data_size() {
        let data = MonitorData::new(1, 2, vec![0u8; 40]);
        assert_eq!(data.size(), 40);
        assert!(!data.persistent);
        assert!(!data.is_empty());
    }

    #[test]
    fn test_monitor_data_persistent_builder() {
        let data = MonitorData::new(0, 0, "header").persistent();
        assert!(data.persistent);
        assert_eq!(data.data, Bytes::from_static(b"header"));
    }

    #[test]
    fn test_monitor_data_empty() {
        assert!(MonitorData::new(0, 0, Bytes::new()).is_empty());
    }

    #[test]
    fn test_clamp_interval() {
        assert_eq!(clamp_interval("cpu", 0), MIN_PULL_INTERVAL);
        assert_eq!(clamp_interval("cpu", 5), 5);
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::Spawn {
            source_name: "cpu".to_string(),
            source: std::io::Error::other("no threads"),
        };
        assert!(err.to_string().contains("'cpu'"));
        assert!(err.to_string().contains("no threads"));
    }
}
