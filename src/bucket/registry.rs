//! Registry of all buckets, built once at startup.

use std::sync::Arc;

use crate::source::{Ingest, MonitorData};

use super::data_bucket::{BucketSink, DataBucket, PublishSummary};
use super::error::BucketError;

/// All buckets of the agent in registration order.
///
/// Buckets are registered before the registry is shared and never removed,
/// so lookups need no lock. Bucket counts are small, so lookups are linear.
#[derive(Default)]
pub struct BucketRegistry {
    buckets: Vec<Arc<DataBucket>>,
}

impl BucketRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket.
    ///
    /// # Errors
    /// Returns `BucketError::Duplicate` if the identity pair or the unique id
    /// is already registered.
    pub fn register(&mut self, bucket: DataBucket) -> Result<Arc<DataBucket>, BucketError> {
        if self.find(bucket.provider_id(), bucket.source_id()).is_some() {
            return Err(BucketError::Duplicate(format!(
                "[{}:{}]",
                bucket.provider_id(),
                bucket.source_id()
            )));
        }
        if self.find_by_unique_id(bucket.unique_id()).is_some() {
            return Err(BucketError::Duplicate(bucket.unique_id().to_string()));
        }

        tracing::info!(
            bucket = %bucket.unique_id(),
            provider_id = bucket.provider_id(),
            source_id = bucket.source_id(),
            capacity = bucket.capacity(),
            "Bucket created"
        );
        let bucket = Arc::new(bucket);
        self.buckets.push(Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Find a bucket by identity pair.
    pub fn find(&self, provider_id: u32, source_id: u32) -> Option<&Arc<DataBucket>> {
        self.buckets.iter().find(|b| b.matches(provider_id, source_id))
    }

    /// Find a bucket by unique id.
    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<&Arc<DataBucket>> {
        self.buckets.iter().find(|b| b.unique_id() == unique_id)
    }

    /// Store `data` in its bucket.
    ///
    /// # Errors
    /// `EmptyPayload` and `NoRoute` are checked here; other rejections come
    /// from [`DataBucket::add`].
    pub fn route(&self, data: &MonitorData) -> Result<u64, BucketError> {
        if data.is_empty() {
            tracing::warn!(
                provider_id = data.provider_id,
                source_id = data.source_id,
                "Empty record dropped"
            );
            return Err(BucketError::EmptyPayload);
        }
        match self.find(data.provider_id, data.source_id) {
            Some(bucket) => bucket.add(data),
            None => {
                tracing::warn!(
                    provider_id = data.provider_id,
                    source_id = data.source_id,
                    "Attempted to add data to missing bucket"
                );
                Err(BucketError::NoRoute {
                    provider_id: data.provider_id,
                    source_id: data.source_id,
                })
            }
        }
    }

    /// Publish every bucket in registration order.
    pub fn publish_all(&self, sink: &dyn BucketSink) -> PublishSummary {
        let mut total = PublishSummary::default();
        for bucket in &self.buckets {
            total.merge(bucket.publish(sink));
        }
        total
    }

    /// Republish every bucket's history under `prefix`.
    pub fn republish_all(&self, prefix: &str, sink: &dyn BucketSink) -> PublishSummary {
        let mut total = PublishSummary::default();
        for bucket in &self.buckets {
            total.merge(bucket.republish(prefix, sink));
        }
        total
    }

    /// Unique ids in registration order.
    pub fn unique_ids(&self) -> Vec<String> {
        self.buckets.iter().map(|b| b.unique_id().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataBucket>> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// One line per bucket with its counters.
    pub fn describe(&self) -> String {
        let mut out = format!("{} bucket(s)\n", self.buckets.len());
        for bucket in &self.buckets {
            out.push_str(&bucket.to_string());
            out.push('\n');
        }
        out
    }
}

impl Ingest for BucketRegistry {
    fn ingest(&self, data: &MonitorData) -> bool {
        self.route(data).is_ok()
    }
}

impl std::fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("buckets", &self.unique_ids())
            .finish()
    }
}
