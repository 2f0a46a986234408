//! Bucket error types.
//!
//! Every rejection path of the ingestion side maps to one variant, so callers
//! can count drops by cause. None of them are fatal to the agent.

use thiserror::Error;

/// Errors returned when data cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketError {
    /// Record identity does not match the bucket.
    #[error("data for [{provider_id}:{source_id}] does not belong to bucket '{unique_id}'")]
    IdentityMismatch {
        unique_id: String,
        provider_id: u32,
        source_id: u32,
    },

    /// Record has no payload.
    #[error("empty payload")]
    EmptyPayload,

    /// Spill could not free enough room.
    #[error("no room in bucket '{unique_id}' for {size} bytes (capacity {capacity})")]
    CapacityExceeded {
        unique_id: String,
        size: u32,
        capacity: u32,
    },

    /// Resident persistent data would exceed the bucket's persistent limit.
    #[error("persistent limit of {limit} bytes reached in bucket '{unique_id}'")]
    PersistentLimitExceeded {
        unique_id: String,
        size: u32,
        limit: u32,
    },

    /// No bucket is registered for the record's identity.
    #[error("no bucket for [{provider_id}:{source_id}]")]
    NoRoute { provider_id: u32, source_id: u32 },

    /// A bucket with the same identity or unique id already exists.
    #[error("duplicate bucket: {0}")]
    Duplicate(String),
}
