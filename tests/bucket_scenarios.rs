//! Bucket behaviour under capacity pressure, publish and range reads.

use oculus_agent::bucket::{BucketError, BucketSink, DataBucket, PersistentHistory};
use oculus_agent::connector::FanOutReport;
use oculus_agent::source::MonitorData;

/// Accepts and discards every batch.
struct NullSink;

impl BucketSink for NullSink {
    fn send(&self, _topic: &str, _data: &[u8], _history: &PersistentHistory<'_>) -> FanOutReport {
        FanOutReport::delivered(1)
    }
}

fn record(size: usize) -> MonitorData {
    MonitorData::new(0, 0, vec![b'z'; size])
}

#[test]
fn test_three_adds_without_publish() {
    let bucket = DataBucket::new(0, 0, 100, "cpu");
    assert!(bucket.add(&record(40)).is_ok());
    assert!(bucket.add(&record(40)).is_ok());
    assert!(matches!(
        bucket.add(&record(40)),
        Err(BucketError::CapacityExceeded { .. })
    ));
    assert_eq!(bucket.stats().current_size, 80);
    assert_eq!(bucket.stats().last_published, 0);
}

#[test]
fn test_publish_makes_room_for_third_add() {
    let bucket = DataBucket::new(0, 0, 100, "cpu");
    bucket.add(&record(40)).unwrap();
    bucket.add(&record(40)).unwrap();
    bucket.publish(&NullSink);

    assert!(bucket.add(&record(40)).is_ok());
    assert_eq!(bucket.stats().current_size, 80);
    assert_eq!(bucket.with_contents(|c| c.ids()), vec![2, 3]);
}

#[test]
fn test_persistent_entry_survives_spill() {
    let bucket = DataBucket::new(0, 0, 100, "env");
    bucket.add(&record(60).persistent()).unwrap();
    bucket.publish(&NullSink);

    // Only the persistent entry is resident and it can never be spilled
    assert!(bucket.add(&record(60)).is_err());
    assert_eq!(bucket.with_contents(|c| c.ids()), vec![1]);

    // A smaller non-persistent entry fits, is published, then spilled
    bucket.add(&record(40)).unwrap();
    bucket.publish(&NullSink);
    bucket.add(&record(40)).unwrap();
    assert_eq!(bucket.with_contents(|c| c.ids()), vec![1, 3]);
    assert!(bucket.with_contents(|c| c.next_persistent_data(0).is_some()));
}

#[test]
fn test_capacity_never_exceeded() {
    let bucket = DataBucket::new(0, 0, 1000, "cpu");
    for i in 0..500usize {
        let _ = bucket.add(&record(1 + (i * 37) % 90));
        if i % 7 == 0 {
            bucket.publish(&NullSink);
        }
        if i % 50 == 0 {
            let _ = bucket.add(&record(10).persistent());
        }
        assert!(bucket.stats().current_size <= 1000);
    }
    assert!(bucket.stats().persistent_size <= 1000);
}

#[test]
fn test_range_reads_traverse_every_entry_once() {
    let bucket = DataBucket::new(0, 0, 100, "cpu");
    let mut cursor = 0;
    let mut seen = Vec::new();
    let mut dropped = 0;

    for round in 0..20 {
        // Produce faster than the reader consumes
        for _ in 0..3 {
            let _ = bucket.add(&record(30));
        }
        bucket.publish(&NullSink);

        if round % 2 == 0 {
            while let Some(next) = bucket.next_data(cursor, 0) {
                seen.push(next.last_id);
                dropped += next.dropped;
                cursor = next.last_id;
            }
        }
    }
    while let Some(next) = bucket.next_data(cursor, 0) {
        seen.push(next.last_id);
        dropped += next.dropped;
        cursor = next.last_id;
    }

    let stats = bucket.stats();
    let mut sorted = seen.clone();
    sorted.dedup();
    assert_eq!(sorted.len(), seen.len());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(cursor, stats.master_id);
    assert_eq!(seen.len() as u64 + dropped, stats.master_id);
    assert!(dropped > 0);
}

#[test]
fn test_range_reads_with_byte_limit() {
    let bucket = DataBucket::new(0, 0, 1000, "cpu");
    for _ in 0..10 {
        bucket.add(&record(10)).unwrap();
    }
    let mut cursor = 0;
    let mut chunks = Vec::new();
    while let Some(next) = bucket.next_data(cursor, 35) {
        chunks.push(next.data.len());
        cursor = next.last_id;
    }
    assert_eq!(chunks, vec![30, 30, 30, 10]);
}
