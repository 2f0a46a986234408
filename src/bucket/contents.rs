//! Lock-protected entry store of a bucket.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// A stored record.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) id: u64,
    pub(crate) persistent: bool,
    pub(crate) data: Bytes,
}

impl Entry {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Result of a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextData {
    /// Id of the last entry included; pass it back as the next `after_id`.
    pub last_id: u64,
    /// Ids skipped because their entries were spilled before being read.
    pub dropped: u64,
    /// Concatenated payloads.
    pub data: Bytes,
}

/// Entries of one bucket plus its counters.
///
/// Only reachable through the owning bucket's lock, so holding a
/// `&BucketContents` proves the lock is held.
#[derive(Debug, Default)]
pub struct BucketContents {
    entries: VecDeque<Entry>,
    current_size: u64,
    persistent_size: u64,
    last_published: u64,
    master_id: u64,
    spilled: u64,
    rejected: u64,
}

impl BucketContents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next id.
    pub(crate) fn push(&mut self, data: Bytes, persistent: bool) -> u64 {
        self.master_id += 1;
        let entry = Entry {
            id: self.master_id,
            persistent,
            data,
        };
        self.current_size += entry.size();
        if persistent {
            self.persistent_size += entry.size();
        }
        self.entries.push_back(entry);
        self.master_id
    }

    /// Evict published, non-persistent entries from the head until `required`
    /// more bytes fit in `capacity`.
    ///
    /// The scan skips persistent entries and stops at the first unpublished
    /// one. Returns `false` if the room could not be made.
    pub(crate) fn spill(&mut self, required: u64, capacity: u64) -> bool {
        let mut index = 0;
        while self.current_size + required > capacity {
            let Some(entry) = self.entries.get(index) else {
                break;
            };
            if entry.id > self.last_published {
                break;
            }
            if entry.persistent {
                index += 1;
                continue;
            }
            if let Some(removed) = self.entries.remove(index) {
                tracing::trace!(id = removed.id, size = removed.size(), "Spilled entry");
                self.current_size -= removed.size();
                self.spilled += 1;
            }
        }
        self.current_size + required <= capacity
    }

    pub(crate) fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    /// Move the publish cursor forward. Never moves it back.
    pub(crate) fn advance_published(&mut self, id: u64) {
        self.last_published = self.last_published.max(id);
    }

    /// Entries not yet published, oldest first.
    pub(crate) fn unpublished(&self) -> impl Iterator<Item = &Entry> {
        let last = self.last_published;
        self.entries.iter().filter(move |e| e.id > last)
    }

    /// Entries already published, oldest first.
    pub(crate) fn published(&self) -> impl Iterator<Item = &Entry> {
        let last = self.last_published;
        self.entries.iter().take_while(move |e| e.id <= last)
    }

    /// Next resident persistent entry with `after_id < id <= last_published`.
    pub fn next_persistent_data(&self, after_id: u64) -> Option<(u64, &Bytes)> {
        self.published()
            .find(|e| e.persistent && e.id > after_id)
            .map(|e| (e.id, &e.data))
    }

    /// Read the run of entries following `after_id`.
    ///
    /// The first entry with `id > after_id` is always returned, whatever its
    /// size. Following entries are appended while the total stays within
    /// `max_bytes`; `max_bytes == 0` returns only the first entry.
    pub fn next_data(&self, after_id: u64, max_bytes: u32) -> Option<NextData> {
        let start = self.entries.partition_point(|e| e.id <= after_id);
        let first = self.entries.get(start)?;

        let mut dropped = first.id - (after_id + 1);
        let mut last_id = first.id;
        let mut total = first.data.len();
        let mut end = start + 1;

        if max_bytes > 0 {
            while let Some(next) = self.entries.get(end) {
                if total + next.data.len() > max_bytes as usize {
                    break;
                }
                dropped += next.id - (last_id + 1);
                total += next.data.len();
                last_id = next.id;
                end += 1;
            }
        }

        let data = if end == start + 1 {
            first.data.clone()
        } else {
            let mut buf = BytesMut::with_capacity(total);
            for entry in self.entries.range(start..end) {
                buf.extend_from_slice(&entry.data);
            }
            buf.freeze()
        };

        Some(NextData {
            last_id,
            dropped,
            data,
        })
    }

    /// Bytes currently stored.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// Bytes stored in persistent entries.
    pub fn persistent_size(&self) -> u64 {
        self.persistent_size
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the newest published entry (0 before the first publish).
    pub fn last_published(&self) -> u64 {
        self.last_published
    }

    /// Id assigned to the newest entry (0 before the first add).
    pub fn master_id(&self) -> u64 {
        self.master_id
    }

    /// Entries evicted by spill so far.
    pub fn spilled(&self) -> u64 {
        self.spilled
    }

    /// Adds rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Resident ids, oldest first.
    pub fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

/// Persistent entries of the bucket being published.
///
/// Handed to sinks during `publish`/`republish` while the bucket lock is held,
/// so a sink can replay headers (for example when it opens a new output file)
/// without re-entering the bucket.
#[derive(Debug, Clone, Copy)]
pub struct PersistentHistory<'a> {
    unique_id: &'a str,
    contents: Option<&'a BucketContents>,
}

impl<'a> PersistentHistory<'a> {
    pub(crate) fn new(unique_id: &'a str, contents: &'a BucketContents) -> Self {
        Self {
            unique_id,
            contents: Some(contents),
        }
    }

    /// History for messages that do not originate from a bucket.
    pub fn none() -> Self {
        Self {
            unique_id: "",
            contents: None,
        }
    }

    /// Unique id of the bucket, empty for [`PersistentHistory::none`].
    pub fn unique_id(&self) -> &'a str {
        self.unique_id
    }

    /// See [`BucketContents::next_persistent_data`].
    pub fn next_persistent_data(&self, after_id: u64) -> Option<(u64, &'a [u8])> {
        self.contents?
            .next_persistent_data(after_id)
            .map(|(id, data)| (id, data.as_ref()))
    }

    /// All published persistent payloads, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &'a [u8])> + 'a {
        self.contents
            .into_iter()
            .flat_map(|c| c.published())
            .filter(|e| e.persistent)
            .map(|e| (e.id, e.data.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(sizes: &[(usize, bool)]) -> BucketContents {
        let mut contents = BucketContents::new();
        for &(size, persistent) in sizes {
            contents.push(Bytes::from(vec![b'x'; size]), persistent);
        }
        contents
    }

    #[test]
    fn test_push_assigns_increasing_ids() {
        let contents = filled(&[(10, false), (20, true), (5, false)]);
        assert_eq!(contents.ids(), vec![1, 2, 3]);
        assert_eq!(contents.current_size(), 35);
        assert_eq!(contents.persistent_size(), 20);
        assert_eq!(contents.master_id(), 3);
    }

    #[test]
    fn test_spill_blocked_by_unpublished() {
        let mut contents = filled(&[(40, false), (40, false)]);
        assert!(!contents.spill(40, 100));
        assert_eq!(contents.len(), 2);
    }

    #[test]
    fn test_spill_removes_published_only() {
        let mut contents = filled(&[(40, false), (40, false)]);
        contents.advance_published(1);
        assert!(contents.spill(40, 100));
        assert_eq!(contents.ids(), vec![2]);
        assert_eq!(contents.spilled(), 1);
    }

    #[test]
    fn test_spill_skips_persistent() {
        let mut contents = filled(&[(30, true), (30, false), (30, false)]);
        contents.advance_published(3);
        assert!(contents.spill(20, 100));
        assert_eq!(contents.ids(), vec![1, 3]);
        assert!(contents.spill(70, 100));
        assert_eq!(contents.ids(), vec![1]);
        assert!(!contents.spill(80, 100));
        assert_eq!(contents.ids(), vec![1]);
    }

    #[test]
    fn test_spill_noop_when_room() {
        let mut contents = filled(&[(10, false)]);
        assert!(contents.spill(50, 100));
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn test_advance_published_is_monotonic() {
        let mut contents = filled(&[(1, false), (1, false)]);
        contents.advance_published(2);
        contents.advance_published(1);
        assert_eq!(contents.last_published(), 2);
    }

    #[test]
    fn test_next_persistent_data_within_published() {
        let mut contents = filled(&[(4, true), (4, false), (4, true), (4, true)]);
        contents.advance_published(3);
        assert_eq!(contents.next_persistent_data(0).map(|(id, _)| id), Some(1));
        assert_eq!(contents.next_persistent_data(1).map(|(id, _)| id), Some(3));
        assert_eq!(contents.next_persistent_data(3), None);
    }

    #[test]
    fn test_next_data_single_entry_when_unlimited() {
        let contents = filled(&[(4, false), (6, false)]);
        let next = contents.next_data(0, 0).unwrap();
        assert_eq!(next.last_id, 1);
        assert_eq!(next.dropped, 0);
        assert_eq!(next.data.len(), 4);
    }

    #[test]
    fn test_next_data_respects_max_bytes() {
        let contents = filled(&[(4, false), (4, false), (4, false)]);
        let next = contents.next_data(0, 9).unwrap();
        assert_eq!(next.last_id, 2);
        assert_eq!(next.data.len(), 8);

        let next = contents.next_data(2, 9).unwrap();
        assert_eq!(next.last_id, 3);
        assert!(contents.next_data(3, 9).is_none());
    }

    #[test]
    fn test_next_data_oversized_first_entry() {
        let contents = filled(&[(50, false), (4, false)]);
        let next = contents.next_data(0, 10).unwrap();
        assert_eq!(next.last_id, 1);
        assert_eq!(next.data.len(), 50);
    }

    #[test]
    fn test_next_data_counts_gaps() {
        let mut contents = filled(&[(40, false), (40, false), (10, false)]);
        contents.advance_published(2);
        assert!(contents.spill(20, 100));
        assert_eq!(contents.ids(), vec![2, 3]);

        let next = contents.next_data(0, 0).unwrap();
        assert_eq!(next.last_id, 2);
        assert_eq!(next.dropped, 1);
    }

    #[test]
    fn test_history_none_is_empty() {
        let history = PersistentHistory::none();
        assert_eq!(history.unique_id(), "");
        assert!(history.next_persistent_data(0).is_none());
        assert_eq!(history.entries().count(), 0);
    }

    #[test]
    fn test_history_entries() {
        let mut contents = filled(&[(2, true), (3, false), (4, true)]);
        contents.advance_published(3);
        let history = PersistentHistory::new("cpu", &contents);
        let ids: Vec<u64> = history.entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(history.next_persistent_data(1).map(|(_, d)| d.len()), Some(4));
    }
}
