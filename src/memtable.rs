//! In-memory ordered buffer for rows not yet flushed to a part.
//!
//! Rows live in a concurrent skip list keyed by `(key, timestamp, seqno)`.
//! The trailing sequence number is assigned at insert time so that rows
//! with identical `(key, timestamp)` are preserved rather than
//! overwritten; iteration still yields the `(key, timestamp)` row order.
//! Deduplication is the query path's job, not the memtable's.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::error::Result;
use crate::granule::Granule;
use crate::row::Row;

type MemKey = (Vec<u8>, u64, u64);

#[derive(Debug, Default)]
pub struct MemTable {
    data: SkipMap<MemKey, Vec<u8>>,
    next_seq: AtomicU64,
    entries: AtomicUsize,
    bytes: AtomicUsize,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a row. Duplicates of an existing `(key, timestamp)` are
    /// kept as separate entries.
    pub fn insert(&self, row: Row) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(row.encoded_size(), Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        self.data.insert((row.key, row.timestamp, seq), row.value);
    }

    /// Returns every buffered row with `start <= key <= end` in
    /// `(key, timestamp)` order, without deduplication.
    pub fn query(&self, start_key: &[u8], end_key: &[u8]) -> Vec<Row> {
        let lower = Bound::Included((start_key.to_vec(), 0, 0));
        let upper = Bound::Included((end_key.to_vec(), u64::MAX, u64::MAX));

        self.data
            .range((lower, upper))
            .map(|entry| {
                let (key, timestamp, _) = entry.key();
                Row {
                    key: key.clone(),
                    value: entry.value().clone(),
                    timestamp: *timestamp,
                }
            })
            .collect()
    }

    pub fn size(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.bytes.load(Ordering::SeqCst)
    }

    /// Drops all buffered rows and resets accounting.
    pub fn clear(&mut self) {
        self.data = SkipMap::new();
        self.next_seq = AtomicU64::new(0);
        self.entries = AtomicUsize::new(0);
        self.bytes = AtomicUsize::new(0);
    }

    /// Returns all buffered rows in `(key, timestamp)` order.
    pub fn get_all_rows(&self) -> Vec<Row> {
        self.data
            .iter()
            .map(|entry| {
                let (key, timestamp, _) = entry.key();
                Row {
                    key: key.clone(),
                    value: entry.value().clone(),
                    timestamp: *timestamp,
                }
            })
            .collect()
    }

    /// Packs the buffered rows into successive sealed granules in global
    /// order. The caller is responsible for clearing the memtable.
    pub fn flush_to_granules(&self) -> Result<Vec<Granule>> {
        let mut granules = Vec::new();
        let mut current = Granule::new();

        for entry in self.data.iter() {
            if current.is_full() {
                current.sort();
                granules.push(std::mem::take(&mut current));
            }

            let (key, timestamp, _) = entry.key();
            current.add_row(Row {
                key: key.clone(),
                value: entry.value().clone(),
                timestamp: *timestamp,
            })?;
        }

        if !current.is_empty() {
            current.sort();
            granules.push(current);
        }

        Ok(granules)
    }
}
