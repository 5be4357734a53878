//! Sparse key-range index over the granules of a part.
//!
//! One entry per granule records its `[min_key, max_key]` and row count;
//! range scans use the index to prune granules before touching their
//! column files. The index is persisted with the part as `primary.idx`.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::Result;
use crate::serialization;

/// Key range and position of a single granule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub granule_index: usize,
    pub row_count: usize,
}

impl IndexEntry {
    /// Inclusive on both ends: a granule overlaps `[start, end]` unless it
    /// lies entirely before or entirely after it.
    pub fn overlaps_range(&self, start_key: &[u8], end_key: &[u8]) -> bool {
        !(self.max_key.as_slice() < start_key || self.min_key.as_slice() > end_key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry; callers add entries in granule order.
    pub fn add_entry(
        &mut self,
        min_key: Vec<u8>,
        max_key: Vec<u8>,
        granule_index: usize,
        row_count: usize,
    ) {
        self.entries.push(IndexEntry {
            min_key,
            max_key,
            granule_index,
            row_count,
        });
    }

    /// Returns the indices of every granule overlapping `[start, end]`,
    /// in ascending granule order.
    pub fn find_granules(&self, start_key: &[u8], end_key: &[u8]) -> Vec<usize> {
        let mut result: Vec<usize> = self
            .entries
            .iter()
            .filter(|entry| entry.overlaps_range(start_key, end_key))
            .map(|entry| entry.granule_index)
            .collect();
        result.sort_unstable();
        result
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concatenates another index's entries with their granule indices
    /// shifted by `granule_offset`, then re-sorts by
    /// `(min_key, granule_index)`.
    pub fn merge_with(&mut self, other: &SparseIndex, granule_offset: usize) {
        for entry in &other.entries {
            let mut entry = entry.clone();
            entry.granule_index += granule_offset;
            self.entries.push(entry);
        }

        self.entries.sort_by(|a, b| {
            a.min_key
                .cmp(&b.min_key)
                .then_with(|| a.granule_index.cmp(&b.granule_index))
        });
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut buffer = Vec::new();
        serialization::write_u64(&mut buffer, self.entries.len() as u64)?;

        for entry in &self.entries {
            serialization::write_bytes(&mut buffer, &entry.min_key)?;
            serialization::write_bytes(&mut buffer, &entry.max_key)?;
            serialization::write_u64(&mut buffer, entry.granule_index as u64)?;
            serialization::write_u64(&mut buffer, entry.row_count as u64)?;
        }

        fs::write(path, buffer)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let mut cursor = Cursor::new(data.as_slice());

        let count = serialization::read_u64(&mut cursor, "index entry count")?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let min_key = serialization::read_bytes(&mut cursor, "index min_key")?;
            let max_key = serialization::read_bytes(&mut cursor, "index max_key")?;
            let granule_index =
                serialization::read_u64(&mut cursor, "index granule_index")? as usize;
            let row_count = serialization::read_u64(&mut cursor, "index row_count")? as usize;
            entries.push(IndexEntry {
                min_key,
                max_key,
                granule_index,
                row_count,
            });
        }

        Ok(Self { entries })
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .entries
                .iter()
                .map(|entry| {
                    std::mem::size_of::<IndexEntry>() + entry.min_key.len() + entry.max_key.len()
                })
                .sum::<usize>()
    }
}
