//! Part merging: candidate selection and k-way merge execution.
//!
//! Candidate selection scores adjacent runs of parts so that merges
//! prefer partners of comparable size (bounding write amplification),
//! slightly prefer 2-way over 3-way merges, and skip runs too small to
//! be worth the IO. Execution is a classic k-way merge: one cursor per
//! input part feeding a min-heap ordered by key ascending and timestamp
//! descending, so that for an exact `(key, timestamp)` duplicate the
//! copy popped first is the one kept.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{self, AtomicU64};

use crate::error::{Error, Result};
use crate::part::Part;
use crate::row::Row;

/// Total size below which a merge is considered low-value; the score
/// scales linearly up to this point.
const SIZE_FACTOR_KNEE: u64 = 10 * 1024 * 1024;

/// A scored run of adjacent parts proposed for merging.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub part_indices: Vec<usize>,
    pub total_rows: u64,
    pub total_size: u64,
    pub score: f64,
}

struct HeapEntry {
    row: Row,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap pops the maximum, so the entry that must pop first has
    // to compare greatest: reverse the key order, keep timestamps
    // natural (latest first), break remaining ties by source order.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.row.key.cmp(&other.row.key) {
            Ordering::Equal => self
                .row
                .timestamp
                .cmp(&other.row.timestamp)
                .then_with(|| self.source.cmp(&other.source).reverse()),
            key_order => key_order.reverse(),
        }
    }
}

/// Streams the rows of several parts in `(key asc, timestamp desc)`
/// order. Input rows are fully loaded up front; the heap holds one
/// cursor per part.
pub struct MergeIterator {
    part_rows: Vec<Vec<Row>>,
    cursors: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    pub fn new(parts: &mut [Part]) -> Result<Self> {
        let mut part_rows = Vec::with_capacity(parts.len());
        for part in parts.iter_mut() {
            part_rows.push(part.get_all_rows()?);
        }

        let mut heap = BinaryHeap::new();
        for (source, rows) in part_rows.iter().enumerate() {
            if let Some(row) = rows.first() {
                heap.push(HeapEntry {
                    row: row.clone(),
                    source,
                });
            }
        }

        Ok(Self {
            cursors: vec![0; part_rows.len()],
            part_rows,
            heap,
        })
    }
}

impl Iterator for MergeIterator {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;

        self.cursors[entry.source] += 1;
        if let Some(row) = self.part_rows[entry.source].get(self.cursors[entry.source]) {
            self.heap.push(HeapEntry {
                row: row.clone(),
                source: entry.source,
            });
        }

        Some(entry.row)
    }
}

/// Merges parts on behalf of the engine and allocates part ids for every
/// part created by flush or merge. Allocation is strictly monotonic;
/// recovery advances it past the highest id found on disk.
#[derive(Debug)]
pub struct Merger {
    base_path: PathBuf,
    next_part_id: AtomicU64,
}

impl Merger {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            next_part_id: AtomicU64::new(1),
        }
    }

    /// Claims the next part id.
    pub fn allocate_part_id(&self) -> u64 {
        self.next_part_id.fetch_add(1, atomic::Ordering::SeqCst)
    }

    pub fn next_part_id(&self) -> u64 {
        self.next_part_id.load(atomic::Ordering::SeqCst)
    }

    pub fn set_next_part_id(&self, id: u64) {
        self.next_part_id.store(id, atomic::Ordering::SeqCst);
    }

    /// Scores every run of two or three adjacent parts and returns up to
    /// `max_candidates` of them, best first. Runs scoring zero are
    /// dropped.
    pub fn select_merge_candidates(
        &self,
        parts: &[Part],
        max_candidates: usize,
    ) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        if parts.len() < 2 {
            return candidates;
        }

        let sizes: Vec<u64> = parts.iter().map(Part::disk_usage).collect();

        for run_len in [2usize, 3] {
            // parts.len() < 3 must skip the triple pass entirely
            for start in 0..parts.len().saturating_sub(run_len - 1) {
                let indices: Vec<usize> = (start..start + run_len).collect();
                if let Some(candidate) = self.score_candidate(parts, &sizes, indices) {
                    candidates.push(candidate);
                }
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(max_candidates);
        candidates
    }

    fn score_candidate(
        &self,
        parts: &[Part],
        sizes: &[u64],
        part_indices: Vec<usize>,
    ) -> Option<MergeCandidate> {
        let mut total_rows = 0u64;
        let mut total_size = 0u64;
        let mut min_size = u64::MAX;
        let mut max_size = 0u64;

        for &i in &part_indices {
            total_rows += parts[i].metadata().row_count;
            total_size += sizes[i];
            min_size = min_size.min(sizes[i]);
            max_size = max_size.max(sizes[i]);
        }

        if total_rows == 0 || total_size == 0 {
            return None;
        }

        let size_ratio = min_size as f64 / max_size as f64;
        let parts_factor = 1.0 / part_indices.len() as f64;
        let size_factor = (total_size as f64 / SIZE_FACTOR_KNEE as f64).min(1.0);
        let score = size_ratio * parts_factor * size_factor * 100.0;

        if score <= 0.0 {
            return None;
        }

        Some(MergeCandidate {
            part_indices,
            total_rows,
            total_size,
            score,
        })
    }

    /// K-way merges the given parts into a freshly numbered part.
    ///
    /// Exact `(key, timestamp)` duplicates collapse to the copy popped
    /// first; distinct timestamps of the same key all survive. A single
    /// input part is returned unchanged. On success the input vector is
    /// drained and the consumed parts are deleted from disk; on failure
    /// it is left intact so the caller can restore the parts list.
    pub fn merge_parts(&self, parts: &mut Vec<Part>) -> Result<Part> {
        if parts.is_empty() {
            return Err(Error::EmptyInput("merge parts"));
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }

        let input_ids: Vec<u64> = parts.iter().map(Part::part_id).collect();

        let mut merged_rows: Vec<Row> = Vec::new();
        for row in MergeIterator::new(parts)? {
            let duplicate = merged_rows
                .last()
                .is_some_and(|last| last.key == row.key && last.timestamp == row.timestamp);
            if !duplicate {
                merged_rows.push(row);
            }
        }

        if merged_rows.is_empty() {
            return Err(Error::EmptyInput("merged rows"));
        }

        let row_count = merged_rows.len();
        let mut merged_part = Part::new(self.allocate_part_id(), &self.base_path);
        merged_part.write_from_memtable_rows(merged_rows)?;

        for mut part in parts.drain(..) {
            if let Err(e) = part.delete_from_disk() {
                tracing::warn!(part_id = part.part_id(), error = %e, "failed to delete merged input part");
            }
        }

        tracing::info!(
            inputs = ?input_ids,
            output = merged_part.part_id(),
            rows = row_count,
            "merged parts"
        );

        Ok(merged_part)
    }
}
