//! The public storage engine facade.
//!
//! The engine owns the memtable, the ordered list of on-disk parts, and
//! the merger, and runs an optional background thread that flushes and
//! merges on a timer.
//!
//! # Locking
//!
//! Two mutexes partition the mutable state: one guards the memtable, one
//! guards the parts list. They are never held together, and neither is
//! held across part IO: a flush drains the memtable under its lock,
//! writes the new part with no lock held, then briefly takes the parts
//! lock to append; a merge extracts its inputs under the parts lock,
//! merges and writes off-lock, and re-acquires to append the output.
//! Reads therefore make progress while a long merge runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::merger::Merger;
use crate::part::Part;
use crate::row::Row;

/// An embedded MergeTree-style store rooted at a single data directory.
///
/// One engine instance owns its directory exclusively; pointing two
/// instances at the same path is not supported.
pub struct Engine {
    core: Arc<EngineCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct EngineCore {
    base_path: PathBuf,
    config: Config,
    memtable: Mutex<MemTable>,
    parts: Mutex<Vec<Part>>,
    merger: Merger,
    shutdown: AtomicBool,
    worker_signal: Condvar,
    worker_mutex: Mutex<()>,
}

impl Engine {
    /// Opens or creates an engine at `base_path` with default
    /// configuration.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(base_path, Config::default())
    }

    /// Opens or creates an engine at `base_path`.
    ///
    /// Existing `part_<id>` directories are recovered in ascending id
    /// order and the part id counter resumes past the highest id found;
    /// anything else in the directory is ignored.
    pub fn open_with_config(base_path: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        let (parts, max_part_id) = recover_parts(&base_path)?;
        let merger = Merger::new(&base_path);
        merger.set_next_part_id(max_part_id.map_or(1, |id| id + 1));

        tracing::info!(
            path = %base_path.display(),
            parts = parts.len(),
            next_part_id = merger.next_part_id(),
            "opened engine"
        );

        let core = Arc::new(EngineCore {
            base_path,
            config,
            memtable: Mutex::new(MemTable::new()),
            parts: Mutex::new(parts),
            merger,
            shutdown: AtomicBool::new(false),
            worker_signal: Condvar::new(),
            worker_mutex: Mutex::new(()),
        });

        let engine = Self {
            core: Arc::clone(&core),
            worker: Mutex::new(None),
        };

        if core.config.enable_background_merge {
            let handle = std::thread::Builder::new()
                .name("granitedb-merge".to_string())
                .spawn(move || core.background_merge_worker())?;
            *engine.worker.lock() = Some(handle);
        }

        Ok(engine)
    }

    /// Buffers one row. A flush is triggered outside the memtable lock
    /// once the buffer reaches the configured threshold.
    pub fn insert(&self, key: &[u8], value: &[u8], timestamp: u64) -> Result<()> {
        self.insert_row(Row::new(key.to_vec(), value.to_vec(), timestamp))
    }

    pub fn insert_row(&self, row: Row) -> Result<()> {
        self.core.memtable.lock().insert(row);
        self.core.trigger_flush_if_needed()
    }

    /// Returns every row with `start_key <= key <= end_key`, sorted by
    /// `(key, timestamp)` and deduplicated on exact `(key, timestamp)`
    /// matches.
    pub fn query(&self, start_key: &[u8], end_key: &[u8]) -> Result<Vec<Row>> {
        let mut result = self.core.memtable.lock().query(start_key, end_key);

        {
            let mut parts = self.core.parts.lock();
            for part in parts.iter_mut() {
                if part.overlaps_range(start_key, end_key) {
                    result.extend(part.query(start_key, end_key)?);
                }
            }
        }

        result.sort();
        result.dedup_by(|a, b| a.key == b.key && a.timestamp == b.timestamp);
        Ok(result)
    }

    /// Point lookup: all timestamped versions of one key.
    pub fn query_key(&self, key: &[u8]) -> Result<Vec<Row>> {
        self.query(key, key)
    }

    /// Writes the buffered rows out as a new part. No-op when the
    /// memtable is empty.
    pub fn flush_memtable(&self) -> Result<()> {
        self.core.flush_memtable()
    }

    /// Runs one merge round if the part count exceeds the configured
    /// maximum.
    pub fn merge_parts_sync(&self) -> Result<()> {
        if self.core.should_trigger_merge() {
            self.core.perform_merge()?;
        }
        Ok(())
    }

    /// Flushes, then merges until the part count is within bounds.
    pub fn optimize(&self) -> Result<()> {
        self.core.flush_memtable()?;

        while self.core.should_trigger_merge() {
            if !self.core.perform_merge()? {
                break;
            }
        }
        Ok(())
    }

    /// Stops the background worker and flushes the memtable. Idempotent;
    /// also invoked on drop.
    pub fn shutdown(&self) -> Result<()> {
        if self.core.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Taking the worker mutex first means the worker is either
        // waiting on the condvar (and will be woken) or past its
        // shutdown check (and will observe the flag on the next one).
        drop(self.core.worker_mutex.lock());
        self.core.worker_signal.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("background merge thread panicked");
            }
        }

        self.core.flush_memtable()
    }

    pub fn part_count(&self) -> usize {
        self.core.parts.lock().len()
    }

    /// Rows buffered in the memtable plus rows persisted in parts.
    pub fn total_rows(&self) -> u64 {
        let buffered = self.core.memtable.lock().size() as u64;
        let persisted: u64 = self
            .core
            .parts
            .lock()
            .iter()
            .map(|part| part.metadata().row_count)
            .sum();
        buffered + persisted
    }

    pub fn memory_usage(&self) -> usize {
        let memtable = self.core.memtable.lock().memory_usage();
        let parts: usize = self
            .core
            .parts
            .lock()
            .iter()
            .map(Part::memory_usage)
            .sum();
        memtable + parts
    }

    pub fn disk_usage(&self) -> u64 {
        self.core.parts.lock().iter().map(Part::disk_usage).sum()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "shutdown during drop failed");
        }
    }
}

impl EngineCore {
    fn flush_memtable(&self) -> Result<()> {
        let rows = {
            let mut memtable = self.memtable.lock();
            if memtable.is_empty() {
                return Ok(());
            }
            let rows = memtable.get_all_rows();
            memtable.clear();
            rows
        };

        let mut part = Part::new(self.merger.allocate_part_id(), &self.base_path);
        let row_count = rows.len();
        part.write_from_memtable_rows(rows)?;

        tracing::info!(part_id = part.part_id(), rows = row_count, "flushed memtable");

        self.parts.lock().push(part);
        Ok(())
    }

    fn trigger_flush_if_needed(&self) -> Result<()> {
        let should_flush =
            self.memtable.lock().size() >= self.config.memtable_flush_threshold;
        if should_flush {
            self.flush_memtable()?;
        }
        Ok(())
    }

    fn should_trigger_merge(&self) -> bool {
        self.parts.lock().len() > self.config.max_parts
    }

    /// Runs one merge round. Returns false when there was nothing to
    /// merge.
    fn perform_merge(&self) -> Result<bool> {
        let mut selected = {
            let mut parts = self.parts.lock();
            if parts.len() < 2 {
                return Ok(false);
            }

            let candidates = self.merger.select_merge_candidates(&parts, 1);
            let Some(best) = candidates.first() else {
                return Ok(false);
            };

            // Indices are ascending; removing back-to-front keeps the
            // order of the parts that stay.
            let mut selected = Vec::with_capacity(best.part_indices.len());
            for &index in best.part_indices.iter().rev() {
                selected.push(parts.remove(index));
            }
            selected.reverse();
            selected
        };

        match self.merger.merge_parts(&mut selected) {
            Ok(merged) => {
                self.parts.lock().push(merged);
                Ok(true)
            }
            Err(e) => {
                // Put the extracted parts back where they were; the list
                // invariant is ascending part id.
                let mut parts = self.parts.lock();
                parts.append(&mut selected);
                parts.sort_by_key(Part::part_id);
                Err(e)
            }
        }
    }

    fn background_merge_worker(&self) {
        loop {
            {
                let mut guard = self.worker_mutex.lock();
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                self.worker_signal
                    .wait_for(&mut guard, self.config.merge_interval);
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.run_maintenance() {
                tracing::warn!(error = %e, "background maintenance failed");
            }
        }
    }

    fn run_maintenance(&self) -> Result<()> {
        self.trigger_flush_if_needed()?;
        if self.should_trigger_merge() {
            self.perform_merge()?;
        }
        Ok(())
    }
}

/// Scans `base_path` for `part_<decimal>` directories and opens them in
/// ascending id order. Parts whose metadata cannot be decoded are
/// skipped with a warning; unrelated files and directories are ignored.
/// Also returns the highest id seen, skipped directories included, so id
/// allocation never reuses a name already on disk.
fn recover_parts(base_path: &Path) -> Result<(Vec<Part>, Option<u64>)> {
    let mut part_ids = Vec::new();

    for entry in fs::read_dir(base_path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_prefix("part_"))
            .and_then(|id| id.parse::<u64>().ok())
        {
            part_ids.push(id);
        }
    }

    part_ids.sort_unstable();
    let max_part_id = part_ids.last().copied();

    let mut parts = Vec::with_capacity(part_ids.len());
    for part_id in part_ids {
        match Part::open_existing(part_id, base_path) {
            Ok(part) => parts.push(part),
            Err(e) => {
                tracing::warn!(part_id, error = %e, "skipping unreadable part");
            }
        }
    }

    Ok((parts, max_part_id))
}
