//! Immutable on-disk parts.
//!
//! A part is a directory `part_<id>/` holding a metadata file, a sparse
//! index, and per-column granule files:
//!
//! ```text
//! part_7/
//!   metadata.bin                 part id, key/timestamp ranges, counts
//!   primary.idx                  one index entry per granule
//!   granule_0_keys.bin
//!   granule_0_values.bin
//!   granule_0_timestamps.bin
//!   granule_1_keys.bin
//!   ...
//! ```
//!
//! Parts are written exactly once, by a memtable flush or a merge, and
//! never mutated afterwards. The metadata file is written last so a
//! directory only counts as a part once every other file is in place.
//! A part handle may be resident (granules in memory) or unloaded;
//! unloading never touches the directory.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::granule::Granule;
use crate::row::Row;
use crate::serialization;
use crate::sparse_index::SparseIndex;

const METADATA_FILE: &str = "metadata.bin";
const INDEX_FILE: &str = "primary.idx";

/// Summary of a part persisted as `metadata.bin`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartMetadata {
    pub part_id: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    pub row_count: u64,
    pub granule_count: u64,
    pub disk_size: u64,
    pub creation_time: u64,
}

impl PartMetadata {
    fn new(part_id: u64) -> Self {
        Self {
            part_id,
            ..Default::default()
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut buffer = Vec::new();
        serialization::write_u64(&mut buffer, self.part_id)?;
        serialization::write_bytes(&mut buffer, &self.min_key)?;
        serialization::write_bytes(&mut buffer, &self.max_key)?;
        serialization::write_u64(&mut buffer, self.min_timestamp)?;
        serialization::write_u64(&mut buffer, self.max_timestamp)?;
        serialization::write_u64(&mut buffer, self.row_count)?;
        serialization::write_u64(&mut buffer, self.granule_count)?;
        serialization::write_u64(&mut buffer, self.disk_size)?;
        serialization::write_u64(&mut buffer, self.creation_time)?;
        fs::write(path, buffer)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let mut cursor = Cursor::new(data.as_slice());

        Ok(Self {
            part_id: serialization::read_u64(&mut cursor, "metadata part_id")?,
            min_key: serialization::read_bytes(&mut cursor, "metadata min_key")?,
            max_key: serialization::read_bytes(&mut cursor, "metadata max_key")?,
            min_timestamp: serialization::read_u64(&mut cursor, "metadata min_timestamp")?,
            max_timestamp: serialization::read_u64(&mut cursor, "metadata max_timestamp")?,
            row_count: serialization::read_u64(&mut cursor, "metadata row_count")?,
            granule_count: serialization::read_u64(&mut cursor, "metadata granule_count")?,
            disk_size: serialization::read_u64(&mut cursor, "metadata disk_size")?,
            creation_time: serialization::read_u64(&mut cursor, "metadata creation_time")?,
        })
    }
}

#[derive(Debug)]
pub struct Part {
    metadata: PartMetadata,
    base_path: PathBuf,
    granules: Vec<Granule>,
    index: SparseIndex,
    loaded: bool,
}

impl Part {
    /// Creates a handle for a part that does not exist on disk yet.
    pub fn new(part_id: u64, base_path: impl Into<PathBuf>) -> Self {
        Self {
            metadata: PartMetadata::new(part_id),
            base_path: base_path.into(),
            granules: Vec::new(),
            index: SparseIndex::new(),
            loaded: false,
        }
    }

    /// Opens a handle for an existing part directory, eagerly reading its
    /// metadata so key-range pruning works before the first `load`.
    /// Granules and index stay on disk until queried.
    pub fn open_existing(part_id: u64, base_path: impl Into<PathBuf>) -> Result<Self> {
        let mut part = Self::new(part_id, base_path);
        part.metadata = PartMetadata::load(&part.metadata_path())?;
        Ok(part)
    }

    pub fn part_id(&self) -> u64 {
        self.metadata.part_id
    }

    pub fn metadata(&self) -> &PartMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn part_directory(&self) -> PathBuf {
        self.base_path.join(format!("part_{}", self.metadata.part_id))
    }

    fn metadata_path(&self) -> PathBuf {
        self.part_directory().join(METADATA_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.part_directory().join(INDEX_FILE)
    }

    /// Writes sealed granules as this part's on-disk contents.
    ///
    /// Sorts each granule (idempotent), computes metadata and the sparse
    /// index, then writes granule files, index, and metadata last. After
    /// a successful write the part is resident in memory.
    pub fn write_granules(&mut self, mut granules: Vec<Granule>) -> Result<()> {
        granules.retain(|granule| !granule.is_empty());
        if granules.is_empty() {
            return Err(Error::EmptyInput("part granules"));
        }

        let dir = self.part_directory();
        fs::create_dir_all(&dir)?;

        for granule in &mut granules {
            granule.sort();
        }

        self.update_metadata(&granules);
        self.build_index(&granules);

        for (i, granule) in granules.iter().enumerate() {
            serialization::write_granule(&dir, granule, i)?;
        }
        self.index.save_to_file(&self.index_path())?;

        self.metadata.disk_size = directory_size(&dir)?;
        self.metadata.save(&self.metadata_path())?;

        self.granules = granules;
        self.loaded = true;

        tracing::debug!(
            part_id = self.metadata.part_id,
            rows = self.metadata.row_count,
            granules = self.metadata.granule_count,
            "wrote part"
        );
        Ok(())
    }

    /// Sorts an unordered row vector, packs it into granules, and writes
    /// the result as this part's contents.
    pub fn write_from_memtable_rows(&mut self, mut rows: Vec<Row>) -> Result<()> {
        if rows.is_empty() {
            return Err(Error::EmptyInput("part rows"));
        }

        rows.sort();

        let mut granules = Vec::new();
        let mut current = Granule::new();
        for row in rows {
            if current.is_full() {
                current.sort();
                granules.push(std::mem::take(&mut current));
            }
            current.add_row(row)?;
        }
        if !current.is_empty() {
            current.sort();
            granules.push(current);
        }

        self.write_granules(granules)
    }

    /// Range query over this part. Prunes with the part's key range and
    /// the sparse index; loads the part lazily if needed.
    pub fn query(&mut self, start_key: &[u8], end_key: &[u8]) -> Result<Vec<Row>> {
        if !self.overlaps_range(start_key, end_key) {
            return Ok(Vec::new());
        }

        self.load()?;

        let mut result = Vec::new();
        for granule_index in self.index.find_granules(start_key, end_key) {
            if let Some(granule) = self.granules.get(granule_index) {
                result.extend(granule.query_range(start_key, end_key)?);
            }
        }
        Ok(result)
    }

    /// Reads metadata, sparse index, and all granules into memory.
    /// Idempotent.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        self.metadata = PartMetadata::load(&self.metadata_path())?;
        self.index = SparseIndex::load_from_file(&self.index_path())?;

        let dir = self.part_directory();
        self.granules.clear();
        self.granules.reserve(self.metadata.granule_count as usize);
        for i in 0..self.metadata.granule_count as usize {
            self.granules.push(serialization::read_granule(&dir, i)?);
        }

        self.loaded = true;
        Ok(())
    }

    /// Drops granules and index from memory, keeping metadata. The
    /// on-disk directory is untouched. Idempotent.
    pub fn unload(&mut self) {
        self.granules = Vec::new();
        self.index = SparseIndex::new();
        self.loaded = false;
    }

    pub fn exists_on_disk(&self) -> bool {
        self.part_directory().is_dir() && self.metadata_path().is_file()
    }

    /// Removes the part directory recursively; safe to call repeatedly.
    pub fn delete_from_disk(&mut self) -> Result<()> {
        let dir = self.part_directory();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.unload();
        Ok(())
    }

    pub fn disk_usage(&self) -> u64 {
        directory_size(&self.part_directory()).unwrap_or(0)
    }

    pub fn memory_usage(&self) -> usize {
        let header = std::mem::size_of::<Self>()
            + self.metadata.min_key.len()
            + self.metadata.max_key.len();
        if !self.loaded {
            return header;
        }

        header
            + self.index.memory_usage()
            + self
                .granules
                .iter()
                .map(Granule::memory_usage)
                .sum::<usize>()
    }

    pub fn overlaps_range(&self, start_key: &[u8], end_key: &[u8]) -> bool {
        !(self.metadata.max_key.as_slice() < start_key
            || self.metadata.min_key.as_slice() > end_key)
    }

    /// Returns every row of the part in `(key, timestamp)` order, loading
    /// it if necessary.
    pub fn get_all_rows(&mut self) -> Result<Vec<Row>> {
        self.load()?;

        let mut rows = Vec::with_capacity(self.metadata.row_count as usize);
        for granule in &self.granules {
            rows.extend_from_slice(granule.rows());
        }
        Ok(rows)
    }

    fn update_metadata(&mut self, granules: &[Granule]) {
        self.metadata.granule_count = granules.len() as u64;
        self.metadata.row_count = granules.iter().map(|g| g.size() as u64).sum();
        self.metadata.creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        // write_granules guarantees at least one non-empty granule here
        if let (Some(first), Some(last)) = (granules.first(), granules.last()) {
            self.metadata.min_key = first.min_key().to_vec();
            self.metadata.max_key = last.max_key().to_vec();
        }

        let mut min_ts = u64::MAX;
        let mut max_ts = 0;
        for granule in granules {
            for row in granule.rows() {
                min_ts = min_ts.min(row.timestamp);
                max_ts = max_ts.max(row.timestamp);
            }
        }
        self.metadata.min_timestamp = min_ts;
        self.metadata.max_timestamp = max_ts;
    }

    fn build_index(&mut self, granules: &[Granule]) {
        self.index = SparseIndex::new();
        for (i, granule) in granules.iter().enumerate() {
            self.index.add_entry(
                granule.min_key().to_vec(),
                granule.max_key().to_vec(),
                i,
                granule.size(),
            );
        }
    }
}

fn directory_size(dir: &Path) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granule::GRANULE_SIZE;
    use tempfile::TempDir;

    fn row(key: &str, value: &str, ts: u64) -> Row {
        Row::new(key.as_bytes().to_vec(), value.as_bytes().to_vec(), ts)
    }

    fn write_test_part(dir: &Path, part_id: u64, rows: Vec<Row>) -> Part {
        let mut part = Part::new(part_id, dir);
        part.write_from_memtable_rows(rows).unwrap();
        part
    }

    #[test]
    fn test_write_and_query() {
        let dir = TempDir::new().unwrap();
        let mut part = write_test_part(
            dir.path(),
            1,
            vec![
                row("cherry", "3", 30),
                row("apple", "1", 10),
                row("banana", "2", 20),
            ],
        );

        let rows = part.query(b"apple", b"banana").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, b"apple");
        assert_eq!(rows[1].key, b"banana");

        assert!(part.query(b"x", b"z").unwrap().is_empty());
    }

    #[test]
    fn test_empty_input_rejected() {
        let dir = TempDir::new().unwrap();
        let mut part = Part::new(1, dir.path());
        assert!(matches!(
            part.write_from_memtable_rows(Vec::new()),
            Err(Error::EmptyInput(_))
        ));
        assert!(matches!(
            part.write_granules(Vec::new()),
            Err(Error::EmptyInput(_))
        ));
        assert!(!part.exists_on_disk());
    }

    #[test]
    fn test_metadata_consistency() {
        let dir = TempDir::new().unwrap();
        let part = write_test_part(
            dir.path(),
            3,
            vec![row("b", "x", 5), row("a", "y", 9), row("c", "z", 1)],
        );

        let meta = part.metadata();
        assert_eq!(meta.part_id, 3);
        assert_eq!(meta.min_key, b"a");
        assert_eq!(meta.max_key, b"c");
        assert_eq!(meta.min_timestamp, 1);
        assert_eq!(meta.max_timestamp, 9);
        assert_eq!(meta.row_count, 3);
        assert_eq!(meta.granule_count, 1);
        // disk_size counts the granule and index files; the full
        // directory additionally holds metadata.bin.
        assert!(meta.disk_size > 0);
        assert!(meta.disk_size <= part.disk_usage());
    }

    #[test]
    fn test_multi_granule_part() {
        let dir = TempDir::new().unwrap();
        let total = GRANULE_SIZE + 100;
        let rows: Vec<Row> = (0..total)
            .map(|i| row(&format!("key{i:06}"), "v", i as u64))
            .collect();

        let mut part = write_test_part(dir.path(), 1, rows);

        let meta = part.metadata();
        assert_eq!(meta.granule_count, 2);
        assert_eq!(meta.row_count, total as u64);
        assert_eq!(part.index().len(), 2);
        assert_eq!(part.index().entries()[0].row_count, GRANULE_SIZE);

        // Column file triples exist for both granules.
        for i in 0..2 {
            for column in ["keys", "values", "timestamps"] {
                assert!(part
                    .part_directory()
                    .join(format!("granule_{i}_{column}.bin"))
                    .is_file());
            }
        }

        // A query into the second granule only touches rows in range.
        let probe = format!("key{:06}", GRANULE_SIZE + 50);
        let rows = part.query(probe.as_bytes(), probe.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, probe.as_bytes());
    }

    #[test]
    fn test_load_unload_cycle() {
        let dir = TempDir::new().unwrap();
        let mut part = write_test_part(dir.path(), 2, vec![row("k", "v", 1)]);
        assert!(part.is_loaded());
        let loaded_usage = part.memory_usage();

        part.unload();
        assert!(!part.is_loaded());
        assert!(part.memory_usage() < loaded_usage);
        // Metadata survives an unload.
        assert_eq!(part.metadata().row_count, 1);

        part.load().unwrap();
        part.load().unwrap();
        assert!(part.is_loaded());
        assert_eq!(part.query(b"k", b"k").unwrap().len(), 1);
    }

    #[test]
    fn test_open_existing_prunes_before_load() {
        let dir = TempDir::new().unwrap();
        write_test_part(dir.path(), 7, vec![row("m", "v", 1)]);

        let mut reopened = Part::open_existing(7, dir.path()).unwrap();
        assert!(!reopened.is_loaded());
        assert!(reopened.overlaps_range(b"a", b"z"));
        assert!(!reopened.overlaps_range(b"n", b"z"));

        // Non-overlapping query answers without loading granules.
        assert!(reopened.query(b"n", b"z").unwrap().is_empty());
        assert!(!reopened.is_loaded());

        let rows = reopened.query(b"a", b"z").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(reopened.is_loaded());
    }

    #[test]
    fn test_delete_from_disk_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let mut part = write_test_part(dir.path(), 4, vec![row("k", "v", 1)]);
        assert!(part.exists_on_disk());

        part.delete_from_disk().unwrap();
        assert!(!part.exists_on_disk());
        assert_eq!(part.disk_usage(), 0);

        part.delete_from_disk().unwrap();
    }

    #[test]
    fn test_duplicates_not_collapsed_within_part() {
        let dir = TempDir::new().unwrap();
        let mut part = write_test_part(
            dir.path(),
            5,
            vec![row("k", "v", 7), row("k", "v", 7), row("k", "w", 8)],
        );

        // Parts store what they were given; deduplication happens above.
        assert_eq!(part.query(b"k", b"k").unwrap().len(), 3);
    }
}
