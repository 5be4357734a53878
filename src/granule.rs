use crate::error::{Error, Result};
use crate::row::Row;

/// Number of rows a granule may hold. Matches the MergeTree family's
/// fundamental block size.
pub const GRANULE_SIZE: usize = 8192;

/// A bounded block of rows, the unit of indexing and on-disk layout.
///
/// A granule is created empty, filled by [`add_row`](Granule::add_row),
/// sealed with a single [`sort`](Granule::sort), and read-only afterwards.
/// The key range is cached so index construction never re-scans rows.
#[derive(Debug, Clone)]
pub struct Granule {
    rows: Vec<Row>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    sorted: bool,
}

impl Granule {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            min_key: Vec::new(),
            max_key: Vec::new(),
            sorted: false,
        }
    }

    /// Appends a row, failing with [`Error::GranuleFull`] at capacity.
    pub fn add_row(&mut self, row: Row) -> Result<()> {
        if self.is_full() {
            return Err(Error::GranuleFull);
        }

        if self.rows.is_empty() {
            self.min_key = row.key.clone();
            self.max_key = row.key.clone();
        } else {
            if row.key < self.min_key {
                self.min_key = row.key.clone();
            }
            if row.key > self.max_key {
                self.max_key = row.key.clone();
            }
        }

        self.rows.push(row);
        self.sorted = false;
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= GRANULE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Sorts rows into `(key, timestamp)` order. Idempotent; after the
    /// first call the cached key range is canonical.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.rows.sort();
            self.sorted = true;
            if let (Some(first), Some(last)) = (self.rows.first(), self.rows.last()) {
                self.min_key = first.key.clone();
                self.max_key = last.key.clone();
            }
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns every row with `start <= key <= end`, in row order.
    ///
    /// Requires the granule to be sorted; the scan stops at the first key
    /// past `end`.
    pub fn query_range(&self, start_key: &[u8], end_key: &[u8]) -> Result<Vec<Row>> {
        if !self.sorted {
            return Err(Error::NotSorted);
        }

        let mut result = Vec::new();
        for row in &self.rows {
            if row.key.as_slice() > end_key {
                break;
            }
            if row.key.as_slice() >= start_key {
                result.push(row.clone());
            }
        }
        Ok(result)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.rows.iter().map(Row::encoded_size).sum::<usize>()
    }
}

impl Default for Granule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &[u8], ts: u64) -> Row {
        Row::new(key.to_vec(), b"v".to_vec(), ts)
    }

    #[test]
    fn test_add_and_key_range() {
        let mut granule = Granule::new();
        granule.add_row(row(b"m", 1)).unwrap();
        granule.add_row(row(b"a", 2)).unwrap();
        granule.add_row(row(b"z", 3)).unwrap();

        assert_eq!(granule.size(), 3);
        assert_eq!(granule.min_key(), b"a");
        assert_eq!(granule.max_key(), b"z");
    }

    #[test]
    fn test_full_granule_rejects_rows() {
        let mut granule = Granule::new();
        for i in 0..GRANULE_SIZE {
            granule.add_row(row(format!("key{i:05}").as_bytes(), 0)).unwrap();
        }
        assert!(granule.is_full());
        assert!(matches!(
            granule.add_row(row(b"overflow", 0)),
            Err(Error::GranuleFull)
        ));
    }

    #[test]
    fn test_query_requires_sort() {
        let mut granule = Granule::new();
        granule.add_row(row(b"b", 1)).unwrap();
        assert!(matches!(
            granule.query_range(b"a", b"z"),
            Err(Error::NotSorted)
        ));

        granule.sort();
        let rows = granule.query_range(b"a", b"z").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_sort_orders_same_key_by_timestamp() {
        let mut granule = Granule::new();
        granule.add_row(row(b"k", 9)).unwrap();
        granule.add_row(row(b"k", 1)).unwrap();
        granule.add_row(row(b"a", 5)).unwrap();
        granule.sort();

        let keys: Vec<(&[u8], u64)> = granule
            .rows()
            .iter()
            .map(|r| (r.key.as_slice(), r.timestamp))
            .collect();
        assert_eq!(
            keys,
            vec![(b"a".as_slice(), 5), (b"k".as_slice(), 1), (b"k".as_slice(), 9)]
        );
    }

    #[test]
    fn test_query_range_bounds_inclusive() {
        let mut granule = Granule::new();
        for key in [b"a", b"b", b"c", b"d"] {
            granule.add_row(row(key, 0)).unwrap();
        }
        granule.sort();

        let rows = granule.query_range(b"b", b"c").unwrap();
        let keys: Vec<&[u8]> = rows.iter().map(|r| r.key.as_slice()).collect();
        assert_eq!(keys, vec![b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn test_sort_idempotent() {
        let mut granule = Granule::new();
        granule.add_row(row(b"b", 1)).unwrap();
        granule.add_row(row(b"a", 1)).unwrap();
        granule.sort();
        let before: Vec<Row> = granule.rows().to_vec();
        granule.sort();
        assert_eq!(granule.rows(), before.as_slice());
    }
}
