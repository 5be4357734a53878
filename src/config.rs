use std::time::Duration;

/// Configuration for the storage engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of buffered rows that triggers a memtable flush (default: 1000)
    pub memtable_flush_threshold: usize,

    /// Part count above which merges are triggered (default: 10)
    pub max_parts: usize,

    /// How long the background worker sleeps between merge rounds (default: 30s)
    pub merge_interval: Duration,

    /// Whether to run the background merge thread (default: true)
    pub enable_background_merge: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_flush_threshold: 1000,
            max_parts: 10,
            merge_interval: Duration::from_secs(30),
            enable_background_merge: true,
        }
    }
}

impl Config {
    /// Set the memtable flush threshold in rows
    pub fn memtable_flush_threshold(mut self, rows: usize) -> Self {
        self.memtable_flush_threshold = rows;
        self
    }

    /// Set the part count that triggers merging
    pub fn max_parts(mut self, parts: usize) -> Self {
        self.max_parts = parts;
        self
    }

    /// Set the background merge interval
    pub fn merge_interval(mut self, interval: Duration) -> Self {
        self.merge_interval = interval;
        self
    }

    /// Enable or disable the background merge thread
    pub fn enable_background_merge(mut self, enabled: bool) -> Self {
        self.enable_background_merge = enabled;
        self
    }
}
