//! # GraniteDB
//!
//! An embedded, single-node, MergeTree-style storage engine: an
//! append-only column-oriented store for `(key, value, timestamp)` rows.
//! Writes are buffered in a concurrent ordered memtable, flushed as
//! immutable sorted parts made of fixed-size row granules, and compacted
//! in the background so read fan-out stays bounded.
//!
//! ```text
//!   insert ──► MemTable ──(threshold)──► flush ──► Part
//!                                                    │
//!                                        (part count policy)
//!                                                    ▼
//!                                     Merger ──► merged Part
//!
//!   query(start, end) = MemTable.range ∪ { Part.query | Part overlaps }
//!                       sorted by (key, timestamp), deduplicated
//! ```
//!
//! Each part is a directory of column files in 8192-row granules plus a
//! sparse `[min_key, max_key]` index used to prune granules during range
//! scans. Parts are immutable: merges write a new part and delete their
//! inputs.
//!
//! There is no write-ahead log: the memtable is volatile and durability
//! begins at [`Engine::flush_memtable`]. The data directory is
//! single-writer; one process owns it at a time.
//!
//! # Example
//!
//! ```no_run
//! use granitedb::{Config, Engine};
//!
//! # fn main() -> granitedb::Result<()> {
//! let engine = Engine::open_with_config(
//!     "./data",
//!     Config::default().memtable_flush_threshold(10_000),
//! )?;
//!
//! engine.insert(b"sensor/1", b"21.5", 1000)?;
//! engine.insert(b"sensor/2", b"19.0", 1001)?;
//!
//! for row in engine.query(b"sensor/", b"sensor0")? {
//!     println!("{:?} @ {}", row.key, row.timestamp);
//! }
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod granule;
pub mod memtable;
pub mod merger;
pub mod part;
pub mod row;
pub mod serialization;
pub mod sparse_index;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use granule::GRANULE_SIZE;
pub use row::Row;
