//! # LSM-Tree Key-Value Store
//!
//! An embedded, durable key-value store using the Log-Structured Merge-Tree
//! design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes — 100-1000x faster
//! on real hardware.
//!
//! Every mutation lands in the write-ahead log before it is applied to the
//! in-memory table, so an unclean shutdown replays back to the last
//! acknowledged write. Flush and compaction run on a background worker and
//! commit through an atomic manifest rewrite; a crash mid-flush or
//! mid-compaction leaves the previous catalog intact.

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use db::{Options, Stats, Store};
pub use error::{Error, Result};
