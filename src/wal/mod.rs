pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{Replay, WalReader};
pub use record::WalRecord;
pub use writer::{WalManager, WalWriter};

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: zero data loss, ~10x slower (each fsync waits for disk)
///   - EveryNWrites: batched durability, lose up to N-1 acknowledged
///     writes on crash
///
/// The store defaults to EveryWrite: an acknowledged `set`/`remove` is on
/// disk before the call returns. RocksDB defaults to NOT fsync'ing WAL (!),
/// letting the OS decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every record. Safest, slowest.
    EveryWrite,
    /// fsync every N records. Batched durability.
    EveryNWrites(usize),
}
