use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::iterator::merge::MergeIterator;
use crate::sstable::{SSTable, SSTableBuilder, SSTableMeta, table_file_name, temp_table_file_name};
use crate::types::ValueType;

/// Merge the candidate SSTables into one new table.
///
/// A k-way merge over the candidates' sorted streams: for each key, only
/// the entry with the highest sequence number survives. A winning tombstone
/// is dropped from the output only when `drop_tombstones` holds — the
/// caller asserts that the candidate set includes every table in which an
/// older version of the key could still reside. With candidates that are a
/// proper subset of the catalog the tombstone must be kept, or a deleted
/// key would reappear from an older table.
///
/// The output is written under a `.tmp` name and renamed into place after
/// its fsync, so a crash mid-merge leaves only an orphan the next open
/// deletes; the catalog is untouched until the caller commits the swap in
/// the manifest. Compaction never touches the MemTable or the WAL.
pub fn compact(
    dir: &Path,
    candidates: &[Arc<SSTable>],
    output_generation: u64,
    block_size: usize,
    bloom_fpr: f64,
    drop_tombstones: bool,
) -> Result<Option<SSTableMeta>> {
    let tmp_path = dir.join(temp_table_file_name(output_generation));
    let final_path = dir.join(table_file_name(output_generation));

    let expected: usize = candidates
        .iter()
        .map(|t| t.meta().entry_count as usize)
        .sum();

    let mut sources: Vec<Box<dyn StorageIterator + '_>> = Vec::with_capacity(candidates.len());
    for table in candidates {
        sources.push(Box::new(table.iter()?));
    }
    let mut merged = MergeIterator::new(sources)?;

    let mut builder =
        SSTableBuilder::new(&tmp_path, output_generation, block_size, expected, bloom_fpr)?;
    let mut written = 0u64;
    let mut dropped = 0u64;

    while merged.is_valid() {
        if drop_tombstones && merged.value_type() == ValueType::Delete {
            dropped += 1;
        } else {
            builder.add(
                merged.key(),
                merged.sequence(),
                merged.value_type(),
                merged.value(),
            )?;
            written += 1;
        }
        merged.next()?;
    }

    let meta = builder.finish()?;

    // Nothing survived: every entry was a dropped tombstone or shadowed.
    // Discard the empty output; the caller commits a removal-only swap.
    if written == 0 {
        fs::remove_file(&tmp_path)?;
        info!(
            inputs = candidates.len(),
            tombstones_dropped = dropped,
            "compaction produced no surviving entries"
        );
        return Ok(None);
    }

    fs::rename(&tmp_path, &final_path)?;

    info!(
        inputs = candidates.len(),
        output = output_generation,
        entries = written,
        tombstones_dropped = dropped,
        "compaction wrote merged table"
    );

    Ok(Some(meta))
}
