// Compaction tests
// K-way merge of SSTables: newest-wins, tombstone GC, crash-safe output.

use std::sync::Arc;

use lsm_kv::compaction::compact;
use lsm_kv::iterator::StorageIterator;
use lsm_kv::sstable::{SSTable, SSTableBuilder, table_file_name};
use lsm_kv::types::ValueType;

fn build_table(
    dir: &std::path::Path,
    generation: u64,
    entries: &[(&[u8], u64, ValueType, &[u8])],
) -> Arc<SSTable> {
    let path = dir.join(table_file_name(generation));
    let mut builder = SSTableBuilder::new(&path, generation, 4096, entries.len(), 0.01).unwrap();
    for (key, sequence, value_type, value) in entries {
        builder.add(key, *sequence, *value_type, value).unwrap();
    }
    builder.finish().unwrap();
    Arc::new(SSTable::open(&path).unwrap())
}

fn scan(table: &SSTable) -> Vec<(Vec<u8>, u64, ValueType, Vec<u8>)> {
    let mut iter = table.iter().unwrap();
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((
            iter.key().to_vec(),
            iter.sequence(),
            iter.value_type(),
            iter.value().to_vec(),
        ));
        iter.next().unwrap();
    }
    out
}

// =============================================================================
// Test 1: Highest sequence wins for duplicated keys
// =============================================================================
#[test]
fn newest_version_wins_across_tables() {
    let dir = tempfile::tempdir().unwrap();
    let old = build_table(
        dir.path(),
        1,
        &[
            (b"a", 1, ValueType::Put, b"a_old"),
            (b"b", 2, ValueType::Put, b"b_only"),
        ],
    );
    let new = build_table(
        dir.path(),
        2,
        &[
            (b"a", 5, ValueType::Put, b"a_new"),
            (b"c", 6, ValueType::Put, b"c_only"),
        ],
    );

    let meta = compact(dir.path(), &[old, new], 3, 4096, 0.01, true)
        .unwrap()
        .unwrap();
    assert_eq!(meta.entry_count, 3);

    let merged = SSTable::open(&dir.path().join(table_file_name(3))).unwrap();
    let entries = scan(&merged);
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), 5, ValueType::Put, b"a_new".to_vec()),
            (b"b".to_vec(), 2, ValueType::Put, b"b_only".to_vec()),
            (b"c".to_vec(), 6, ValueType::Put, b"c_only".to_vec()),
        ]
    );
}

// =============================================================================
// Test 2: Tombstones are dropped in a full merge...
// =============================================================================
#[test]
fn full_merge_drops_tombstones_and_shadowed_values() {
    let dir = tempfile::tempdir().unwrap();
    let old = build_table(
        dir.path(),
        1,
        &[
            (b"dead", 1, ValueType::Put, b"value"),
            (b"kept", 2, ValueType::Put, b"still_here"),
        ],
    );
    let new = build_table(dir.path(), 2, &[(b"dead", 9, ValueType::Delete, b"")]);

    let meta = compact(dir.path(), &[old, new], 3, 4096, 0.01, true)
        .unwrap()
        .unwrap();
    assert_eq!(meta.entry_count, 1);

    let merged = SSTable::open(&dir.path().join(table_file_name(3))).unwrap();
    assert!(merged.get(b"dead").unwrap().is_none());
    assert_eq!(merged.get(b"kept").unwrap().unwrap().value, b"still_here");
}

// =============================================================================
// Test 3: ...but kept in a partial merge, or deletes would un-happen
// =============================================================================
#[test]
fn partial_merge_keeps_tombstones() {
    let dir = tempfile::tempdir().unwrap();
    // An even older table, NOT part of the merge, still holds the key.
    let _oldest = build_table(dir.path(), 1, &[(b"dead", 1, ValueType::Put, b"zombie")]);
    let mid = build_table(dir.path(), 2, &[(b"dead", 4, ValueType::Put, b"newer")]);
    let new = build_table(dir.path(), 3, &[(b"dead", 9, ValueType::Delete, b"")]);

    let meta = compact(dir.path(), &[mid, new], 4, 4096, 0.01, false)
        .unwrap()
        .unwrap();
    assert_eq!(meta.entry_count, 1);

    let merged = SSTable::open(&dir.path().join(table_file_name(4))).unwrap();
    let version = merged.get(b"dead").unwrap().unwrap();
    assert!(version.is_tombstone());
    assert_eq!(version.sequence, 9);
}

// =============================================================================
// Test 4: A merge that only drops tombstones produces no output
// =============================================================================
#[test]
fn all_tombstone_merge_produces_no_table() {
    let dir = tempfile::tempdir().unwrap();
    let a = build_table(dir.path(), 1, &[(b"x", 1, ValueType::Put, b"v")]);
    let b = build_table(dir.path(), 2, &[(b"x", 2, ValueType::Delete, b"")]);

    let meta = compact(dir.path(), &[a, b], 3, 4096, 0.01, true).unwrap();
    assert!(meta.is_none());
    assert!(!dir.path().join(table_file_name(3)).exists());
    assert!(!dir.path().join("000003.sst.tmp").exists());
}

// =============================================================================
// Test 5: Many tables, interleaved key ranges, order preserved
// =============================================================================
#[test]
fn merged_output_is_sorted_and_complete() {
    let dir = tempfile::tempdir().unwrap();

    let mut tables = Vec::new();
    for t in 0..4u64 {
        let entries: Vec<(Vec<u8>, u64)> = (0..25u64)
            .map(|i| {
                let k = i * 4 + t; // interleave key space across tables
                (format!("key_{k:04}").into_bytes(), t * 100 + i + 1)
            })
            .collect();
        let path = dir.path().join(table_file_name(t + 1));
        let mut builder = SSTableBuilder::new(&path, t + 1, 256, entries.len(), 0.01).unwrap();
        for (key, seq) in &entries {
            builder.add(key, *seq, ValueType::Put, b"v").unwrap();
        }
        builder.finish().unwrap();
        tables.push(Arc::new(SSTable::open(&path).unwrap()));
    }

    let meta = compact(dir.path(), &tables, 9, 256, 0.01, true)
        .unwrap()
        .unwrap();
    assert_eq!(meta.entry_count, 100);

    let merged = SSTable::open(&dir.path().join(table_file_name(9))).unwrap();
    let entries = scan(&merged);
    assert_eq!(entries.len(), 100);
    for window in entries.windows(2) {
        assert!(window[0].0 < window[1].0);
    }
}
