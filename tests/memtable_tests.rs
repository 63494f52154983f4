// MemTable tests
// The in-memory write buffer: versions, tombstones, threshold, ordering.

use lsm_kv::iterator::StorageIterator;
use lsm_kv::memtable::MemTable;
use lsm_kv::types::ValueType;

// =============================================================================
// Test 1: Basic put and get
// =============================================================================
#[test]
fn put_then_get_returns_version() {
    let mut mt = MemTable::new(1024);
    mt.put(b"key".to_vec(), b"value".to_vec(), 1);

    let version = mt.get(b"key").unwrap();
    assert_eq!(version.value, b"value");
    assert_eq!(version.sequence, 1);
    assert!(!version.is_tombstone());
}

// =============================================================================
// Test 2: Get non-existent key
// =============================================================================
#[test]
fn get_nonexistent_returns_none() {
    let mt = MemTable::new(1024);
    assert!(mt.is_empty());
    assert!(mt.get(b"missing").is_none());
}

// =============================================================================
// Test 3: Delete leaves a visible tombstone
// =============================================================================
// The read path needs to SEE the tombstone: "deleted here" stops the
// lookup, while "unknown here" falls through to older sources.
#[test]
fn delete_leaves_tombstone_version() {
    let mut mt = MemTable::new(1024);
    mt.put(b"key".to_vec(), b"value".to_vec(), 1);
    mt.delete(b"key".to_vec(), 2);

    let version = mt.get(b"key").unwrap();
    assert!(version.is_tombstone());
    assert_eq!(version.sequence, 2);
}

// =============================================================================
// Test 4: Put after delete returns the new value
// =============================================================================
#[test]
fn put_delete_put_returns_new_value() {
    let mut mt = MemTable::new(1024);
    mt.put(b"key".to_vec(), b"first".to_vec(), 1);
    mt.delete(b"key".to_vec(), 2);
    mt.put(b"key".to_vec(), b"second".to_vec(), 3);

    let version = mt.get(b"key").unwrap();
    assert_eq!(version.value, b"second");
    assert_eq!(version.sequence, 3);
}

// =============================================================================
// Test 5: Delete on non-existent key still writes a tombstone
// =============================================================================
#[test]
fn delete_nonexistent_key_succeeds() {
    let mut mt = MemTable::new(1024);
    mt.delete(b"never_existed".to_vec(), 1);

    assert!(mt.get(b"never_existed").unwrap().is_tombstone());
    assert_eq!(mt.len(), 1);
}

// =============================================================================
// Test 6: An empty value is a value, not an absence
// =============================================================================
#[test]
fn empty_value_is_distinct_from_missing() {
    let mut mt = MemTable::new(1024);
    mt.put(b"empty".to_vec(), Vec::new(), 1);

    let version = mt.get(b"empty").unwrap();
    assert!(!version.is_tombstone());
    assert!(version.value.is_empty());
}

// =============================================================================
// Test 7: Entry-count threshold
// =============================================================================
#[test]
fn is_full_when_entry_count_reaches_threshold() {
    let mut mt = MemTable::new(3);
    assert!(!mt.is_full());

    mt.put(b"a".to_vec(), b"1".to_vec(), 1);
    mt.put(b"b".to_vec(), b"2".to_vec(), 2);
    assert!(!mt.is_full());

    mt.put(b"c".to_vec(), b"3".to_vec(), 3);
    assert!(mt.is_full());

    // Overwrites don't grow the count
    let mut mt = MemTable::new(3);
    mt.put(b"a".to_vec(), b"1".to_vec(), 1);
    mt.put(b"a".to_vec(), b"2".to_vec(), 2);
    assert_eq!(mt.len(), 1);
    assert!(!mt.is_full());
}

// =============================================================================
// Test 8: Iterator yields sorted keys and includes tombstones
// =============================================================================
// When flushing to an SSTable we MUST include tombstones so they propagate
// to disk and keep shadowing older values.
#[test]
fn iterator_sorted_and_includes_tombstones() {
    let mut mt = MemTable::new(1024);
    mt.put(b"c".to_vec(), b"value_c".to_vec(), 1);
    mt.put(b"a".to_vec(), b"value_a".to_vec(), 2);
    mt.delete(b"b".to_vec(), 3);

    let mut iter = mt.iter();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push((iter.key().to_vec(), iter.value_type(), iter.sequence()));
        iter.next().unwrap();
    }

    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], (b"a".to_vec(), ValueType::Put, 2));
    assert_eq!(seen[1], (b"b".to_vec(), ValueType::Delete, 3));
    assert_eq!(seen[2], (b"c".to_vec(), ValueType::Put, 1));
}
