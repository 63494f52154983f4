// Recovery tests
// Rebuilding store state from whatever a previous process left on disk.

use lsm_kv::wal::WalRecord;
use lsm_kv::{Options, Store};

fn options(memtable_threshold: usize, compaction_threshold: usize) -> Options {
    Options {
        memtable_threshold,
        compaction_threshold,
        ..Default::default()
    }
}

// =============================================================================
// Test 1: Unflushed writes come back from the WAL
// =============================================================================
#[test]
fn recovery_from_wal() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(100, 100)).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.remove("a").unwrap();
        // Dropped without any flush: everything lives in the WAL
    }

    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    assert_eq!(store.get("a").unwrap(), None); // tombstone replayed too
    assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));

    // Sequence counter resumes past the three replayed writes
    assert_eq!(store.stats().next_sequence, 4);
}

// =============================================================================
// Test 2: Flushed writes come back from SSTables
// =============================================================================
#[test]
fn recovery_from_sstables() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(2, 100)).unwrap();
        for i in 0..6 {
            store.set(format!("key{i}"), format!("val{i}")).unwrap();
        }
        store.close().unwrap();
    }

    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    let stats = store.stats();
    assert_eq!(stats.sstables, 3);
    assert_eq!(stats.memtable_entries, 0); // WAL segments were all retired

    for i in 0..6 {
        assert_eq!(
            store.get(format!("key{i}")).unwrap(),
            Some(format!("val{i}").into_bytes())
        );
    }
}

// =============================================================================
// Test 3: WAL replay and SSTables combine
// =============================================================================
#[test]
fn recovery_combines_wal_and_sstables() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(1, 100)).unwrap();
        store.set("flushed", "in_sst").unwrap();
        store.close().unwrap();
    }
    {
        let store = Store::open(dir.path(), options(100, 100)).unwrap();
        store.set("pending", "in_wal").unwrap();
    }

    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    assert_eq!(store.get("flushed").unwrap(), Some(b"in_sst".to_vec()));
    assert_eq!(store.get("pending").unwrap(), Some(b"in_wal".to_vec()));
}

// =============================================================================
// Test 4: Torn write at the WAL tail is discarded, prefix survives
// =============================================================================
#[test]
fn torn_wal_tail_recovers_prefix() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(100, 100)).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.set("c", "3").unwrap();
    }

    // Simulate a crash mid-append: cut into the final record
    let wal_path = dir.path().join("wal-000001.log");
    let len = std::fs::metadata(&wal_path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len - 3).unwrap();

    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.get("c").unwrap(), None);

    // The truncated segment accepts appends again
    store.set("d", "4").unwrap();
    drop(store);
    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    assert_eq!(store.get("d").unwrap(), Some(b"4".to_vec()));
}

// =============================================================================
// Test 5: Corruption in the middle of the WAL refuses to open
// =============================================================================
#[test]
fn mid_wal_corruption_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(100, 100)).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.set("c", "3").unwrap();
    }

    // Flip a CRC byte of the SECOND record; a third follows it
    let wal_path = dir.path().join("wal-000001.log");
    let mut raw = std::fs::read(&wal_path).unwrap();
    let offset = WalRecord::put(1, b"a".to_vec(), b"1".to_vec()).encoded_size();
    raw[offset] ^= 0x01;
    std::fs::write(&wal_path, &raw).unwrap();

    assert!(Store::open(dir.path(), options(100, 100)).is_err());
}

// =============================================================================
// Test 6: Files the manifest doesn't vouch for are swept at open
// =============================================================================
#[test]
fn unregistered_artifacts_are_removed() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(1, 100)).unwrap();
        store.set("real", "data").unwrap();
        store.close().unwrap();
    }

    // A table written but never committed (crash between rename and
    // manifest rewrite), plus an interrupted tmp write
    std::fs::write(dir.path().join("000099.sst"), vec![0xCD; 256]).unwrap();
    std::fs::write(dir.path().join("000050.sst.tmp"), vec![0xCD; 64]).unwrap();

    let store = Store::open(dir.path(), options(100, 100)).unwrap();
    assert!(!dir.path().join("000099.sst").exists());
    assert!(!dir.path().join("000050.sst.tmp").exists());
    assert_eq!(store.get("real").unwrap(), Some(b"data".to_vec()));
}

// =============================================================================
// Test 7: A manifest-listed table that is missing is fatal
// =============================================================================
#[test]
fn missing_registered_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(1, 100)).unwrap();
        store.set("k", "v").unwrap();
        store.close().unwrap();
    }

    std::fs::remove_file(dir.path().join("000001.sst")).unwrap();

    assert!(Store::open(dir.path(), options(100, 100)).is_err());
}

// =============================================================================
// Test 8: Recovered memtable above the threshold is legal
// =============================================================================
#[test]
fn oversized_recovered_memtable_flushes_on_next_write() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Store::open(dir.path(), options(100, 100)).unwrap();
        for i in 0..10 {
            store.set(format!("key{i}"), "v").unwrap();
        }
    }

    // Reopen with a much smaller threshold: the rebuilt memtable already
    // exceeds it, which must not flush synchronously during open.
    let store = Store::open(dir.path(), options(4, 100)).unwrap();
    assert_eq!(store.stats().memtable_entries, 10);
    assert_eq!(store.stats().sstables, 0);

    // The next write rotates it
    store.set("trigger", "now").unwrap();
    store.sync().unwrap();
    assert_eq!(store.stats().sstables, 1);
    assert_eq!(store.stats().memtable_entries, 0);

    for i in 0..10 {
        assert_eq!(store.get(format!("key{i}")).unwrap(), Some(b"v".to_vec()));
    }
}
