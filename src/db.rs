use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::compaction;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::manifest::Manifest;
use crate::memtable::MemTable;
use crate::sstable::{SSTable, SSTableBuilder, parse_table_file_name, table_file_name,
                     temp_table_file_name};
use crate::types::{ValueType, Version};
use crate::wal::writer::segment_paths;
use crate::wal::{SyncPolicy, WalManager, WalReader, WalRecord};

/// Tuning knobs for a store. The two thresholds are counts, not byte sizes:
/// the first bounds the memtable (flush trigger), the second bounds the
/// number of live SSTables (compaction trigger). Exposing them as named
/// fields keeps them independently testable.
#[derive(Debug, Clone)]
pub struct Options {
    /// Entry count at which the active memtable rotates to the flush queue.
    pub memtable_threshold: usize,
    /// Live SSTable count at which the catalog is compacted into one table.
    pub compaction_threshold: usize,
    /// WAL durability discipline. The default acknowledges a write only
    /// after fsync.
    pub sync_policy: SyncPolicy,
    /// Target SSTable data block size in bytes.
    pub block_size: usize,
    /// Bloom filter false positive rate for new SSTables.
    pub bloom_false_positive_rate: f64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            memtable_threshold: 1024,
            compaction_threshold: 8,
            sync_policy: SyncPolicy::EveryWrite,
            block_size: 4096,
            bloom_false_positive_rate: 0.01,
        }
    }
}

impl Options {
    fn validate(&self) -> Result<()> {
        if self.memtable_threshold == 0 {
            return Err(Error::Config("memtable_threshold must be at least 1".into()));
        }
        if self.compaction_threshold == 0 {
            return Err(Error::Config(
                "compaction_threshold must be at least 1".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be nonzero".into()));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(Error::Config(
                "bloom_false_positive_rate must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// A point-in-time snapshot of store internals, for tests and monitoring.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Entries in the active memtable (tombstones included).
    pub memtable_entries: usize,
    /// Drained memtables waiting for flush.
    pub immutable_memtables: usize,
    /// Live SSTables in the catalog.
    pub sstables: usize,
    /// Sequence number the next write will get.
    pub next_sequence: u64,
}

/// Work handed to the background thread.
enum Job {
    /// Serialize a drained memtable to an SSTable, then delete the WAL
    /// segments it covers.
    Flush {
        memtable: Arc<MemTable>,
        wal_segments: Vec<PathBuf>,
    },
    /// Acknowledge once every job queued before this one has committed.
    Barrier(Sender<()>),
}

/// State owned by the write path, under one mutex: sequence assignment,
/// WAL appends and segment rotation happen in write order or not at all.
struct WriteState {
    wal: WalManager,
    next_sequence: u64,
}

struct Inner {
    dir: PathBuf,
    options: Options,
    write: Mutex<WriteState>,
    /// Active memtable; the only structure mutated by writers.
    active: RwLock<MemTable>,
    /// Drained memtables waiting for flush, oldest first. Reads consult
    /// them newest-first so a drained-but-unflushed entry stays visible.
    imms: RwLock<Vec<Arc<MemTable>>>,
    /// Live SSTables, ascending generation id (newest last). Readers clone
    /// the Arc handles, so a concurrent compaction commit can never pull a
    /// file out from under an in-flight lookup.
    catalog: RwLock<Vec<Arc<SSTable>>>,
    manifest: Mutex<Manifest>,
    next_generation: AtomicU64,
    /// First error from the background worker. Once set it stays set: the
    /// store fails every later write and sync, and the worker stops
    /// flushing, because committing a NEWER memtable after an OLDER one is
    /// stuck would let recovery resurrect the stale version from the WAL.
    background_error: Mutex<Option<Error>>,
}

/// The embedded key-value store.
///
/// ## Write path
/// `set`/`remove` append to the WAL (durable per [`SyncPolicy`]), apply to
/// the active memtable, and — once the memtable reaches its threshold —
/// rotate it to the immutable queue for a background flush. The write that
/// crosses the threshold is visible immediately; it never waits for the
/// flush.
///
/// ## Read path
/// `get` checks the active memtable, then the immutable queue newest-first,
/// then the SSTable catalog newest-to-oldest. The first version found wins;
/// a tombstone means "not found". A stored empty value is distinct from an
/// absent key.
///
/// ## Shutdown
/// Dropping the store is a flush-complete close: the job queue is closed
/// and the background worker joined, so every queued flush and compaction
/// commits first. Whatever was still in the active memtable is durable in
/// the WAL and is replayed on the next open.
pub struct Store {
    inner: Arc<Inner>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Store {
    /// Open a store in a directory, recovering whatever a previous process
    /// left there: live SSTables per the manifest, the memtable from WAL
    /// replay, and the sequence counter from both.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Store> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let manifest = Manifest::load_or_create(&dir)?;

        let max_seen = sweep_stale_files(&dir, &manifest)?;

        // Open every table the manifest vouches for. A listed file that is
        // missing or fails validation means the catalog cannot be trusted.
        let mut catalog = Vec::with_capacity(manifest.live().len());
        for &generation in manifest.live() {
            let path = dir.join(table_file_name(generation));
            if !path.exists() {
                return Err(Error::Corruption(format!(
                    "manifest lists generation {generation} but {} is missing",
                    path.display()
                )));
            }
            catalog.push(Arc::new(SSTable::open(&path)?));
        }

        let table_max_seq = catalog
            .iter()
            .map(|t| t.meta().max_sequence)
            .max()
            .unwrap_or(0);

        let (memtable, replayed_max_seq) = replay_segments(&dir, &options)?;

        let next_sequence = table_max_seq.max(replayed_max_seq) + 1;
        let next_generation = max_seen.max(manifest.live().iter().copied().max().unwrap_or(0)) + 1;

        info!(
            dir = %dir.display(),
            sstables = catalog.len(),
            replayed = memtable.len(),
            next_sequence,
            "store opened"
        );

        let wal = WalManager::open(&dir, options.sync_policy)?;

        let inner = Arc::new(Inner {
            dir,
            options,
            write: Mutex::new(WriteState { wal, next_sequence }),
            active: RwLock::new(memtable),
            imms: RwLock::new(Vec::new()),
            catalog: RwLock::new(catalog),
            manifest: Mutex::new(manifest),
            next_generation: AtomicU64::new(next_generation),
            background_error: Mutex::new(None),
        });

        let (tx, rx) = unbounded();
        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("lsm-kv-background".into())
            .spawn(move || run_worker(worker_inner, rx))?;

        Ok(Store {
            inner,
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    /// Insert or overwrite a key.
    pub fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.write_entry(key.into(), Some(value.into()))
    }

    /// Delete a key by writing a tombstone. Succeeds whether or not the
    /// key exists.
    pub fn remove(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.write_entry(key.into(), None)
    }

    /// Look up a key. `Ok(None)` means deleted or never written; a stored
    /// empty value comes back as `Ok(Some(vec![]))`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();

        {
            let active = self.inner.active.read();
            if let Some(version) = active.get(key) {
                return Ok(resolve(version));
            }
        }

        let imms = self.inner.imms.read().clone();
        for imm in imms.iter().rev() {
            if let Some(version) = imm.get(key) {
                return Ok(resolve(version));
            }
        }

        // Snapshot the catalog: the Arc handles keep every file alive for
        // the duration of this lookup even if a compaction commits now.
        let catalog = self.inner.catalog.read().clone();
        for table in catalog.iter().rev() {
            if let Some(version) = table.get(key)? {
                return Ok(if version.is_tombstone() {
                    None
                } else {
                    Some(version.value)
                });
            }
        }

        Ok(None)
    }

    /// Block until every flush and compaction queued so far is durably
    /// committed, then surface any background failure.
    ///
    /// This is the explicit synchronization point that replaces
    /// sleep-and-hope test timing.
    pub fn sync(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.enqueue(Job::Barrier(ack_tx))?;
        ack_rx.recv().map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "background worker exited before acknowledging barrier",
            ))
        })?;
        self.check_background_error()
    }

    /// Close the store, waiting for all background work. Equivalent to
    /// dropping it, but surfaces background errors instead of logging them.
    pub fn close(self) -> Result<()> {
        self.sync()
        // Drop now joins the worker with an empty queue.
    }

    /// Current internals snapshot.
    pub fn stats(&self) -> Stats {
        let write = self.inner.write.lock();
        Stats {
            memtable_entries: self.inner.active.read().len(),
            immutable_memtables: self.inner.imms.read().len(),
            sstables: self.inner.catalog.read().len(),
            next_sequence: write.next_sequence,
        }
    }

    fn write_entry(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        // The SSTable block format stores key lengths in 16 bits.
        if key.len() > u16::MAX as usize {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "key length exceeds 65535 bytes",
            )));
        }

        self.check_background_error()?;

        let mut write = self.inner.write.lock();

        let sequence = write.next_sequence;
        let record = match value {
            Some(value) => WalRecord::put(sequence, key, value),
            None => WalRecord::delete(sequence, key),
        };

        // WAL first: the mutation must be durable (per the sync policy)
        // before it becomes visible to readers.
        write.wal.append(&record)?;
        write.next_sequence += 1;

        let WalRecord {
            value_type,
            key,
            value,
            ..
        } = record;

        let is_full = {
            let mut active = self.inner.active.write();
            match value_type {
                ValueType::Put => active.put(key, value, sequence),
                ValueType::Delete => active.delete(key, sequence),
            }
            active.is_full()
        };

        // Flush-after: the entry that crossed the threshold is already
        // visible; the drain happens behind it.
        if is_full {
            self.rotate(&mut write)?;
        }

        Ok(())
    }

    /// Atomically drain the active memtable into the immutable queue and
    /// seal the WAL segments covering it. Called with the write lock held,
    /// so no append can interleave between sealing and the swap.
    fn rotate(&self, write: &mut WriteState) -> Result<()> {
        // Seal first: if rotation fails, the memtable and its covering
        // segments are untouched and the write path just reports the error.
        let sealed = write.wal.rotate()?;

        let full = {
            let mut active = self.inner.active.write();
            std::mem::replace(
                &mut *active,
                MemTable::new(self.inner.options.memtable_threshold),
            )
        };
        let full = Arc::new(full);
        self.inner.imms.write().push(full.clone());

        debug!(
            entries = full.len(),
            segments = sealed.len(),
            "memtable rotated to immutable queue"
        );

        self.enqueue(Job::Flush {
            memtable: full,
            wal_segments: sealed,
        })
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        let sender = self.jobs.as_ref().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "store is closing"))
        })?;
        sender.send(job).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "background worker exited",
            ))
        })
    }

    fn check_background_error(&self) -> Result<()> {
        match &*self.inner.background_error.lock() {
            Some(e) => Err(Error::Io(io::Error::other(format!(
                "background work failed: {e}"
            )))),
            None => Ok(()),
        }
    }
}

impl Drop for Store {
    /// Flush-complete shutdown: closing the channel lets the worker drain
    /// every queued job before it exits; joining waits for that.
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("background worker panicked during shutdown");
            }
        }
    }
}

fn resolve(version: &Version) -> Option<Vec<u8>> {
    if version.is_tombstone() {
        None
    } else {
        Some(version.value.clone())
    }
}

/// Delete artifacts of uncommitted operations: `.tmp` outputs and any
/// SSTable the manifest does not vouch for. Returns the highest generation
/// id ever observed so ids are never reused.
fn sweep_stale_files(dir: &Path, manifest: &Manifest) -> Result<u64> {
    let mut max_seen = 0u64;
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let Some(name) = name.to_str() else { continue };

        if let Some(stem) = name.strip_suffix(".sst.tmp") {
            if let Ok(generation) = stem.parse::<u64>() {
                max_seen = max_seen.max(generation);
            }
            info!(file = name, "removing interrupted table write");
            fs::remove_file(dirent.path())?;
        } else if let Some(generation) = parse_table_file_name(name) {
            max_seen = max_seen.max(generation);
            if !manifest.live().contains(&generation) {
                info!(file = name, "removing table with no manifest entry");
                fs::remove_file(dirent.path())?;
            }
        }
    }
    Ok(max_seen)
}

/// Replay every WAL segment in id order into a fresh memtable.
///
/// A torn write at the tail of the ACTIVE (newest) segment is discarded and
/// the file truncated to its valid prefix, so later appends extend a clean
/// log. Damage anywhere else is fatal. The rebuilt memtable may exceed the
/// threshold; the next write rotates it.
fn replay_segments(dir: &Path, options: &Options) -> Result<(MemTable, u64)> {
    let segments = segment_paths(dir)?;
    let mut memtable = MemTable::new(options.memtable_threshold);
    let mut max_sequence = 0u64;

    for (position, (id, path)) in segments.iter().enumerate() {
        let replay = WalReader::new(path)?.replay()?;

        if replay.truncated {
            if position + 1 == segments.len() {
                let file = fs::OpenOptions::new().write(true).open(path)?;
                file.set_len(replay.valid_len)?;
                file.sync_all()?;
            } else {
                // Sealed segments were fsync'd at rotation; a short one
                // was damaged after the fact.
                return Err(Error::Corruption(format!(
                    "sealed WAL segment {id} has a damaged tail"
                )));
            }
        }

        for record in replay.records {
            max_sequence = max_sequence.max(record.sequence);
            match record.value_type {
                ValueType::Put => memtable.put(record.key, record.value, record.sequence),
                ValueType::Delete => memtable.delete(record.key, record.sequence),
            }
        }
    }

    Ok((memtable, max_sequence))
}

fn run_worker(inner: Arc<Inner>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Flush {
                memtable,
                wal_segments,
            } => {
                // Fail-stop: after one failure nothing newer may commit,
                // or recovery order would no longer match write order.
                if inner.background_error.lock().is_some() {
                    continue;
                }
                if let Err(e) = flush(&inner, &memtable, &wal_segments) {
                    error!(error = %e, "flush failed; data stays in the WAL and memtable queue");
                    inner.background_error.lock().get_or_insert(e);
                    continue;
                }
                if let Err(e) = maybe_compact(&inner) {
                    error!(error = %e, "compaction failed; catalog unchanged");
                    inner.background_error.lock().get_or_insert(e);
                }
            }
            Job::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Serialize one drained memtable to a new SSTable and commit it.
///
/// Ordering is the durability boundary: the table is fsync'd and registered
/// in the manifest BEFORE the covering WAL segments are deleted. A crash
/// in between replays records that are also in the table — harmless — but
/// the reverse order would lose them outright.
fn flush(inner: &Inner, memtable: &Arc<MemTable>, wal_segments: &[PathBuf]) -> Result<()> {
    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);
    let tmp_path = inner.dir.join(temp_table_file_name(generation));
    let final_path = inner.dir.join(table_file_name(generation));

    let mut builder = SSTableBuilder::new(
        &tmp_path,
        generation,
        inner.options.block_size,
        memtable.len(),
        inner.options.bloom_false_positive_rate,
    )?;
    let mut iter = memtable.iter();
    while iter.is_valid() {
        builder.add(iter.key(), iter.sequence(), iter.value_type(), iter.value())?;
        iter.next()?;
    }
    let meta = builder.finish()?;
    fs::rename(&tmp_path, &final_path)?;

    let table = Arc::new(SSTable::open(&final_path)?);

    // Commit point: once the manifest lists the generation, the table is
    // part of the durable catalog.
    inner.manifest.lock().add(generation)?;
    inner.catalog.write().push(table);
    inner
        .imms
        .write()
        .retain(|imm| !Arc::ptr_eq(imm, memtable));

    for segment in wal_segments {
        WalManager::delete_segment(segment)?;
    }

    info!(generation, entries = meta.entry_count, "memtable flushed");
    Ok(())
}

/// Compact the whole catalog into one table when it has grown past the
/// threshold. Runs on the worker thread, so the catalog cannot change
/// underneath it; the merged table holds the oldest data and the smallest
/// position in the rebuilt catalog.
fn maybe_compact(inner: &Inner) -> Result<()> {
    let candidates = inner.catalog.read().clone();
    if candidates.len() < inner.options.compaction_threshold {
        return Ok(());
    }

    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst);

    // Full-catalog merge: the oldest live table is among the candidates,
    // so a winning tombstone shadows nothing outside the merge and can go.
    let meta = compaction::compact(
        &inner.dir,
        &candidates,
        generation,
        inner.options.block_size,
        inner.options.bloom_false_positive_rate,
        true,
    )?;

    let output = match &meta {
        Some(_) => Some(Arc::new(SSTable::open(
            &inner.dir.join(table_file_name(generation)),
        )?)),
        None => None,
    };

    let removed: Vec<u64> = candidates.iter().map(|t| t.id()).collect();
    inner
        .manifest
        .lock()
        .replace(&removed, meta.as_ref().map(|m| m.id))?;

    {
        let mut catalog = inner.catalog.write();
        catalog.retain(|t| !removed.contains(&t.id()));
        if let Some(table) = output {
            catalog.insert(0, table);
        }
    }

    // Files disappear once the last in-flight reader drops its handle.
    for table in &candidates {
        table.mark_obsolete();
    }

    Ok(())
}
