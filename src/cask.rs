// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    config::Config,
    fs_ext,
    handle::RecordHandle,
    id::{IdGenerator, SegmentId},
    index::{self, Index, IndexKind},
    io::IoKind,
    iter::{Iter, IterOptions},
    merge,
    record::{encode_key, parse_key, Record, RecordType, NON_BATCH_SEQ_NO},
    segment::{Segment, DATA_FILE_SUFFIX, HINT_FILE_NAME, LOCK_FILE_NAME, SEQ_NO_FILE_NAME},
    stats::Stats,
    value::{UserKey, UserValue},
    HashMap,
};
use fs2::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

const SEQ_NO_KEY: &[u8] = b"seq.no";

/// A disk-resident Bitcask-style keyspace
#[derive(Clone)]
pub struct Cask(Arc<CaskInner>);

impl std::ops::Deref for Cask {
    type Target = CaskInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Engine state shared between clones of a [`Cask`]
pub struct CaskInner {
    /// Base folder
    pub(crate) path: PathBuf,

    /// Engine configuration
    pub(crate) config: Config,

    /// Currently writable segment
    pub(crate) active: RwLock<Segment>,

    /// Immutable, read-only segments by ID
    pub(crate) older: RwLock<HashMap<SegmentId, Segment>>,

    /// Key -> locator index
    pub(crate) index: Box<dyn Index>,

    /// Hands out the ID for the next rotated segment
    pub(crate) id_generator: IdGenerator,

    /// Engine-level single-writer lock; mutating operations take the
    /// exclusive side, readers the shared side
    pub(crate) write_lock: RwLock<()>,

    /// Guards the merge process to only allow one at a time
    pub(crate) merge_lock: Mutex<()>,

    /// Highest sequence number handed out to a batch
    pub(crate) seq_no: AtomicU64,

    /// Bytes occupied by superseded records
    pub(crate) reclaimable: AtomicU64,

    /// Bytes written since the last forced sync
    bytes_since_sync: AtomicU64,

    /// Holds the cross-process directory lock
    lock_file: File,

    /// Whether the directory was empty when this engine was opened
    pub(crate) is_initial: bool,

    /// Whether the sequence number file was found on open
    /// (persistent index backend only)
    pub(crate) seq_no_file_exists: bool,
}

impl Cask {
    /// Creates or recovers a keyspace in the given directory.
    ///
    /// Acquires an exclusive directory lock, integrates any pending merge and
    /// rebuilds the in-memory index from the hint file and the log.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory is locked by another process, a
    /// segment is corrupted, or an IO error occurs.
    pub fn open<P: Into<PathBuf>>(path: P, config: Config) -> crate::Result<Self> {
        config.validate()?;

        let path = fs_ext::absolute_path(&path.into());
        log::info!("Opening cask at {}", path.display());

        let is_initial = !path.try_exists()? || is_dir_empty(&path)?;
        std::fs::create_dir_all(&path)?;

        let lock_file = acquire_dir_lock(&path)?;

        merge::integrate_pending_merge(&path)?;

        let scan_kind = if config.mmap_at_startup {
            IoKind::MemoryMap
        } else {
            IoKind::Standard
        };

        let file_ids = enumerate_data_files(&path)?;

        let mut older = HashMap::default();
        let active = if let Some((&active_id, rest)) = file_ids.split_last() {
            for &id in rest {
                older.insert(id, Segment::open(&path, id, scan_kind)?);
            }
            Segment::open(&path, active_id, scan_kind)?
        } else {
            Segment::open(&path, 0, IoKind::Standard)?
        };

        let next_id = active.id() + 1;
        let index = index::create(config.index_kind, &path)?;

        let mut seq_no = 0;
        let mut seq_no_file_exists = false;
        if config.index_kind == IndexKind::BPlusTree {
            if let Some(value) = read_seq_no_file(&path)? {
                seq_no = value;
                seq_no_file_exists = true;
            }
        }

        let cask = Self(Arc::new(CaskInner {
            path,
            active: RwLock::new(active),
            older: RwLock::new(older),
            index,
            id_generator: IdGenerator::new(next_id),
            write_lock: RwLock::new(()),
            merge_lock: Mutex::new(()),
            seq_no: AtomicU64::new(seq_no),
            reclaimable: AtomicU64::new(0),
            bytes_since_sync: AtomicU64::new(0),
            lock_file,
            is_initial,
            seq_no_file_exists,
            config,
        }));

        if cask.config.index_kind == IndexKind::BPlusTree {
            // the persistent index is its own source of truth, no log scan;
            // only locators that a merge invalidated need refreshing
            cask.refresh_persistent_index()?;
        } else {
            cask.load_index_from_hint_file()?;
            cask.load_index_from_data_files(&file_ids)?;
        }

        if cask.config.mmap_at_startup {
            cask.active
                .write()
                .expect("lock is poisoned")
                .switch_io(IoKind::Standard)?;

            for segment in cask.older.write().expect("lock is poisoned").values_mut() {
                segment.switch_io(IoKind::Standard)?;
            }
        }

        // a torn append may have left garbage past the last valid record;
        // appends must line up with the rewound write offset
        {
            let active = cask.active.read().expect("lock is poisoned");
            if active.file_size()? > active.write_offset() {
                log::warn!(
                    "Dropping torn bytes at the end of segment #{}",
                    active.id()
                );
                active.truncate_to_write_offset()?;
            }
        }

        Ok(cask)
    }

    /// Stores a key-value pair, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is empty or an IO error occurs.
    pub fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<()> {
        if key.is_empty() {
            return Err(crate::Error::KeyIsEmpty);
        }

        let _guard = self.write_lock.write().expect("lock is poisoned");

        let record = Record {
            key: encode_key(key, NON_BATCH_SEQ_NO),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };
        let handle = self.append_record(&record)?;

        if let Some(previous) = self.index.put(key, handle)? {
            self.reclaimable
                .fetch_add(u64::from(previous.size), Ordering::Relaxed);
        }

        Ok(())
    }

    /// Removes a key by appending a tombstone.
    ///
    /// Deleting a key that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is empty or an IO error occurs.
    pub fn delete(&self, key: &[u8]) -> crate::Result<()> {
        if key.is_empty() {
            return Err(crate::Error::KeyIsEmpty);
        }

        let _guard = self.write_lock.write().expect("lock is poisoned");

        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = Record {
            key: encode_key(key, NON_BATCH_SEQ_NO),
            value: vec![],
            rec_type: RecordType::Tombstone,
        };
        let handle = self.append_record(&record)?;

        if let Some(previous) = self.index.delete(key)? {
            self.reclaimable
                .fetch_add(u64::from(previous.size), Ordering::Relaxed);
        }

        // the tombstone itself is dead weight as well
        self.reclaimable
            .fetch_add(u64::from(handle.size), Ordering::Relaxed);

        Ok(())
    }

    /// Retrieves the value of a key.
    ///
    /// # Errors
    ///
    /// Will return `Err` with [`crate::Error::KeyNotFound`] if the key does
    /// not exist, or [`crate::Error::InvalidCrc`] if the stored record is
    /// corrupted.
    pub fn get(&self, key: &[u8]) -> crate::Result<UserValue> {
        if key.is_empty() {
            return Err(crate::Error::KeyIsEmpty);
        }

        let _guard = self.write_lock.read().expect("lock is poisoned");

        let handle = self
            .index
            .get(key)?
            .ok_or(crate::Error::KeyNotFound)?;

        self.read_by_handle(handle)
    }

    /// Returns a snapshot of all live keys in index order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn list_keys(&self) -> crate::Result<Vec<UserKey>> {
        let _guard = self.write_lock.read().expect("lock is poisoned");

        let mut cursor = self.index.iter(false)?;
        let mut keys = Vec::new();
        while cursor.valid() {
            keys.push(UserKey::copy_from_slice(cursor.key()));
            cursor.next();
        }

        Ok(keys)
    }

    /// Calls `f` for every live entry in index order, loading each value.
    ///
    /// Iteration stops early once `f` returns `false`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn fold<F: FnMut(&[u8], UserValue) -> bool>(&self, mut f: F) -> crate::Result<()> {
        let _guard = self.write_lock.read().expect("lock is poisoned");

        let mut cursor = self.index.iter(false)?;
        while cursor.valid() {
            let value = self.read_by_handle(cursor.value())?;
            if !f(cursor.key(), value) {
                break;
            }
            cursor.next();
        }

        Ok(())
    }

    /// Returns an iterator over live entries.
    ///
    /// The key set is a snapshot taken at creation time; values are loaded
    /// lazily while iterating.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn iter(&self, options: IterOptions) -> crate::Result<Iter> {
        let _guard = self.write_lock.read().expect("lock is poisoned");
        let cursor = self.index.iter(options.reverse)?;
        Ok(Iter::new(self.clone(), cursor, options))
    }

    /// Reports statistics about the keyspace.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn stat(&self) -> crate::Result<Stats> {
        let _guard = self.write_lock.read().expect("lock is poisoned");

        Ok(Stats {
            key_count: self.index.len()?,
            segment_count: self.older.read().expect("lock is poisoned").len() + 1,
            reclaimable_bytes: self.reclaimable.load(Ordering::Relaxed),
            disk_size: fs_ext::dir_size(&self.path)?,
        })
    }

    /// Copies the data directory to `dest`, excluding the lock file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn backup<P: AsRef<Path>>(&self, dest: P) -> crate::Result<()> {
        let _guard = self.write_lock.read().expect("lock is poisoned");
        fs_ext::copy_dir_contents(&self.path, dest.as_ref(), &[LOCK_FILE_NAME])
    }

    /// Persists the active segment to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn sync(&self) -> crate::Result<()> {
        self.active.read().expect("lock is poisoned").sync()
    }

    /// Persists all state and releases the directory lock.
    ///
    /// File descriptors are released once the last clone of this handle is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn close(&self) -> crate::Result<()> {
        let _guard = self.write_lock.write().expect("lock is poisoned");
        log::info!("Closing cask at {}", self.path.display());

        if self.config.index_kind == IndexKind::BPlusTree {
            self.write_seq_no_file()?;
        }

        self.active.read().expect("lock is poisoned").sync()?;
        self.index.close()?;
        self.lock_file.unlock()?;

        Ok(())
    }

    /// Resolves a record handle to its value.
    pub(crate) fn read_by_handle(&self, handle: RecordHandle) -> crate::Result<UserValue> {
        let decoded = {
            let active = self.active.read().expect("lock is poisoned");

            if active.id() == handle.segment_id {
                active.read_record(handle.offset)?
            } else {
                drop(active);

                let older = self.older.read().expect("lock is poisoned");
                let Some(segment) = older.get(&handle.segment_id) else {
                    return Err(crate::Error::KeyNotFound);
                };
                segment.read_record(handle.offset)?
            }
        };

        // an end-of-log result here means index and log have diverged after
        // an abnormal recovery; the log is authoritative
        let Some((record, _)) = decoded else {
            return Err(crate::Error::KeyNotFound);
        };

        if record.rec_type == RecordType::Tombstone {
            return Err(crate::Error::KeyNotFound);
        }

        Ok(UserValue::from(record.value))
    }

    /// Appends an encoded record to the active segment, rotating it first if
    /// the record would push it past the configured size.
    pub(crate) fn append_record(&self, record: &Record) -> crate::Result<RecordHandle> {
        let encoded = record.encode_into_vec();
        let len = encoded.len() as u64;

        let mut active = self.active.write().expect("lock is poisoned");

        if active.write_offset() + len > self.config.segment_size_bytes {
            active.sync()?;

            let next = Segment::open(&self.path, self.id_generator.next(), IoKind::Standard)?;
            let sealed = std::mem::replace(&mut *active, next);

            log::debug!(
                "Sealed segment #{} at {} bytes, new active segment #{}",
                sealed.id(),
                sealed.write_offset(),
                active.id(),
            );

            self.older
                .write()
                .expect("lock is poisoned")
                .insert(sealed.id(), sealed);
        }

        let offset = active.append(&encoded)?;

        if self.config.sync_writes {
            active.sync()?;
        } else if self.config.bytes_per_sync > 0 {
            let accumulated = self.bytes_since_sync.fetch_add(len, Ordering::Relaxed) + len;

            if accumulated >= self.config.bytes_per_sync {
                self.bytes_since_sync.store(0, Ordering::Relaxed);
                active.sync()?;
            }
        }

        // NOTE: Truncation is fine, records are far below 2^32 bytes
        #[allow(clippy::cast_possible_truncation)]
        Ok(RecordHandle {
            segment_id: active.id(),
            offset,
            size: len as u32,
        })
    }

    /// Loads `key -> locator` mappings from the post-merge hint file.
    pub(crate) fn load_index_from_hint_file(&self) -> crate::Result<()> {
        if !self.path.join(HINT_FILE_NAME).try_exists()? {
            return Ok(());
        }

        let hint = Segment::hint_file(&self.path)?;

        let mut offset = 0;
        let mut count = 0usize;
        while let Some((record, len)) = hint.read_record(offset)? {
            let handle = RecordHandle::decode_from_slice(&record.value)?;
            self.index.put(&record.key, handle)?;

            offset += len;
            count += 1;
        }

        log::debug!("Loaded {count} index entries from hint file");
        Ok(())
    }

    /// Rebuilds the index by scanning the log segments in ID order.
    ///
    /// Batch records are buffered per sequence number and only applied once
    /// their commit marker is seen; segments already covered by the hint file
    /// are skipped.
    pub(crate) fn load_index_from_data_files(
        &self,
        file_ids: &[SegmentId],
    ) -> crate::Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let non_merge_file_id = merge::read_non_merge_file_id(&self.path)?;

        struct PendingRecord {
            key: Vec<u8>,
            rec_type: RecordType,
            handle: RecordHandle,
        }

        let mut pending: HashMap<u64, Vec<PendingRecord>> = HashMap::default();
        let mut max_seq_no = NON_BATCH_SEQ_NO;
        let mut active_offset = 0;

        {
            let active = self.active.read().expect("lock is poisoned");
            let older = self.older.read().expect("lock is poisoned");

            for &fid in file_ids {
                // already covered by the hint file
                if non_merge_file_id.is_some_and(|boundary| fid < boundary) {
                    continue;
                }

                let segment = if active.id() == fid {
                    &*active
                } else {
                    older
                        .get(&fid)
                        .ok_or(crate::Error::DataDirectoryCorrupted)?
                };

                let mut offset = 0;
                while let Some((record, len)) = segment.read_record(offset)? {
                    let (seq_no, user_key) = parse_key(&record.key)?;

                    // NOTE: Truncation is fine, records are far below 2^32 bytes
                    #[allow(clippy::cast_possible_truncation)]
                    let handle = RecordHandle {
                        segment_id: fid,
                        offset,
                        size: len as u32,
                    };

                    if seq_no == NON_BATCH_SEQ_NO {
                        self.apply_to_index(user_key, record.rec_type, handle)?;
                    } else if record.rec_type == RecordType::BatchCommit {
                        if let Some(records) = pending.remove(&seq_no) {
                            for staged in records {
                                self.apply_to_index(&staged.key, staged.rec_type, staged.handle)?;
                            }
                        }
                    } else {
                        pending.entry(seq_no).or_default().push(PendingRecord {
                            key: user_key.to_vec(),
                            rec_type: record.rec_type,
                            handle,
                        });
                    }

                    max_seq_no = max_seq_no.max(seq_no);
                    offset += len;
                }

                if fid == active.id() {
                    active_offset = offset;
                }
            }
        }

        // records whose commit marker never made it to disk are dropped here
        if !pending.is_empty() {
            log::warn!(
                "Discarding {} uncommitted batch(es) found during recovery",
                pending.len()
            );
        }

        self.active
            .write()
            .expect("lock is poisoned")
            .set_write_offset(active_offset);

        self.seq_no.store(max_seq_no, Ordering::SeqCst);

        Ok(())
    }

    fn apply_to_index(
        &self,
        key: &[u8],
        rec_type: RecordType,
        handle: RecordHandle,
    ) -> crate::Result<()> {
        match rec_type {
            RecordType::Normal => {
                if let Some(previous) = self.index.put(key, handle)? {
                    self.reclaimable
                        .fetch_add(u64::from(previous.size), Ordering::Relaxed);
                }
            }
            RecordType::Tombstone => {
                if let Some(previous) = self.index.delete(key)? {
                    self.reclaimable
                        .fetch_add(u64::from(previous.size), Ordering::Relaxed);
                }
                self.reclaimable
                    .fetch_add(u64::from(handle.size), Ordering::Relaxed);
            }
            RecordType::BatchCommit => {}
        }

        Ok(())
    }

    fn write_seq_no_file(&self) -> crate::Result<()> {
        let path = self.path.join(SEQ_NO_FILE_NAME);
        if path.try_exists()? {
            std::fs::remove_file(&path)?;
        }

        let mut file = Segment::seq_no_file(&self.path)?;
        let record = Record {
            key: SEQ_NO_KEY.to_vec(),
            value: self
                .seq_no
                .load(Ordering::SeqCst)
                .to_string()
                .into_bytes(),
            rec_type: RecordType::Normal,
        };

        file.append(&record.encode_into_vec())?;
        file.sync()
    }
}

fn is_dir_empty(path: &Path) -> crate::Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

fn acquire_dir_lock(path: &Path) -> crate::Result<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path.join(LOCK_FILE_NAME))?;

    if let Err(e) = lock_file.try_lock_exclusive() {
        if e.kind() == fs2::lock_contended_error().kind() {
            return Err(crate::Error::DatabaseInUse);
        }
        return Err(crate::Error::Io(e));
    }

    Ok(lock_file)
}

/// Collects the IDs of all `*.data` files, sorted ascending.
fn enumerate_data_files(path: &Path) -> crate::Result<Vec<SegmentId>> {
    let mut ids = Vec::new();

    for dirent in std::fs::read_dir(path)? {
        let dirent = dirent?;

        let file_name = dirent.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id = stem
                .parse::<SegmentId>()
                .map_err(|_| crate::Error::DataDirectoryCorrupted)?;
            ids.push(id);
        }
    }

    ids.sort_unstable();
    Ok(ids)
}

fn read_seq_no_file(dir: &Path) -> crate::Result<Option<u64>> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.try_exists()? {
        return Ok(None);
    }

    let file = Segment::seq_no_file(dir)?;
    let Some((record, _)) = file.read_record(0)? else {
        return Err(crate::Error::DataDirectoryCorrupted);
    };

    let value = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or(crate::Error::DataDirectoryCorrupted)?;

    // consume the file so an unclean shutdown is detectable on the next open
    std::fs::remove_file(&path)?;

    Ok(Some(value))
}
