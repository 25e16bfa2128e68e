// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cask::Cask,
    index::IndexKind,
    record::{encode_key, Record, RecordType, BATCH_FIN_KEY},
    HashMap,
};
use std::sync::{atomic::Ordering, Mutex};

/// Batch configuration
#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Upper bound on staged entries per commit
    pub max_batch_size: usize,

    /// fsync the active segment when the commit marker has been written
    pub sync_on_commit: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_on_commit: true,
        }
    }
}

/// An atomic multi-key write batch.
///
/// Staged writes are buffered in memory and invisible to readers. On
/// [`Batch::commit`] all records are appended under one fresh sequence
/// number, sealed by a commit marker; recovery ignores batches whose marker
/// never reached disk.
pub struct Batch {
    cask: Cask,
    options: BatchOptions,
    staged: Mutex<HashMap<Vec<u8>, Record>>,
}

impl Cask {
    /// Creates a new write batch.
    ///
    /// # Errors
    ///
    /// Will return `Err` with [`crate::Error::BatchNotAvailable`] if the
    /// persistent index backend is used and the previous shutdown left no
    /// durable sequence number behind.
    pub fn write_batch(&self, options: BatchOptions) -> crate::Result<Batch> {
        if self.config.index_kind == IndexKind::BPlusTree
            && !self.seq_no_file_exists
            && !self.is_initial
        {
            return Err(crate::Error::BatchNotAvailable);
        }

        Ok(Batch {
            cask: self.clone(),
            options,
            staged: Mutex::new(HashMap::default()),
        })
    }
}

impl Batch {
    /// Stages a key-value pair, replacing any previously staged entry.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is empty.
    pub fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<()> {
        if key.is_empty() {
            return Err(crate::Error::KeyIsEmpty);
        }

        let record = Record {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: RecordType::Normal,
        };

        let mut staged = self.staged.lock().expect("lock is poisoned");
        staged.insert(key.to_vec(), record);

        Ok(())
    }

    /// Stages a deletion.
    ///
    /// If the key exists neither in the index nor in the staged set, the
    /// staged entry is dropped entirely.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is empty.
    pub fn delete(&self, key: &[u8]) -> crate::Result<()> {
        if key.is_empty() {
            return Err(crate::Error::KeyIsEmpty);
        }

        let mut staged = self.staged.lock().expect("lock is poisoned");

        if self.cask.index.get(key)?.is_none() {
            staged.remove(key);
            return Ok(());
        }

        let record = Record {
            key: key.to_vec(),
            value: vec![],
            rec_type: RecordType::Tombstone,
        };
        staged.insert(key.to_vec(), record);

        Ok(())
    }

    /// Atomically commits all staged writes.
    ///
    /// An empty batch is a no-op. The staged set is cleared on success, so a
    /// batch can be reused for further writes.
    ///
    /// # Errors
    ///
    /// Will return `Err` with [`crate::Error::ExceedMaxBatchNum`] if too many
    /// entries are staged, or if an IO error occurs.
    pub fn commit(&self) -> crate::Result<()> {
        let mut staged = self.staged.lock().expect("lock is poisoned");

        if staged.is_empty() {
            return Ok(());
        }
        if staged.len() > self.options.max_batch_size {
            return Err(crate::Error::ExceedMaxBatchNum);
        }

        let _guard = self.cask.write_lock.write().expect("lock is poisoned");

        let seq_no = self.cask.seq_no.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("Committing batch of {} record(s), seq #{seq_no}", staged.len());

        // phase 1: log everything, commit marker last
        let mut handles = HashMap::default();
        for (user_key, staged_record) in staged.iter() {
            let record = Record {
                key: encode_key(user_key, seq_no),
                value: staged_record.value.clone(),
                rec_type: staged_record.rec_type,
            };

            let handle = self.cask.append_record(&record)?;
            handles.insert(user_key.clone(), handle);
        }

        let commit_marker = Record {
            key: encode_key(BATCH_FIN_KEY, seq_no),
            value: vec![],
            rec_type: RecordType::BatchCommit,
        };
        self.cask.append_record(&commit_marker)?;

        if self.options.sync_on_commit {
            self.cask
                .active
                .read()
                .expect("lock is poisoned")
                .sync()?;
        }

        // phase 2: the batch becomes visible
        for (user_key, staged_record) in staged.iter() {
            let handle = handles[user_key];

            let previous = match staged_record.rec_type {
                RecordType::Normal => self.cask.index.put(user_key, handle)?,
                RecordType::Tombstone => {
                    let previous = self.cask.index.delete(user_key)?;
                    self.cask
                        .reclaimable
                        .fetch_add(u64::from(handle.size), Ordering::Relaxed);
                    previous
                }
                RecordType::BatchCommit => None,
            };

            if let Some(previous) = previous {
                self.cask
                    .reclaimable
                    .fetch_add(u64::from(previous.size), Ordering::Relaxed);
            }
        }

        staged.clear();
        Ok(())
    }
}
