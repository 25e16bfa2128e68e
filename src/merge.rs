// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compaction: rewriting live records into a fresh sibling directory.
//!
//! A merge never touches the data directory itself. Live records are copied
//! into `<dir>-merge` through a scratch engine, together with a hint file and
//! finally a `merge-finished` marker. The next [`Cask::open`] integrates the
//! merge directory: segments below the recorded boundary ID are deleted and
//! the merged files take their place. A crash at any point either leaves the
//! marker missing (the merge directory is discarded) or the data directory
//! fully intact.

use crate::{
    cask::Cask,
    fs_ext,
    handle::RecordHandle,
    id::SegmentId,
    index::{bptree::BPTREE_FILE_NAME, IndexKind},
    io::IoKind,
    record::{encode_key, parse_key, Record, RecordType, NON_BATCH_SEQ_NO},
    segment::{
        data_file_path, Segment, HINT_FILE_NAME, LOCK_FILE_NAME, MERGE_FINISHED_FILE_NAME,
        SEQ_NO_FILE_NAME,
    },
};
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
};

const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Returns the sibling compaction workspace of a data directory.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map_or_else(|| OsString::from("cask"), ToOwned::to_owned);
    name.push(MERGE_DIR_SUFFIX);
    dir.with_file_name(name)
}

impl Cask {
    /// Compacts the log by rewriting all live records of sealed segments.
    ///
    /// The space is reclaimed on the next [`Cask::open`], which swaps the
    /// compacted files into the data directory.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a merge is already running, the reclaimable
    /// fraction is below the configured merge ratio, or the estimated
    /// post-merge size does not fit in the available disk space.
    pub fn merge(&self) -> crate::Result<()> {
        let Ok(_merge_guard) = self.merge_lock.try_lock() else {
            return Err(crate::Error::IsMerging);
        };

        let (non_merge_file_id, merge_ids) = {
            let _guard = self.write_lock.write().expect("lock is poisoned");

            let total_size = fs_ext::dir_size(&self.path)?;
            let reclaimable = self.reclaimable.load(Ordering::Relaxed);

            // NOTE: Precision is not important here
            #[allow(clippy::cast_precision_loss)]
            if total_size == 0
                || (reclaimable as f32 / total_size as f32) < self.config.merge_ratio
            {
                return Err(crate::Error::MergeRatioUnreached);
            }

            let available = fs2::available_space(&self.path)?;
            if total_size.saturating_sub(reclaimable) >= available {
                return Err(crate::Error::NoEnoughSpace);
            }

            // seal the active segment; every segment below the new active ID
            // takes part in the merge
            {
                let mut active = self.active.write().expect("lock is poisoned");
                active.sync()?;

                let next =
                    Segment::open(&self.path, self.id_generator.next(), IoKind::Standard)?;
                let sealed = std::mem::replace(&mut *active, next);

                self.older
                    .write()
                    .expect("lock is poisoned")
                    .insert(sealed.id(), sealed);
            }

            let non_merge_file_id = self.active.read().expect("lock is poisoned").id();

            let mut merge_ids = self
                .older
                .read()
                .expect("lock is poisoned")
                .keys()
                .copied()
                .collect::<Vec<_>>();
            merge_ids.sort_unstable();

            (non_merge_file_id, merge_ids)
        };

        let merge_path = merge_path(&self.path);
        if merge_path.try_exists()? {
            std::fs::remove_dir_all(&merge_path)?;
        }
        std::fs::create_dir_all(&merge_path)?;

        log::info!(
            "Merging {} segment(s) into {}",
            merge_ids.len(),
            merge_path.display()
        );

        // scratch engine; its own index is never consulted
        let merge_config = self
            .config
            .clone()
            .sync_writes(false)
            .mmap_at_startup(false)
            .index_kind(IndexKind::BTree);

        let merge_cask = Cask::open(&merge_path, merge_config)?;
        let mut hint = Segment::hint_file(&merge_path)?;

        for &fid in &merge_ids {
            let mut offset = 0;
            loop {
                let decoded = {
                    let older = self.older.read().expect("lock is poisoned");
                    let Some(segment) = older.get(&fid) else {
                        break;
                    };
                    segment.read_record(offset)?
                };
                let Some((record, len)) = decoded else {
                    break;
                };

                let (_, user_key) = parse_key(&record.key)?;
                let user_key = user_key.to_vec();

                // a record is live iff the index still points at it
                let is_live = self
                    .index
                    .get(&user_key)?
                    .is_some_and(|h| h.segment_id == fid && h.offset == offset);

                if is_live {
                    let rewritten = Record {
                        key: encode_key(&user_key, NON_BATCH_SEQ_NO),
                        value: record.value,
                        rec_type: RecordType::Normal,
                    };
                    let new_handle = merge_cask.append_record(&rewritten)?;
                    hint.append_hint(&user_key, new_handle)?;
                }

                offset += len;
            }
        }

        hint.sync()?;
        merge_cask.sync()?;

        // the marker makes the merge directory eligible for integration
        let mut finished = Segment::merge_finished_file(&merge_path)?;
        let marker = Record {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: RecordType::Normal,
        };
        finished.append(&marker.encode_into_vec())?;
        finished.sync()?;

        merge_cask.close()?;

        Ok(())
    }

    /// Re-points persistent index entries that still reference segments
    /// deleted by a merge integration.
    ///
    /// Keys absent from the index were deleted after the merge started, keys
    /// with a locator at or above the boundary were overwritten; both keep
    /// their current state.
    pub(crate) fn refresh_persistent_index(&self) -> crate::Result<()> {
        let Some(non_merge_file_id) = read_non_merge_file_id(&self.path)? else {
            return Ok(());
        };
        if !self.path.join(HINT_FILE_NAME).try_exists()? {
            return Ok(());
        }

        let hint = Segment::hint_file(&self.path)?;

        let mut offset = 0;
        let mut refreshed = 0usize;
        while let Some((record, len)) = hint.read_record(offset)? {
            let handle = RecordHandle::decode_from_slice(&record.value)?;

            if let Some(current) = self.index.get(&record.key)? {
                if current.segment_id < non_merge_file_id {
                    self.index.put(&record.key, handle)?;
                    refreshed += 1;
                }
            }

            offset += len;
        }

        if refreshed > 0 {
            log::debug!("Refreshed {refreshed} persistent index entries after merge");
        }

        Ok(())
    }
}

/// Swaps a finished merge into the data directory.
///
/// Runs before segments are enumerated on open. Without a `merge-finished`
/// marker the merge directory is discarded wholesale.
pub(crate) fn integrate_pending_merge(dir: &Path) -> crate::Result<()> {
    let merge_path = merge_path(dir);
    if !merge_path.try_exists()? {
        return Ok(());
    }

    let mut finished = false;
    let mut names = Vec::new();

    for dirent in std::fs::read_dir(&merge_path)? {
        let dirent = dirent?;
        let name = dirent.file_name();

        if name == MERGE_FINISHED_FILE_NAME {
            finished = true;
        }
        if name == SEQ_NO_FILE_NAME || name == LOCK_FILE_NAME || name == BPTREE_FILE_NAME {
            continue;
        }

        names.push(name);
    }

    if !finished {
        log::warn!("Discarding unfinished merge at {}", merge_path.display());
        std::fs::remove_dir_all(&merge_path)?;
        return Ok(());
    }

    let Some(non_merge_file_id) = read_non_merge_file_id(&merge_path)? else {
        std::fs::remove_dir_all(&merge_path)?;
        return Ok(());
    };

    log::info!(
        "Integrating finished merge from {} (boundary segment #{non_merge_file_id})",
        merge_path.display()
    );

    // drop everything the merge replaced
    for fid in 0..non_merge_file_id {
        let path = data_file_path(dir, fid);
        if path.try_exists()? {
            std::fs::remove_file(&path)?;
        }
    }

    for name in names {
        std::fs::rename(merge_path.join(&name), dir.join(&name))?;
    }

    std::fs::remove_dir_all(&merge_path)?;

    Ok(())
}

/// Reads the boundary segment ID from a `merge-finished` marker.
///
/// Returns `None` when the marker is missing or torn.
pub(crate) fn read_non_merge_file_id(dir: &Path) -> crate::Result<Option<SegmentId>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).try_exists()? {
        return Ok(None);
    }

    let marker = Segment::merge_finished_file(dir)?;
    let Some((record, _)) = marker.read_record(0)? else {
        return Ok(None);
    };

    let id = std::str::from_utf8(&record.value)
        .ok()
        .and_then(|text| text.parse::<SegmentId>().ok())
        .ok_or(crate::Error::DataDirectoryCorrupted)?;

    Ok(Some(id))
}
