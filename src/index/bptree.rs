// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Index, IndexIter};
use crate::handle::RecordHandle;
use jammdb::DB;
use std::path::Path;

/// File name of the persistent index inside the data directory.
pub const BPTREE_FILE_NAME: &str = "bptree-index";

const BUCKET_NAME: &str = "cask-index";

fn index_error(e: &jammdb::Error) -> crate::Error {
    log::error!("persistent index error: {e}");
    crate::Error::IndexUpdateFailed
}

/// Persistent B+-tree index backed by a single file.
///
/// Every operation runs as a short transaction. Because the tree survives
/// restarts, the engine does not replay the log into it on open.
pub struct BPlusTreeIndex {
    db: DB,
}

impl BPlusTreeIndex {
    /// Opens (or creates) the index file in the given directory.
    pub fn open(dir: &Path) -> crate::Result<Self> {
        let db = DB::open(dir.join(BPTREE_FILE_NAME)).map_err(|e| index_error(&e))?;

        let tx = db.tx(true).map_err(|e| index_error(&e))?;
        tx.get_or_create_bucket(BUCKET_NAME)
            .map_err(|e| index_error(&e))?;
        tx.commit().map_err(|e| index_error(&e))?;

        Ok(Self { db })
    }
}

impl Index for BPlusTreeIndex {
    fn put(&self, key: &[u8], handle: RecordHandle) -> crate::Result<Option<RecordHandle>> {
        let tx = self.db.tx(true).map_err(|e| index_error(&e))?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(|e| index_error(&e))?;

        let previous = match bucket.get_kv(key) {
            Some(kv) => Some(RecordHandle::decode_from_slice(kv.value())?),
            None => None,
        };

        bucket
            .put(key.to_vec(), handle.encode_into_vec())
            .map_err(|e| index_error(&e))?;
        tx.commit().map_err(|e| index_error(&e))?;

        Ok(previous)
    }

    fn get(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let tx = self.db.tx(false).map_err(|e| index_error(&e))?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(|e| index_error(&e))?;

        match bucket.get_kv(key) {
            Some(kv) => Ok(Some(RecordHandle::decode_from_slice(kv.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let tx = self.db.tx(true).map_err(|e| index_error(&e))?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(|e| index_error(&e))?;

        let previous = match bucket.get_kv(key) {
            Some(kv) => RecordHandle::decode_from_slice(kv.value())?,
            None => return Ok(None),
        };

        bucket.delete(key).map_err(|e| index_error(&e))?;
        tx.commit().map_err(|e| index_error(&e))?;

        Ok(Some(previous))
    }

    fn len(&self) -> crate::Result<usize> {
        let tx = self.db.tx(false).map_err(|e| index_error(&e))?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(|e| index_error(&e))?;

        Ok(bucket
            .cursor()
            .filter(|data| matches!(data, jammdb::Data::KeyValue(_)))
            .count())
    }

    fn iter(&self, reverse: bool) -> crate::Result<IndexIter> {
        let tx = self.db.tx(false).map_err(|e| index_error(&e))?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(|e| index_error(&e))?;

        let mut entries = Vec::new();
        for data in bucket.cursor() {
            if let jammdb::Data::KeyValue(kv) = data {
                entries.push((kv.key().to_vec(), RecordHandle::decode_from_slice(kv.value())?));
            }
        }

        // B+-tree cursors already emit keys in ascending order
        Ok(IndexIter::new(entries, reverse))
    }

    fn close(&self) -> crate::Result<()> {
        // the underlying file is closed when the DB handle is dropped
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn handle(offset: u64) -> RecordHandle {
        RecordHandle {
            segment_id: 9,
            offset,
            size: 32,
        }
    }

    #[test]
    fn bptree_put_get_delete() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let index = BPlusTreeIndex::open(dir.path())?;

        assert_eq!(None, index.put(b"a", handle(0))?);
        assert_eq!(Some(handle(0)), index.put(b"a", handle(64))?);
        assert_eq!(Some(handle(64)), index.get(b"a")?);
        assert_eq!(1, index.len()?);

        assert_eq!(Some(handle(64)), index.delete(b"a")?);
        assert_eq!(None, index.delete(b"a")?);
        assert_eq!(0, index.len()?);

        Ok(())
    }

    #[test]
    fn bptree_survives_reopen() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        {
            let index = BPlusTreeIndex::open(dir.path())?;
            index.put(b"persisted", handle(123))?;
        }

        let index = BPlusTreeIndex::open(dir.path())?;
        assert_eq!(Some(handle(123)), index.get(b"persisted")?);

        Ok(())
    }

    #[test]
    fn bptree_iter_is_sorted() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let index = BPlusTreeIndex::open(dir.path())?;

        for key in [b"c".as_slice(), b"a", b"b"] {
            index.put(key, handle(0))?;
        }

        let mut iter = index.iter(true)?;
        let mut keys = vec![];
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }

        assert_eq!(vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()], keys);

        Ok(())
    }
}
