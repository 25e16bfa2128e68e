// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Index, IndexIter};
use crate::handle::RecordHandle;
use std::{collections::BTreeMap, sync::RwLock};

/// In-memory ordered tree index (default backend).
#[derive(Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordHandle>>,
}

impl Index for BTreeIndex {
    fn put(&self, key: &[u8], handle: RecordHandle) -> crate::Result<Option<RecordHandle>> {
        let mut tree = self.tree.write().expect("lock is poisoned");
        Ok(tree.insert(key.to_vec(), handle))
    }

    fn get(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let tree = self.tree.read().expect("lock is poisoned");
        Ok(tree.get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let mut tree = self.tree.write().expect("lock is poisoned");
        Ok(tree.remove(key))
    }

    fn len(&self) -> crate::Result<usize> {
        Ok(self.tree.read().expect("lock is poisoned").len())
    }

    fn iter(&self, reverse: bool) -> crate::Result<IndexIter> {
        let entries = {
            let tree = self.tree.read().expect("lock is poisoned");
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        Ok(IndexIter::new(entries, reverse))
    }

    fn close(&self) -> crate::Result<()> {
        Ok(())
    }
}
