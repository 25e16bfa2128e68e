// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Index, IndexIter};
use crate::handle::RecordHandle;
use radix_trie::{Trie, TrieCommon};
use std::sync::RwLock;

/// In-memory radix tree index.
///
/// Same locking discipline as the ordered tree; cursors are materialized by
/// a full in-order walk.
pub struct RadixIndex {
    tree: RwLock<Trie<Vec<u8>, RecordHandle>>,
}

impl Default for RadixIndex {
    fn default() -> Self {
        Self {
            tree: RwLock::new(Trie::new()),
        }
    }
}

impl Index for RadixIndex {
    fn put(&self, key: &[u8], handle: RecordHandle) -> crate::Result<Option<RecordHandle>> {
        let mut tree = self.tree.write().expect("lock is poisoned");
        Ok(tree.insert(key.to_vec(), handle))
    }

    fn get(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let tree = self.tree.read().expect("lock is poisoned");
        Ok(tree.get(&key.to_vec()).copied())
    }

    fn delete(&self, key: &[u8]) -> crate::Result<Option<RecordHandle>> {
        let mut tree = self.tree.write().expect("lock is poisoned");
        Ok(tree.remove(&key.to_vec()))
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
