// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cask::Cask,
    index::IndexIter,
    value::{UserKey, UserValue},
};

/// Iterator configuration
#[derive(Clone, Debug, Default)]
pub struct IterOptions {
    /// Only yield keys starting with this prefix
    pub prefix: Vec<u8>,

    /// Iterate in descending key order
    pub reverse: bool,
}

/// Iterates over the live entries of a [`Cask`].
///
/// The visited key set is a snapshot taken when the iterator was created;
/// values are read from the log on demand.
pub struct Iter {
    cask: Cask,
    cursor: IndexIter,
    prefix: Vec<u8>,
}

impl Iter {
    pub(crate) fn new(cask: Cask, mut cursor: IndexIter, options: IterOptions) -> Self {
        if !options.prefix.is_empty() {
            // position at the first candidate; in reverse the prefix range
            // has no cheap lower bound, filtering does the rest
            if !options.reverse {
                cursor.seek(&options.prefix);
            }
        }

        Self {
            cask,
            cursor,
            prefix: options.prefix,
        }
    }
}

impl Iterator for Iter {
    type Item = crate::Result<(UserKey, UserValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor.valid() {
            let key = UserKey::copy_from_slice(self.cursor.key());
            let handle = self.cursor.value();
            self.cursor.next();

            if !self.prefix.is_empty() && !key.starts_with(&self.prefix) {
                continue;
            }

            return match self.cask.read_by_handle(handle) {
                Ok(value) => Some(Ok((key, value))),
                // the key vanished between snapshot and read
                Err(crate::Error::KeyNotFound) => continue,
                Err(e) => Some(Err(e)),
            };
        }

        None
    }
}
