// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::index::IndexKind;

/// Engine configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Rotation threshold of log segments
    pub(crate) segment_size_bytes: u64,

    /// fsync after every append
    pub(crate) sync_writes: bool,

    /// fsync after this many accumulated written bytes (0 = disabled)
    pub(crate) bytes_per_sync: u64,

    /// Index backend to use
    pub(crate) index_kind: IndexKind,

    /// Memory-map segments while rebuilding the index at startup
    pub(crate) mmap_at_startup: bool,

    /// Minimum reclaimable fraction to admit a merge
    pub(crate) merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_size_bytes: 256 * 1_024 * 1_024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_kind: IndexKind::default(),
            mmap_at_startup: false,
            merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Sets the maximum size of log segments.
    ///
    /// The active segment is rotated once appending a record would push it
    /// past this threshold.
    ///
    /// Default = 256 MiB
    #[must_use]
    pub fn segment_size_bytes(mut self, bytes: u64) -> Self {
        self.segment_size_bytes = bytes;
        self
    }

    /// Forces an fsync after every single append.
    ///
    /// Default = false
    #[must_use]
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Forces an fsync whenever this many bytes have accumulated since the
    /// last sync. Ignored when [`Config::sync_writes`] is enabled or when 0.
    ///
    /// Default = 0 (disabled)
    #[must_use]
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Selects the index backend.
    ///
    /// Default = [`IndexKind::BTree`]
    #[must_use]
    pub fn index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    /// Memory-maps segments for the index rebuild scan, switching back to
    /// standard I/O before any write is accepted.
    ///
    /// Default = false
    #[must_use]
    pub fn mmap_at_startup(mut self, enabled: bool) -> Self {
        self.mmap_at_startup = enabled;
        self
    }

    /// Sets the minimum `reclaimable / total size` fraction for
    /// [`crate::Cask::merge`] to run. Must be within `[0.0, 1.0]`.
    ///
    /// Default = 0.5
    #[must_use]
    pub fn merge_ratio(mut self, ratio: f32) -> Self {
        self.merge_ratio = ratio;
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.segment_size_bytes == 0 {
            return Err(crate::Error::InvalidConfig(
                "segment_size_bytes must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(crate::Error::InvalidConfig(
                "merge_ratio must be within [0.0, 1.0]",
            ));
        }
        Ok(())
    }
}
