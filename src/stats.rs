// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Point-in-time statistics of a [`crate::Cask`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stats {
    /// Number of live keys
    pub key_count: usize,

    /// Number of log segments (including the active one)
    pub segment_count: usize,

    /// Bytes occupied by superseded records, reclaimable by a merge
    pub reclaimable_bytes: u64,

    /// Total size of the data directory on disk
    pub disk_size: u64,
}
