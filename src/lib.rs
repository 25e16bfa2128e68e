// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Embeddable Bitcask-style key-value storage engine.
//!
//! All writes go to a single append-only *active segment*; once it reaches a
//! configurable size it is rotated out and becomes immutable. A fully
//! in-memory index maps each live key to the exact byte location of its most
//! recent value:
//!
//! [k0, v0][k1, v1][k0, tombstone][k2, v2] ...
//!
//! Point reads resolve the key through the index to a [`RecordHandle`] and
//! perform exactly one positional read. Deletes append a tombstone. Multi-key
//! batches are made atomic by tagging every record with a sequence number and
//! appending a commit marker; records whose marker never made it to disk are
//! discarded during recovery.
//!
//! As data is overwritten or deleted, stale records accumulate in older
//! segments. [`Cask::merge`] rewrites the live records into a fresh directory
//! next to the data directory, together with a hint file that allows the next
//! [`Cask::open`] to rebuild the index without scanning the log.
//!
//! # Example usage
//!
//! ```
//! use cask_log::{Cask, Config};
//!
//! # fn main() -> cask_log::Result<()> {
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path();
//! let cask = Cask::open(path, Config::default())?;
//!
//! cask.put(b"name", b"bitcask")?;
//! assert_eq!(&*cask.get(b"name")?, b"bitcask");
//!
//! cask.delete(b"name")?;
//! assert!(cask.get(b"name").is_err());
//!
//! cask.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod batch;
mod cask;
mod coding;
mod config;
mod error;
mod fs_ext;
mod handle;
mod id;
mod index;
mod io;
mod iter;
mod merge;
mod record;
mod segment;
mod stats;
mod value;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    batch::{Batch, BatchOptions},
    cask::Cask,
    config::Config,
    error::{Error, Result},
    handle::RecordHandle,
    id::SegmentId,
    index::{IndexIter, IndexKind},
    iter::{Iter, IterOptions},
    stats::Stats,
    value::{UserKey, UserValue},
};
