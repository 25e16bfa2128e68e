// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Deserialization failed
    Decode(DecodeError),

    /// An empty key was passed to a write operation
    KeyIsEmpty,

    /// The key is not present in the keyspace
    KeyNotFound,

    /// A record's checksum did not match its payload
    InvalidCrc,

    /// A file in the data directory could not be interpreted
    DataDirectoryCorrupted,

    /// The index rejected an update
    IndexUpdateFailed,

    /// The data directory is locked by another process
    DatabaseInUse,

    /// A compaction is already running
    IsMerging,

    /// The reclaimable fraction has not reached the configured merge ratio
    MergeRatioUnreached,

    /// Not enough free disk space to hold the compacted data
    NoEnoughSpace,

    /// The batch holds more staged writes than allowed
    ExceedMaxBatchNum,

    /// Batches are rejected because the durable sequence number is missing
    BatchNotAvailable,

    /// Invalid configuration option
    InvalidConfig(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaskError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Storage engine result
pub type Result<T> = std::result::Result<T, Error>;
