// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    handle::RecordHandle,
    id::SegmentId,
    io::{self, FileIo, IoKind},
    record::{Record, RecordHeader, RecordType, MAX_HEADER_SIZE},
};
use std::path::{Path, PathBuf};

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";
pub const LOCK_FILE_NAME: &str = "flock";

/// Builds the `NNNNNNNNN.data` path of a segment.
pub fn data_file_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id:09}{DATA_FILE_SUFFIX}"))
}

/// A single numbered log file.
///
/// Exactly one segment per directory is active (appendable); all others are
/// immutable. The write offset mirrors the on-disk size of the active file.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    io: Box<dyn FileIo>,
    write_offset: u64,
}

impl Segment {
    /// Opens (or creates) the data file with the given ID.
    pub fn open(dir: &Path, id: SegmentId, kind: IoKind) -> crate::Result<Self> {
        Self::open_path(data_file_path(dir, id), id, kind)
    }

    /// Opens the post-merge hint file.
    pub fn hint_file(dir: &Path) -> crate::Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the merge completion marker file.
    pub fn merge_finished_file(dir: &Path) -> crate::Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoKind::Standard)
    }

    /// Opens the sequence number file.
    pub fn seq_no_file(dir: &Path) -> crate::Result<Self> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0, IoKind::Standard)
    }

    fn open_path(path: PathBuf, id: SegmentId, kind: IoKind) -> crate::Result<Self> {
        let io = io::open(&path, kind)?;
        let write_offset = io.len()?;

        Ok(Self {
            id,
            path,
            io,
            write_offset,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Returns the on-disk size of the segment file.
    pub fn file_size(&self) -> crate::Result<u64> {
        Ok(self.io.len()?)
    }

    /// Closes the current backend and reopens the file with another one.
    ///
    /// Used to leave the memory-mapped scan mode after startup.
    pub fn switch_io(&mut self, kind: IoKind) -> crate::Result<()> {
        self.io = io::open(&self.path, kind)?;
        Ok(())
    }

    /// Appends raw encoded bytes, returning the offset they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> crate::Result<u64> {
        let offset = self.write_offset;
        self.io.append(bytes)?;
        self.write_offset += bytes.len() as u64;
        Ok(offset)
    }

    /// Appends a hint record (user key -> encoded locator).
    pub fn append_hint(&mut self, user_key: &[u8], handle: RecordHandle) -> crate::Result<()> {
        let record = Record {
            key: user_key.to_vec(),
            value: handle.encode_into_vec(),
            rec_type: RecordType::Normal,
        };
        self.append(&record.encode_into_vec())?;
        Ok(())
    }

    pub fn sync(&self) -> crate::Result<()> {
        self.io.sync()?;
        Ok(())
    }

    /// Discards everything past the write offset.
    ///
    /// Used after recovery, where a torn append may have left garbage behind
    /// the last valid record.
    pub fn truncate_to_write_offset(&self) -> crate::Result<()> {
        self.io.truncate(self.write_offset)?;
        Ok(())
    }

    /// Decodes the record at `offset`.
    ///
    /// Returns `Ok(None)` when the offset points at the end of the log: past
    /// the file, at zero padding, or at a header whose sizes reach beyond the
    /// file (a torn trailing write).
    ///
    /// # Errors
    ///
    /// Will return `Err` with [`crate::Error::InvalidCrc`] if the stored
    /// checksum does not match the payload.
    pub fn read_record(&self, offset: u64) -> crate::Result<Option<(Record, u64)>> {
        let file_size = self.io.len()?;
        if offset >= file_size {
            return Ok(None);
        }

        // NOTE: Truncation is fine, the min caps this at MAX_HEADER_SIZE
        #[allow(clippy::cast_possible_truncation)]
        let header_len = std::cmp::min(MAX_HEADER_SIZE as u64, file_size - offset) as usize;
        let mut header_buf = vec![0; header_len];
        self.io.read_at(&mut header_buf, offset)?;

        let Some(header) = RecordHeader::decode_from_slice(&header_buf) else {
            return Ok(None);
        };
        if header.is_end_of_log() {
            return Ok(None);
        }

        let payload_len = u64::from(header.key_size) + u64::from(header.value_size);
        let total_len = header.len as u64 + payload_len;
        if offset + total_len > file_size {
            return Ok(None);
        }

        // NOTE: Truncation is fine, both sizes fit u32
        #[allow(clippy::cast_possible_truncation)]
        let mut payload = vec![0; payload_len as usize];
        self.io.read_at(&mut payload, offset + header.len as u64)?;

        if !header.verify_crc(&header_buf, &payload) {
            return Err(crate::Error::InvalidCrc);
        }

        let rec_type = RecordType::try_from(header.raw_type)?;
        let value = payload.split_off(header.key_size as usize);

        Ok(Some((
            Record {
                key: payload,
                value,
                rec_type,
            },
            total_len,
        )))
    }
}
