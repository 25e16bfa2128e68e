// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{decode_varint, encode_varint, DecodeError, MAX_LEN_VARINT_LEN, MAX_UVARINT_LEN},
    id::SegmentId,
};

/// A record handle points into the log
///
/// It identifies the exact bytes of a record: the segment that holds it, the
/// byte offset of its header, and its full encoded length on disk.
#[allow(clippy::module_name_repetitions)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RecordHandle {
    /// Segment ID
    pub segment_id: SegmentId,

    /// Offset in file
    pub offset: u64,

    /// Full encoded length of the record on disk
    pub size: u32,
}

impl RecordHandle {
    /// Serializes the handle as three zig-zag varints (fid, offset, size).
    ///
    /// This is the payload format of hint records.
    #[must_use]
    pub fn encode_into_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_LEN_VARINT_LEN + MAX_UVARINT_LEN + MAX_LEN_VARINT_LEN);
        encode_varint(i64::from(self.segment_id), &mut buf);

        // NOTE: Wrapping is fine, offsets are re-interpreted symmetrically on decode
        #[allow(clippy::cast_possible_wrap)]
        encode_varint(self.offset as i64, &mut buf);

        encode_varint(i64::from(self.size), &mut buf);
        buf
    }

    /// Deserializes a handle from the payload of a hint record.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the buffer does not hold three varints.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let err = || DecodeError::InvalidHeader("RecordHandle");

        let (fid, mut pos) = decode_varint(bytes).ok_or_else(err)?;
        let (offset, len) = decode_varint(bytes.get(pos..).ok_or_else(err)?).ok_or_else(err)?;
        pos += len;
        let (size, _) = decode_varint(bytes.get(pos..).ok_or_else(err)?).ok_or_else(err)?;

        let segment_id = SegmentId::try_from(fid).map_err(|_| err())?;
        let size = u32::try_from(size).map_err(|_| err())?;

        // NOTE: Sign loss is fine, this undoes the encode-side cast
        #[allow(clippy::cast_sign_loss)]
        Ok(Self {
            segment_id,
            offset: offset as u64,
            size,
        })
    }
}
