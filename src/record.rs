// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk record framing.
//!
//! ```text
//! +--------+------+-----------+-------------+-------+---------+
//! | CRC32  | type | key-size  | value-size  | key   | value   |
//! |  4 B   | 1 B  | varint <=5| varint <=5  |  ...  |  ...    |
//! +--------+------+-----------+-------------+-------+---------+
//! ```
//!
//! The CRC (IEEE, little-endian) covers every byte after itself. The key
//! stored on disk is the *encoded key*: an unsigned varint sequence number
//! followed by the user key. Sequence number 0 marks a non-batch write.

use crate::coding::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, DecodeError, MAX_LEN_VARINT_LEN,
    MAX_UVARINT_LEN,
};
use byteorder::{ByteOrder, LittleEndian};

/// Upper bound of the encoded header length.
pub const MAX_HEADER_SIZE: usize = 4 + 1 + MAX_LEN_VARINT_LEN + MAX_LEN_VARINT_LEN;

/// Sequence number of writes that are not part of a batch.
pub const NON_BATCH_SEQ_NO: u64 = 0;

/// Well-known user key of batch commit markers.
pub const BATCH_FIN_KEY: &[u8] = b"txn-fin";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key-value pair
    Normal = 0,

    /// Marks its key as deleted
    Tombstone = 1,

    /// Seals all records tagged with the same sequence number
    BatchCommit = 2,
}

impl TryFrom<u8> for RecordType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Tombstone),
            2 => Ok(Self::BatchCommit),
            tag => Err(DecodeError::InvalidTag(("RecordType", tag))),
        }
    }
}

/// A single log entry.
///
/// `key` holds the encoded key (sequence number varint + user key).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

impl Record {
    /// Serializes the record into its on-disk framing.
    #[must_use]
    pub fn encode_into_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());

        buf.extend_from_slice(&[0; 4]);
        buf.push(self.rec_type as u8);

        // NOTE: Key and value lengths are always < 2^32
        #[allow(clippy::cast_possible_wrap)]
        {
            encode_varint(self.key.len() as i64, &mut buf);
            encode_varint(self.value.len() as i64, &mut buf);
        }

        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        LittleEndian::write_u32(&mut buf[..4], crc);

        buf
    }
}

/// Decoded fixed part of a record.
///
/// The type byte stays raw until the checksum has been verified.
#[derive(Debug)]
pub struct RecordHeader {
    pub crc: u32,
    pub raw_type: u8,
    pub key_size: u32,
    pub value_size: u32,

    /// Encoded length of the header itself
    pub len: usize,
}

impl RecordHeader {
    /// Parses a header from the start of `buf`.
    ///
    /// Returns `None` when the buffer is too short or a size field is
    /// malformed, both of which the decode loop treats as end-of-log.
    #[must_use]
    pub fn decode_from_slice(buf: &[u8]) -> Option<Self> {
        if buf.len() < 7 {
            return None;
        }

        let crc = LittleEndian::read_u32(buf.get(..4)?);
        let raw_type = *buf.get(4)?;

        let (key_size, n1) = decode_varint(buf.get(5..)?)?;
        let (value_size, n2) = decode_varint(buf.get(5 + n1..)?)?;

        let key_size = u32::try_from(key_size).ok()?;
        let value_size = u32::try_from(value_size).ok()?;

        Some(Self {
            crc,
            raw_type,
            key_size,
            value_size,
            len: 5 + n1 + n2,
        })
    }

    /// An all-zero header signals the end of the log.
    #[must_use]
    pub fn is_end_of_log(&self) -> bool {
        self.crc == 0 && self.key_size == 0 && self.value_size == 0
    }

    /// Recomputes the checksum over header remainder + payload.
    #[must_use]
    pub fn verify_crc(&self, header_bytes: &[u8], payload: &[u8]) -> bool {
        let Some(covered) = header_bytes.get(4..self.len) else {
            return false;
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(covered);
        hasher.update(payload);
        hasher.finalize() == self.crc
    }
}

/// Prepends the sequence number varint to a user key.
#[must_use]
pub fn encode_key(user_key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_UVARINT_LEN + user_key.len());
    encode_uvarint(seq_no, &mut buf);
    buf.extend_from_slice(user_key);
    buf
}

/// Splits an encoded key into sequence number and user key.
///
/// # Errors
///
/// Will return `Err` if the leading varint is malformed.
pub fn parse_key(encoded: &[u8]) -> Result<(u64, &[u8]), DecodeError> {
    let err = || DecodeError::InvalidHeader("encoded key");

    let (seq_no, len) = decode_uvarint(encoded).ok_or_else(err)?;
    let user_key = encoded.get(len..).ok_or_else(err)?;
    Ok((seq_no, user_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> Record {
        Record {
            key: encode_key(b"name", NON_BATCH_SEQ_NO),
            value: b"bitcask".to_vec(),
            rec_type: RecordType::Normal,
        }
    }

    #[test]
    fn record_encode_decode() {
        let record = sample();
        let bytes = record.encode_into_vec();

        let header = RecordHeader::decode_from_slice(&bytes).expect("header should parse");
        assert!(!header.is_end_of_log());
        assert_eq!(record.key.len() as u32, header.key_size);
        assert_eq!(record.value.len() as u32, header.value_size);

        let payload = &bytes[header.len..];
        assert!(header.verify_crc(&bytes, payload));
        assert_eq!(RecordType::Normal, RecordType::try_from(header.raw_type).expect("valid tag"));
    }

    #[test]
    fn record_crc_detects_bit_flip() {
        let bytes = sample().encode_into_vec();

        for bit in 0..bytes.len() * 8 {
            let mut flipped = bytes.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);

            let Some(header) = RecordHeader::decode_from_slice(&flipped) else {
                continue;
            };
            let payload_len = header.key_size as usize + header.value_size as usize;
            if header.is_end_of_log() || header.len + payload_len > flipped.len() {
                continue;
            }

            let payload = &flipped[header.len..header.len + payload_len];
            assert!(!header.verify_crc(&flipped, payload), "flip of bit {bit} went unnoticed");
        }
    }

    #[test]
    fn record_empty_value() {
        let record = Record {
            key: encode_key(b"gone", NON_BATCH_SEQ_NO),
            value: vec![],
            rec_type: RecordType::Tombstone,
        };
        let bytes = record.encode_into_vec();

        let header = RecordHeader::decode_from_slice(&bytes).expect("header should parse");
        assert_eq!(0, header.value_size);
        assert!(header.verify_crc(&bytes, &bytes[header.len..]));
    }

    #[test]
    fn zeroed_header_is_end_of_log() {
        let header = RecordHeader::decode_from_slice(&[0; MAX_HEADER_SIZE]).expect("parses");
        assert!(header.is_end_of_log());
    }

    #[test]
    fn key_codec_roundtrip() {
        let encoded = encode_key(b"user-key", 42);
        let (seq_no, user_key) = parse_key(&encoded).expect("should parse");
        assert_eq!(42, seq_no);
        assert_eq!(b"user-key", user_key);
    }

    #[test]
    fn key_codec_non_batch() {
        let encoded = encode_key(b"k", NON_BATCH_SEQ_NO);
        assert_eq!(1 + 1, encoded.len());

        let (seq_no, user_key) = parse_key(&encoded).expect("should parse");
        assert_eq!(NON_BATCH_SEQ_NO, seq_no);
        assert_eq!(b"k", user_key);
    }

    #[test]
    fn invalid_type_tag() {
        assert!(RecordType::try_from(3).is_err());
    }
}
