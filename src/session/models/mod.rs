//! Payload models for both session kinds.
//!
//! All fields are little endian. Fixed width string fields are NUL
//! terminated and zero padded; decoding stops at the first NUL.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use thiserror::Error;

pub mod client;
pub mod game;

/// Error produced while decoding a payload. Decode failures on
/// credential and hand-off packets are protocol violations.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of payload at offset {0}")]
    UnexpectedEnd(usize),
    #[error("unrecognized payload layout for packet {id} (size: {size})")]
    UnknownLayout { id: u16, size: usize },
    #[error("field length {length} exceeds remaining payload")]
    FieldTooLong { length: usize },
}

/// Result codes shared by every reply carrying a `result` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResultCode {
    Ok = 0,
    NotExist = 1,
    AccessDenied = 4,
    AlreadyExist = 5,
    ClientSideError = 6,
}

impl From<ResultCode> for u16 {
    fn from(value: ResultCode) -> Self {
        value as u16
    }
}

bitflags! {
    /// Flags attached to a successful login result
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoginFlags: u32 {
        const EULA_ACCEPTED = 1;
    }
}

/// Checked reader over a packet payload
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < length {
            return Err(DecodeError::UnexpectedEnd(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + length];
        self.pos += length;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut value = [0u8; 8];
        value.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(value))
    }

    /// Reads a fixed width string field, trimming at the first NUL.
    /// Invalid UTF-8 is replaced rather than rejected; account names in
    /// the wild carry whatever the client codepage produced.
    pub fn read_fixed_string(&mut self, length: usize) -> Result<String, DecodeError> {
        let bytes = self.take(length)?;
        let end = bytes.iter().position(|value| *value == 0).unwrap_or(length);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Reads a fixed width field as raw bytes (no NUL trimming)
    pub fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(length)?.to_vec())
    }

    /// Reads a length prefixed byte field bounded by a fixed capacity.
    /// The prefix counts the meaningful bytes inside the fixed block.
    pub fn read_sized_bytes(&mut self, capacity: usize) -> Result<Vec<u8>, DecodeError> {
        let length = self.read_u32()? as usize;
        let block = self.take(capacity)?;
        if length > capacity {
            return Err(DecodeError::FieldTooLong { length });
        }
        Ok(block[..length].to_vec())
    }

    /// Consumes the rest of the payload
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Writer for encoding payloads into a [`BytesMut`]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Writes a fixed width string field, truncating and zero padding
    /// to `length` bytes. The final byte is always a NUL.
    pub fn write_fixed_string(&mut self, value: &str, length: usize) {
        let bytes = value.as_bytes();
        let take = bytes.len().min(length.saturating_sub(1));
        self.buf.extend_from_slice(&bytes[..take]);
        self.buf.resize(self.buf.len() + (length - take), 0);
    }

    /// Writes a raw byte field zero padded to `length` bytes
    pub fn write_fixed_bytes(&mut self, value: &[u8], length: usize) {
        let take = value.len().min(length);
        self.buf.extend_from_slice(&value[..take]);
        self.buf.resize(self.buf.len() + (length - take), 0);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn finish(self) -> bytes::Bytes {
        self.buf.freeze()
    }
}

impl Default for PayloadWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests fixed string fields round trip with padding and NUL trim
    #[test]
    fn test_fixed_string_round_trip() {
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string("alice", 61);
        let payload = writer.finish();
        assert_eq!(payload.len(), 61);

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_fixed_string(61).unwrap(), "alice");
        assert_eq!(reader.remaining(), 0);
    }

    /// Tests overlong values are truncated to leave the trailing NUL
    #[test]
    fn test_fixed_string_truncation() {
        let long = "x".repeat(100);
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string(&long, 21);
        let payload = writer.finish();
        assert_eq!(payload.len(), 21);
        assert_eq!(payload[20], 0);

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_fixed_string(21).unwrap().len(), 20);
    }

    /// Tests reads past the end of the payload are rejected
    #[test]
    fn test_unexpected_end() {
        let mut reader = PayloadReader::new(&[1, 2]);
        assert!(matches!(
            reader.read_u32(),
            Err(DecodeError::UnexpectedEnd(_))
        ));
    }

    /// Tests the length prefixed block form used by RSA password fields
    #[test]
    fn test_sized_bytes() {
        let mut writer = PayloadWriter::new();
        writer.write_u32(5);
        writer.write_fixed_bytes(b"s3cret-padding-ignored", 64);
        let payload = writer.finish();

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_sized_bytes(64).unwrap(), b"s3cre");
    }
}
