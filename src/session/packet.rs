//! Framed binary packets shared by the client and game server listeners.
//!
//! Every message on the wire is `size: u32 LE` (total length including
//! this header), `id: u16 LE`, then `size - 6` payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Number of bytes taken by the frame header (size + id)
pub const HEADER_LENGTH: usize = 6;

/// Upper bound on a single frame. Anything larger is a protocol
/// violation and tears the session down.
pub const MAX_PACKET_LENGTH: usize = 0xFFFF;

/// Packet id reserved for client heartbeats; dropped without dispatch
pub const HEARTBEAT_ID: u16 = 9999;

/// Structure of a single protocol frame. Contents are stored as [`Bytes`]
/// so packets can be cloned and fanned out cheaply.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The packet identifier
    pub id: u16,
    /// The encoded payload bytes
    pub contents: Bytes,
}

impl Packet {
    /// Creates a new packet from the provided id and contents
    pub const fn new(id: u16, contents: Bytes) -> Self {
        Self { id, contents }
    }

    /// Creates a new packet with an empty payload
    #[inline]
    pub const fn empty(id: u16) -> Self {
        Self::new(id, Bytes::new())
    }

    /// Total encoded length of this packet including the header
    #[inline]
    pub fn frame_length(&self) -> usize {
        HEADER_LENGTH + self.contents.len()
    }

    /// Attempts to read a whole packet from the provided source bytes,
    /// returning None while the frame is still incomplete
    pub fn read(src: &mut BytesMut) -> io::Result<Option<Self>> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        // Peek the frame size without consuming it
        let size = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if size < HEADER_LENGTH || size > MAX_PACKET_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame size: {size}"),
            ));
        }

        if src.len() < size {
            return Ok(None);
        }

        src.advance(4);
        let id = src.get_u16_le();
        let contents = src.split_to(size - HEADER_LENGTH).freeze();

        Ok(Some(Self { id, contents }))
    }

    /// Encodes this packet appending to the output buffer
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.frame_length() as u32);
        dst.put_u16_le(self.id);
        dst.extend_from_slice(&self.contents);
    }
}

/// Tokio codec for encoding and decoding packets
#[derive(Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Error = io::Error;
    type Item = Packet;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Packet::read(src)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write(dst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests a packet round trips through the codec, including across a
    /// partial read boundary
    #[test]
    fn test_round_trip() {
        let packet = Packet::new(10001, Bytes::from_static(b"TEST\0\0\0\0"));

        let mut buffer = BytesMut::new();
        let mut codec = PacketCodec;
        codec.encode(packet.clone(), &mut buffer).unwrap();
        assert_eq!(buffer.len(), packet.frame_length());

        // Feed only the header first: incomplete frame
        let mut partial = BytesMut::from(&buffer[..HEADER_LENGTH]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded.id, packet.id);
        assert_eq!(decoded.contents, packet.contents);
        assert!(buffer.is_empty());
    }

    /// Tests several frames in one buffer decode in order
    #[test]
    fn test_back_to_back_frames() {
        let mut buffer = BytesMut::new();
        Packet::empty(10021).write(&mut buffer);
        Packet::new(10023, Bytes::from_static(&[5, 0])).write(&mut buffer);

        let mut codec = PacketCodec;
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().id, 10021);
        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.id, 10023);
        assert_eq!(second.contents.as_ref(), &[5, 0]);
    }

    /// Tests oversized and undersized frame headers fail closed
    #[test]
    fn test_invalid_sizes() {
        let mut codec = PacketCodec;

        let mut oversize = BytesMut::new();
        oversize.put_u32_le((MAX_PACKET_LENGTH + 1) as u32);
        oversize.put_u16_le(10001);
        assert!(codec.decode(&mut oversize).is_err());

        let mut undersize = BytesMut::new();
        undersize.put_u32_le(3);
        undersize.put_u16_le(10001);
        assert!(codec.decode(&mut undersize).is_err());
    }
}
