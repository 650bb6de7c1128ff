//! Packet framing with crc32 protection.
//!
//! ## Wire Format
//! ```text
//! [crc32(32)] [type(3)] [body...] [align]
//! ```
//!
//! The crc32 is computed over `protocol_id (big-endian) ++ 0u32 ++ bytes[4..]`. The protocol
//! id never travels on the wire, so packets from a peer speaking a different protocol id fail
//! the check exactly like corrupted ones.

use crate::core::stream::{ReadStream, Stream, WriteStream};
use crate::error::{ProtocolError, Result};
use crc32fast::Hasher;

/// Size of the crc32 field at the start of every packet.
pub const CRC_BYTES: usize = 4;

/// Bytes reserved beyond the body when sizing a write buffer (crc, type, alignment).
pub const FRAME_OVERHEAD: usize = 8;

/// Every packet type that can appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Fragment = 0,
    ConnectionRequest = 1,
    ConnectionDenied = 2,
    ConnectionChallenge = 3,
    ConnectionResponse = 4,
    ConnectionKeepAlive = 5,
    ConnectionDisconnect = 6,
    ConnectionPayload = 7,
}

impl PacketType {
    pub const COUNT: usize = 8;

    pub fn from_index(index: u32) -> Result<Self> {
        Ok(match index {
            0 => Self::Fragment,
            1 => Self::ConnectionRequest,
            2 => Self::ConnectionDenied,
            3 => Self::ConnectionChallenge,
            4 => Self::ConnectionResponse,
            5 => Self::ConnectionKeepAlive,
            6 => Self::ConnectionDisconnect,
            7 => Self::ConnectionPayload,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::ConnectionRequest => "connection request",
            Self::ConnectionDenied => "connection denied",
            Self::ConnectionChallenge => "connection challenge",
            Self::ConnectionResponse => "connection response",
            Self::ConnectionKeepAlive => "connection keep-alive",
            Self::ConnectionDisconnect => "connection disconnect",
            Self::ConnectionPayload => "connection payload",
        }
    }
}

/// Frames packet bodies and validates inbound frames.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    protocol_id: u32,
    // crc32 state after the protocol id and the zeroed crc field
    prefix_crc: u32,
}

impl PacketCodec {
    pub fn new(protocol_id: u32) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&protocol_id.to_be_bytes());
        hasher.update(&[0u8; CRC_BYTES]);
        Self {
            protocol_id,
            prefix_crc: hasher.finalize(),
        }
    }

    pub fn protocol_id(&self) -> u32 {
        self.protocol_id
    }

    /// crc32 of a framed packet, ignoring whatever is currently in its crc field.
    pub fn checksum(&self, packet: &[u8]) -> u32 {
        let mut hasher = Hasher::new_with_initial(self.prefix_crc);
        if packet.len() > CRC_BYTES {
            hasher.update(&packet[CRC_BYTES..]);
        }
        hasher.finalize()
    }

    /// Frame a body produced by `body`. `capacity` bounds the body size in bytes.
    pub fn write_packet<F>(&self, packet_type: PacketType, capacity: usize, body: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut WriteStream) -> Result<()>,
    {
        let mut stream = WriteStream::with_capacity(capacity + FRAME_OVERHEAD);
        stream.serialize_bits(&mut 0, 32)?;
        let mut type_index = packet_type as i32;
        stream.serialize_int(&mut type_index, 0, PacketType::COUNT as i32 - 1)?;
        body(&mut stream)?;
        stream.serialize_align()?;

        let mut packet = stream.into_bytes();
        let crc = self.checksum(&packet);
        packet[..CRC_BYTES].copy_from_slice(&crc.to_le_bytes());
        Ok(packet)
    }

    /// Frame `payload` as raw bytes following the type field.
    pub fn encode(&self, packet_type: PacketType, payload: &[u8]) -> Result<Vec<u8>> {
        self.write_packet(packet_type, payload.len(), |stream| {
            stream.serialize_align()?;
            stream.write_bytes(payload)
        })
    }

    /// Verify the crc32 and read the packet type.
    ///
    /// The returned stream is positioned just after the type field. The type is only read
    /// once the checksum has passed.
    pub fn decode<'a>(&self, packet: &'a [u8]) -> Result<(PacketType, ReadStream<'a>)> {
        let mut stream = ReadStream::new(packet);
        let mut received = 0u32;
        stream.serialize_bits(&mut received, 32)?;

        let expected = self.checksum(packet);
        if received != expected {
            return Err(ProtocolError::CorruptPacket {
                expected,
                actual: received,
            });
        }

        let mut type_index = 0i32;
        stream.serialize_int(&mut type_index, 0, PacketType::COUNT as i32 - 1)?;
        let packet_type = PacketType::from_index(type_index as u32)?;
        Ok((packet_type, stream))
    }
}
