//! Splitting oversized payloads into fragment packets.
//!
//! ## Fragment Body
//! ```text
//! [sequence(16)] [fragment_id(8)] [num_fragments - 1 (8)] [align] [bytes...]
//! ```
//!
//! The fragment length is not transmitted; it is whatever remains after the header.

use crate::config::{MAX_FRAGMENTS_PER_PACKET, MAX_FRAGMENT_SIZE, MAX_PACKET_SIZE};
use crate::core::packet::{PacketCodec, PacketType};
use crate::core::stream::{ReadStream, Stream};
use crate::error::{ProtocolError, Result};

/// Header carried by every fragment packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    pub sequence: u16,
    pub fragment_id: usize,
    pub num_fragments: usize,
}

impl FragmentHeader {
    pub fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        let mut sequence = u32::from(self.sequence);
        stream.serialize_bits(&mut sequence, 16)?;

        let mut fragment_id = self.fragment_id as i32;
        stream.serialize_int(&mut fragment_id, 0, MAX_FRAGMENTS_PER_PACKET as i32 - 1)?;

        let mut num_fragments = self.num_fragments as i32;
        stream.serialize_int(&mut num_fragments, 1, MAX_FRAGMENTS_PER_PACKET as i32)?;

        if S::IS_READING {
            self.sequence = sequence as u16;
            self.fragment_id = fragment_id as usize;
            self.num_fragments = num_fragments as usize;
        }
        Ok(())
    }
}

/// Number of fragments a payload of `size` bytes needs.
pub fn fragment_count(size: usize) -> usize {
    size.div_ceil(MAX_FRAGMENT_SIZE)
}

/// Split `payload` into framed fragment packets sharing `sequence`.
///
/// Every fragment except the last carries exactly `MAX_FRAGMENT_SIZE` bytes. Nothing is
/// returned unless all fragments encode.
pub fn split_packet_into_fragments(
    codec: &PacketCodec,
    sequence: u16,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    if payload.len() >= MAX_PACKET_SIZE {
        return Err(ProtocolError::OversizedPacket(payload.len()));
    }

    let num_fragments = fragment_count(payload.len());
    payload
        .chunks(MAX_FRAGMENT_SIZE)
        .enumerate()
        .map(|(fragment_id, chunk)| {
            let mut header = FragmentHeader {
                sequence,
                fragment_id,
                num_fragments,
            };
            codec.write_packet(PacketType::Fragment, chunk.len() + 4, |stream| {
                header.serialize(stream)?;
                stream.serialize_align()?;
                stream.write_bytes(chunk)
            })
        })
        .collect()
}

/// Read a fragment header and its bytes from a stream positioned after the packet type.
pub fn read_fragment(stream: &mut ReadStream<'_>) -> Result<(FragmentHeader, Vec<u8>)> {
    let mut header = FragmentHeader::default();
    header.serialize(stream)?;
    let mut bytes = Vec::new();
    stream.serialize_trailing_bytes(&mut bytes)?;
    Ok((header, bytes))
}
