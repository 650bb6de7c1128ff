//! Direction-agnostic serialization.
//!
//! Packet bodies are described once by a `serialize<S: Stream>` function. Writing and
//! reading share that function; the direction is fixed by which stream type is passed in,
//! so there is no runtime mode flag to get wrong.
//!
//! ```rust
//! use datagram_protocol::core::stream::{ReadStream, Stream, WriteStream};
//! use datagram_protocol::error::Result;
//!
//! #[derive(Default, Debug, PartialEq)]
//! struct Position { x: i32, y: i32, visible: bool }
//!
//! impl Position {
//!     fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
//!         stream.serialize_int(&mut self.x, -512, 511)?;
//!         stream.serialize_int(&mut self.y, -512, 511)?;
//!         stream.serialize_bool(&mut self.visible)
//!     }
//! }
//!
//! let mut writer = WriteStream::with_capacity(16);
//! Position { x: -3, y: 200, visible: true }.serialize(&mut writer)?;
//! let bytes = writer.into_bytes();
//! assert_eq!(bytes.len(), 3);
//!
//! let mut decoded = Position::default();
//! decoded.serialize(&mut ReadStream::new(&bytes))?;
//! assert_eq!(decoded, Position { x: -3, y: 200, visible: true });
//! # Ok::<(), datagram_protocol::error::ProtocolError>(())
//! ```

use crate::core::bitpacker::{bits_required, BitReader, BitWriter};
use crate::error::{ProtocolError, Result};

/// A bit stream that can either fill or consume the fields handed to it.
pub trait Stream {
    const IS_WRITING: bool;
    const IS_READING: bool = !Self::IS_WRITING;

    /// Serialize the low `bits` bits of `value`.
    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()>;

    /// Serialize an integer in `[min, max]` using `bits_required(min, max)` bits.
    fn serialize_int(&mut self, value: &mut i32, min: i32, max: i32) -> Result<()>;

    /// Serialize raw bytes at a byte-aligned position.
    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<()>;

    /// Align to the next byte boundary; the reader verifies the pad is zero.
    fn serialize_align(&mut self) -> Result<()>;

    /// Align, then serialize every remaining byte of the packet.
    ///
    /// On read the length is taken from what is left in the buffer.
    fn serialize_trailing_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<()>;

    fn bits_processed(&self) -> usize;

    fn bytes_processed(&self) -> usize {
        self.bits_processed().div_ceil(8)
    }

    fn serialize_u64(&mut self, value: &mut u64) -> Result<()> {
        let mut lo = (*value & 0xFFFF_FFFF) as u32;
        let mut hi = (*value >> 32) as u32;
        self.serialize_bits(&mut lo, 32)?;
        self.serialize_bits(&mut hi, 32)?;
        *value = (u64::from(hi) << 32) | u64::from(lo);
        Ok(())
    }

    fn serialize_bool(&mut self, value: &mut bool) -> Result<()> {
        let mut bit = u32::from(*value);
        self.serialize_bits(&mut bit, 1)?;
        *value = bit != 0;
        Ok(())
    }
}

/// Writing half of [`Stream`].
#[derive(Debug)]
pub struct WriteStream {
    writer: BitWriter,
}

impl WriteStream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity(capacity),
        }
    }

    /// Write bytes without the `&mut` the shared trait method needs.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_bytes(bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

impl Stream for WriteStream {
    const IS_WRITING: bool = true;

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()> {
        self.writer.write_bits(*value, bits)
    }

    fn serialize_int(&mut self, value: &mut i32, min: i32, max: i32) -> Result<()> {
        debug_assert!(min < max, "invalid range [{min}, {max}]");
        debug_assert!(
            (min..=max).contains(value),
            "value {value} outside [{min}, {max}]"
        );
        if !(min..=max).contains(value) {
            return Err(ProtocolError::ValueOutOfRange {
                value: i64::from(*value),
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        let bits = bits_required(i64::from(min), i64::from(max));
        let unsigned = (i64::from(*value) - i64::from(min)) as u32;
        self.writer.write_bits(unsigned, bits)
    }

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.writer.write_bytes(bytes)
    }

    fn serialize_align(&mut self) -> Result<()> {
        self.writer.write_align()
    }

    fn serialize_trailing_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<()> {
        self.writer.write_align()?;
        self.writer.write_bytes(bytes)
    }

    fn bits_processed(&self) -> usize {
        self.writer.bits_written()
    }
}

/// Reading half of [`Stream`].
#[derive(Debug)]
pub struct ReadStream<'a> {
    reader: BitReader<'a>,
}

impl<'a> ReadStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(data),
        }
    }

    pub fn bits_remaining(&self) -> usize {
        self.reader.bits_remaining()
    }

    /// Read bytes into a fresh buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.reader.would_overflow(len * 8) {
            return Err(ProtocolError::StreamOverflow {
                requested: len * 8,
                available: self.reader.bits_remaining(),
            });
        }
        let mut out = vec![0u8; len];
        self.reader.read_bytes(&mut out)?;
        Ok(out)
    }
}

impl Stream for ReadStream<'_> {
    const IS_WRITING: bool = false;

    fn serialize_bits(&mut self, value: &mut u32, bits: u32) -> Result<()> {
        *value = self.reader.read_bits(bits)?;
        Ok(())
    }

    fn serialize_int(&mut self, value: &mut i32, min: i32, max: i32) -> Result<()> {
        debug_assert!(min < max, "invalid range [{min}, {max}]");
        let bits = bits_required(i64::from(min), i64::from(max));
        let unsigned = self.reader.read_bits(bits)?;
        let decoded = i64::from(min) + i64::from(unsigned);
        if decoded > i64::from(max) {
            return Err(ProtocolError::ValueOutOfRange {
                value: decoded,
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        *value = decoded as i32;
        Ok(())
    }

    fn serialize_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.reader.read_bytes(bytes)
    }

    fn serialize_align(&mut self) -> Result<()> {
        self.reader.read_align()
    }

    fn serialize_trailing_bytes(&mut self, bytes: &mut Vec<u8>) -> Result<()> {
        self.reader.read_align()?;
        let len = self.reader.bits_remaining() / 8;
        *bytes = self.read_vec(len)?;
        Ok(())
    }

    fn bits_processed(&self) -> usize {
        self.reader.bits_read()
    }
}
