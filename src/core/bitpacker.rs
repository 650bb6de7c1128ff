//! Bit-level reader and writer.
//!
//! Bits are accumulated in a 64-bit scratch value and committed to the buffer one 32-bit
//! word at a time. Words are stored little-endian and bits fill each word from the least
//! significant end, so bit `n` of the stream always lives in byte `n / 8`. That makes a
//! byte-aligned run of bits identical to the raw bytes on the wire, which is what lets
//! [`BitWriter::write_bytes`] and [`BitReader::read_bytes`] copy whole words directly.

use crate::error::{ProtocolError, Result};

const WORD_BYTES: usize = 4;
const WORD_BITS: u32 = 32;

/// Number of bits needed to store any value in `[min, max]`.
///
/// Returns 0 when the range holds a single value.
pub fn bits_required(min: i64, max: i64) -> u32 {
    debug_assert!(min <= max, "invalid range [{min}, {max}]");
    if min >= max {
        return 0;
    }
    let span = (max - min) as u64;
    64 - span.leading_zeros()
}

#[inline]
fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Packs values into a byte buffer of bounded capacity.
#[derive(Debug)]
pub struct BitWriter {
    data: Vec<u8>,
    capacity_bits: usize,
    scratch: u64,
    scratch_bits: u32,
    bits_written: usize,
}

impl BitWriter {
    /// Create a writer that accepts at most `capacity` bytes (rounded up to whole words).
    pub fn with_capacity(capacity: usize) -> Self {
        let words = capacity.div_ceil(WORD_BYTES);
        Self {
            data: Vec::with_capacity(words * WORD_BYTES),
            capacity_bits: words * WORD_BYTES * 8,
            scratch: 0,
            scratch_bits: 0,
            bits_written: 0,
        }
    }

    pub fn would_overflow(&self, bits: usize) -> bool {
        self.bits_written + bits > self.capacity_bits
    }

    fn check_capacity(&self, bits: usize) -> Result<()> {
        if self.would_overflow(bits) {
            return Err(ProtocolError::StreamOverflow {
                requested: bits,
                available: self.capacity_bits - self.bits_written,
            });
        }
        Ok(())
    }

    /// Write the low `bits` bits of `value`. `bits` must be in `[1, 32]`.
    pub fn write_bits(&mut self, value: u32, bits: u32) -> Result<()> {
        debug_assert!((1..=WORD_BITS).contains(&bits));
        self.check_capacity(bits as usize)?;

        let value = u64::from(value) & mask(bits);
        self.scratch |= value << self.scratch_bits;
        self.scratch_bits += bits;

        if self.scratch_bits >= WORD_BITS {
            self.commit_word();
        }

        self.bits_written += bits as usize;
        Ok(())
    }

    fn commit_word(&mut self) {
        let word = (self.scratch & 0xFFFF_FFFF) as u32;
        self.data.extend_from_slice(&word.to_le_bytes());
        self.scratch >>= WORD_BITS;
        self.scratch_bits -= WORD_BITS;
    }

    /// Zero bits needed to reach the next byte boundary.
    pub fn align_bits(&self) -> u32 {
        ((8 - self.bits_written % 8) % 8) as u32
    }

    /// Pad with zero bits up to the next byte boundary.
    pub fn write_align(&mut self) -> Result<()> {
        let pad = self.align_bits();
        if pad > 0 {
            self.write_bits(0, pad)?;
        }
        Ok(())
    }

    /// Write raw bytes. The cursor must be byte-aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.align_bits() != 0 {
            return Err(ProtocolError::UnalignedAccess);
        }
        self.check_capacity(bytes.len() * 8)?;

        // head: byte at a time until the scratch word is empty
        let head = ((WORD_BYTES - (self.bits_written / 8) % WORD_BYTES) % WORD_BYTES).min(bytes.len());
        for &byte in &bytes[..head] {
            self.write_bits(u32::from(byte), 8)?;
        }

        let rest = &bytes[head..];
        let body = rest.len() - rest.len() % WORD_BYTES;
        if body > 0 {
            debug_assert_eq!(self.scratch_bits, 0);
            self.data.extend_from_slice(&rest[..body]);
            self.bits_written += body * 8;
        }

        for &byte in &rest[body..] {
            self.write_bits(u32::from(byte), 8)?;
        }
        Ok(())
    }

    // Commit any partially filled scratch word.
    fn flush_bits(&mut self) {
        if self.scratch_bits > 0 {
            let word = (self.scratch & 0xFFFF_FFFF) as u32;
            self.data.extend_from_slice(&word.to_le_bytes());
            self.scratch = 0;
            self.scratch_bits = 0;
        }
    }

    pub fn bits_written(&self) -> usize {
        self.bits_written
    }

    pub fn bytes_written(&self) -> usize {
        self.bits_written.div_ceil(8)
    }

    /// Flush and return exactly `bytes_written()` bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush_bits();
        let len = self.bytes_written();
        self.data.truncate(len);
        self.data
    }
}

/// Unpacks values written by [`BitWriter`].
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    num_bits: usize,
    bits_read: usize,
    scratch: u64,
    scratch_bits: u32,
    word_index: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            num_bits: data.len() * 8,
            bits_read: 0,
            scratch: 0,
            scratch_bits: 0,
            word_index: 0,
        }
    }

    pub fn would_overflow(&self, bits: usize) -> bool {
        self.bits_read + bits > self.num_bits
    }

    fn check_available(&self, bits: usize) -> Result<()> {
        if self.would_overflow(bits) {
            return Err(ProtocolError::StreamOverflow {
                requested: bits,
                available: self.bits_remaining(),
            });
        }
        Ok(())
    }

    // The final word may be partial; missing bytes read as zero.
    fn load_word(&mut self) {
        let start = self.word_index * WORD_BYTES;
        let mut word = [0u8; WORD_BYTES];
        if start < self.data.len() {
            let end = (start + WORD_BYTES).min(self.data.len());
            word[..end - start].copy_from_slice(&self.data[start..end]);
        }
        self.scratch |= u64::from(u32::from_le_bytes(word)) << self.scratch_bits;
        self.scratch_bits += WORD_BITS;
        self.word_index += 1;
    }

    /// Read `bits` bits (in `[1, 32]`).
    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        debug_assert!((1..=WORD_BITS).contains(&bits));
        self.check_available(bits as usize)?;

        if self.scratch_bits < bits {
            self.load_word();
        }

        let value = (self.scratch & mask(bits)) as u32;
        self.scratch >>= bits;
        self.scratch_bits -= bits;
        self.bits_read += bits as usize;
        Ok(value)
    }

    /// Consume padding up to the next byte boundary. Fails if any pad bit is set.
    pub fn read_align(&mut self) -> Result<()> {
        let remainder = (self.bits_read % 8) as u32;
        if remainder != 0 {
            let pad = self.read_bits(8 - remainder)?;
            if pad != 0 {
                return Err(ProtocolError::InvalidAlignment);
            }
        }
        Ok(())
    }

    /// Fill `out` with raw bytes. The cursor must be byte-aligned.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        if self.bits_read % 8 != 0 {
            return Err(ProtocolError::UnalignedAccess);
        }
        self.check_available(out.len() * 8)?;

        let head = ((WORD_BYTES - (self.bits_read / 8) % WORD_BYTES) % WORD_BYTES).min(out.len());
        for byte in &mut out[..head] {
            *byte = self.read_bits(8)? as u8;
        }

        let rest = out.len() - head;
        let body = rest - rest % WORD_BYTES;
        if body > 0 {
            debug_assert_eq!(self.scratch_bits, 0);
            let start = self.bits_read / 8;
            out[head..head + body].copy_from_slice(&self.data[start..start + body]);
            self.bits_read += body * 8;
            self.word_index += body / WORD_BYTES;
        }

        for byte in &mut out[head + body..] {
            *byte = self.read_bits(8)? as u8;
        }
        Ok(())
    }

    pub fn bits_read(&self) -> usize {
        self.bits_read
    }

    pub fn bits_remaining(&self) -> usize {
        self.num_bits - self.bits_read
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0, 0), 0);
        assert_eq!(bits_required(0, 1), 1);
        assert_eq!(bits_required(0, 7), 3);
        assert_eq!(bits_required(0, 8), 4);
        assert_eq!(bits_required(1, 256), 8);
        assert_eq!(bits_required(0, 255), 8);
        assert_eq!(bits_required(-10, 10), 5);
        assert_eq!(bits_required(0, u32::MAX as i64), 32);
    }

    #[test]
    fn test_mixed_widths() {
        let mut writer = BitWriter::with_capacity(64);
        writer.write_bits(1, 1).unwrap();
        writer.write_bits(0x5, 3).unwrap();
        writer.write_bits(0xABCD, 16).unwrap();
        writer.write_bits(0xDEAD_BEEF, 32).unwrap();
        writer.write_bits(0x3F, 7).unwrap();
        assert_eq!(writer.bits_written(), 59);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 8);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        assert_eq!(reader.read_bits(3).unwrap(), 0x5);
        assert_eq!(reader.read_bits(16).unwrap(), 0xABCD);
        assert_eq!(reader.read_bits(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_bits(7).unwrap(), 0x3F);
        assert_eq!(reader.bits_remaining(), 5);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let mut writer = BitWriter::with_capacity(8);
        writer.write_bits(0x1122_3344, 32).unwrap();
        writer.write_bits(0xAB, 8).unwrap();
        assert_eq!(writer.into_bytes(), vec![0x44, 0x33, 0x22, 0x11, 0xAB]);
    }

    #[test]
    fn test_write_overflow_is_an_error() {
        let mut writer = BitWriter::with_capacity(4);
        writer.write_bits(0, 32).unwrap();
        let err = writer.write_bits(1, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamOverflow { requested: 1, available: 0 }));
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let bytes = [0xFFu8; 3];
        let mut reader = BitReader::new(&bytes);
        reader.read_bits(20).unwrap();
        assert!(reader.would_overflow(5));
        assert!(matches!(
            reader.read_bits(5),
            Err(ProtocolError::StreamOverflow { requested: 5, available: 4 })
        ));
        // a failed read leaves the cursor untouched
        assert_eq!(reader.read_bits(4).unwrap(), 0xF);
    }

    #[test]
    fn test_align_rejects_dirty_padding() {
        let bytes = [0b0000_0101u8];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        assert!(matches!(reader.read_align(), Err(ProtocolError::InvalidAlignment)));

        let clean = [0b0000_0001u8, 0xAA];
        let mut reader = BitReader::new(&clean);
        reader.read_bits(1).unwrap();
        reader.read_align().unwrap();
        assert_eq!(reader.read_bits(8).unwrap(), 0xAA);
    }

    #[test]
    fn test_bytes_at_every_offset() {
        let payload: Vec<u8> = (0..23u8).collect();
        for lead_bytes in 0..5 {
            let mut writer = BitWriter::with_capacity(64);
            for _ in 0..lead_bytes {
                writer.write_bits(0x7E, 8).unwrap();
            }
            writer.write_bytes(&payload).unwrap();
            writer.write_bits(0x5, 3).unwrap();
            let bytes = writer.into_bytes();
            assert_eq!(&bytes[lead_bytes..lead_bytes + payload.len()], &payload[..]);

            let mut reader = BitReader::new(&bytes);
            for _ in 0..lead_bytes {
                assert_eq!(reader.read_bits(8).unwrap(), 0x7E);
            }
            let mut out = vec![0u8; payload.len()];
            reader.read_bytes(&mut out).unwrap();
            assert_eq!(out, payload);
            assert_eq!(reader.read_bits(3).unwrap(), 0x5);
        }
    }

    #[test]
    fn test_unaligned_byte_access() {
        let mut writer = BitWriter::with_capacity(16);
        writer.write_bits(1, 3).unwrap();
        assert!(matches!(writer.write_bytes(&[1, 2]), Err(ProtocolError::UnalignedAccess)));

        let bytes = [0u8; 4];
        let mut reader = BitReader::new(&bytes);
        reader.read_bits(3).unwrap();
        let mut out = [0u8; 1];
        assert!(matches!(reader.read_bytes(&mut out), Err(ProtocolError::UnalignedAccess)));
    }
}
