//! Bit-level wire layout and stream error handling

#![allow(clippy::expect_used, clippy::unwrap_used)]

use datagram_protocol::core::bitpacker::{bits_required, BitReader, BitWriter};
use datagram_protocol::core::stream::{ReadStream, Stream, WriteStream};
use datagram_protocol::error::{ProtocolError, Result};

#[test]
fn test_bits_fill_bytes_from_the_low_end() {
    let mut writer = BitWriter::with_capacity(8);
    writer.write_bits(0b101, 3).unwrap();
    writer.write_bits(0xFF, 8).unwrap();
    assert_eq!(writer.bits_written(), 11);
    assert_eq!(writer.into_bytes(), vec![0xFD, 0x07]);
}

#[test]
fn test_words_are_little_endian() {
    let mut writer = BitWriter::with_capacity(8);
    writer.write_bits(0x1234_5678, 32).unwrap();
    writer.write_bits(0xAB, 8).unwrap();
    assert_eq!(writer.into_bytes(), vec![0x78, 0x56, 0x34, 0x12, 0xAB]);
}

#[test]
fn test_bits_required_table() {
    assert_eq!(bits_required(0, 1), 1);
    assert_eq!(bits_required(0, 255), 8);
    assert_eq!(bits_required(0, 256), 9);
    assert_eq!(bits_required(1, 256), 8);
    assert_eq!(bits_required(-10, 10), 5);
    assert_eq!(bits_required(i64::from(i32::MIN), i64::from(i32::MAX)), 32);
}

#[test]
fn test_writer_overflow_is_an_error() {
    let mut writer = BitWriter::with_capacity(4);
    writer.write_bits(u32::MAX, 32).unwrap();
    assert!(writer.would_overflow(1));
    assert!(matches!(
        writer.write_bits(1, 1),
        Err(ProtocolError::StreamOverflow {
            requested: 1,
            available: 0
        })
    ));
}

#[test]
fn test_reader_overflow_is_an_error() {
    let data = [0xAA, 0xBB];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(16).unwrap(), 0xBBAA);
    assert_eq!(reader.bits_remaining(), 0);
    assert!(matches!(
        reader.read_bits(1),
        Err(ProtocolError::StreamOverflow { .. })
    ));
}

#[test]
fn test_nonzero_padding_is_rejected() {
    let data = [0b0000_0011];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(1).unwrap(), 1);
    assert!(matches!(
        reader.read_align(),
        Err(ProtocolError::InvalidAlignment)
    ));
}

#[test]
fn test_unaligned_byte_access_is_an_error() {
    let mut writer = BitWriter::with_capacity(8);
    writer.write_bits(1, 1).unwrap();
    assert!(matches!(
        writer.write_bytes(&[1, 2]),
        Err(ProtocolError::UnalignedAccess)
    ));

    let data = [0u8; 4];
    let mut reader = BitReader::new(&data);
    reader.read_bits(3).unwrap();
    let mut out = [0u8; 1];
    assert!(matches!(
        reader.read_bytes(&mut out),
        Err(ProtocolError::UnalignedAccess)
    ));
}

#[test]
fn test_bytes_straddling_word_boundaries() {
    let payload: Vec<u8> = (0u8..13).collect();

    let mut writer = BitWriter::with_capacity(32);
    writer.write_bits(0x5A, 8).unwrap();
    writer.write_bytes(&payload).unwrap();
    writer.write_bits(0b110, 3).unwrap();
    let bytes = writer.into_bytes();
    assert_eq!(bytes.len(), 1 + 13 + 1);
    assert_eq!(&bytes[1..14], payload.as_slice());

    let mut reader = BitReader::new(&bytes);
    assert_eq!(reader.read_bits(8).unwrap(), 0x5A);
    let mut out = vec![0u8; 13];
    reader.read_bytes(&mut out).unwrap();
    assert_eq!(out, payload);
    assert_eq!(reader.read_bits(3).unwrap(), 0b110);
}

#[derive(Debug, Default, PartialEq)]
struct Snapshot {
    frame: u32,
    health: i32,
    crouching: bool,
    tick: u64,
    name: [u8; 5],
    extra: Vec<u8>,
}

impl Snapshot {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        stream.serialize_bits(&mut self.frame, 20)?;
        stream.serialize_int(&mut self.health, -100, 100)?;
        stream.serialize_bool(&mut self.crouching)?;
        stream.serialize_u64(&mut self.tick)?;
        stream.serialize_align()?;
        stream.serialize_bytes(&mut self.name)?;
        stream.serialize_trailing_bytes(&mut self.extra)
    }
}

#[test]
fn test_one_serialize_function_for_both_directions() {
    let mut original = Snapshot {
        frame: 0xABCDE,
        health: -42,
        crouching: true,
        tick: 0x0123_4567_89AB_CDEF,
        name: *b"alice",
        extra: vec![9, 8, 7],
    };

    let mut writer = WriteStream::with_capacity(64);
    original.serialize(&mut writer).unwrap();
    // 20 + 8 + 1 + 64 bits, padded to 96, then 5 + 3 bytes
    assert_eq!(writer.bits_processed(), 96 + 64);
    let bytes = writer.into_bytes();
    assert_eq!(bytes.len(), 20);

    let mut decoded = Snapshot::default();
    let mut reader = ReadStream::new(&bytes);
    decoded.serialize(&mut reader).unwrap();
    assert_eq!(decoded, original);
    assert_eq!(reader.bits_remaining(), 0);
}

#[test]
fn test_decoded_int_above_range_is_rejected() {
    // [0, 2] needs two bits; the pattern 0b11 decodes to 3
    let data = [0b11];
    let mut value = 0;
    let mut reader = ReadStream::new(&data);
    assert!(matches!(
        reader.serialize_int(&mut value, 0, 2),
        Err(ProtocolError::ValueOutOfRange { value: 3, min: 0, max: 2 })
    ));
}

#[test]
fn test_truncated_trailing_bytes_read_what_is_there() {
    let mut writer = WriteStream::with_capacity(16);
    let mut data = vec![1, 2, 3, 4, 5, 6];
    let mut flag = true;
    writer.serialize_bool(&mut flag).unwrap();
    writer.serialize_trailing_bytes(&mut data).unwrap();
    let bytes = writer.into_bytes();

    let mut reader = ReadStream::new(&bytes[..4]);
    let mut flag = false;
    let mut data = Vec::new();
    reader.serialize_bool(&mut flag).unwrap();
    reader.serialize_trailing_bytes(&mut data).unwrap();
    assert!(flag);
    assert_eq!(data, vec![1, 2, 3]);
}
