//! Fragment splitting and reassembly, including one case per rejection reason

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use datagram_protocol::config::{
    MAX_FRAGMENT_SIZE, MAX_PACKET_SIZE, PACKET_BUFFER_SIZE, PROTOCOL_ID,
};
use datagram_protocol::core::fragment::{read_fragment, split_packet_into_fragments};
use datagram_protocol::core::packet::{PacketCodec, PacketType};
use datagram_protocol::core::packet_buffer::PacketBuffer;
use datagram_protocol::error::{FragmentRejection, ProtocolError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn full(fill: u8) -> Vec<u8> {
    vec![fill; MAX_FRAGMENT_SIZE]
}

struct Fragment<'a>(u16, usize, usize, &'a [u8]);

/// Assert `expected` and that the buffer looks exactly as it did before.
fn assert_rejected(
    buffer: &mut PacketBuffer,
    fragment: Fragment<'_>,
    expected: FragmentRejection,
    watched: u16,
) {
    let buffered = buffer.num_buffered();
    let current = buffer.current_sequence();
    let received = buffer.received_fragments(watched);

    let Fragment(sequence, fragment_id, num_fragments, data) = fragment;
    assert_eq!(
        buffer.process_fragment(sequence, fragment_id, num_fragments, data),
        Err(expected)
    );

    assert_eq!(buffer.num_buffered(), buffered);
    assert_eq!(buffer.current_sequence(), current);
    assert_eq!(buffer.received_fragments(watched), received);
}

fn primed() -> PacketBuffer {
    let mut buffer = PacketBuffer::new();
    buffer.process_fragment(5, 0, 3, &full(1)).unwrap();
    buffer
}

#[test]
fn test_rejects_invalid_size() {
    let mut buffer = primed();
    assert_rejected(&mut buffer, Fragment(5, 1, 3, &[]), FragmentRejection::InvalidSize(0), 5);
    let oversized = vec![0u8; MAX_FRAGMENT_SIZE + 1];
    assert_rejected(
        &mut buffer,
        Fragment(5, 2, 3, &oversized),
        FragmentRejection::InvalidSize(MAX_FRAGMENT_SIZE + 1),
        5,
    );
}

#[test]
fn test_rejects_invalid_fragment_count() {
    let mut buffer = primed();
    assert_rejected(&mut buffer, Fragment(6, 0, 0, &[1]), FragmentRejection::InvalidFragmentCount(0), 5);
    assert_rejected(
        &mut buffer,
        Fragment(6, 0, 257, &full(1)),
        FragmentRejection::InvalidFragmentCount(257),
        5,
    );
}

#[test]
fn test_rejects_invalid_fragment_id() {
    let mut buffer = primed();
    assert_rejected(
        &mut buffer,
        Fragment(5, 3, 3, &[1]),
        FragmentRejection::InvalidFragmentId {
            fragment_id: 3,
            num_fragments: 3,
        },
        5,
    );
}

#[test]
fn test_rejects_short_non_terminal_fragment() {
    let mut buffer = primed();
    assert_rejected(
        &mut buffer,
        Fragment(5, 1, 3, &[1; 10]),
        FragmentRejection::ShortFragment {
            fragment_id: 1,
            size: 10,
        },
        5,
    );
}

#[test]
fn test_rejects_sequence_outside_window() {
    let mut buffer = primed();
    assert_rejected(
        &mut buffer,
        Fragment(2000, 0, 1, &[1]),
        FragmentRejection::OutOfWindow {
            sequence: 2000,
            current: 5,
        },
        5,
    );
    // the window is symmetric and wraps
    assert_rejected(
        &mut buffer,
        Fragment(5u16.wrapping_sub(1025), 0, 1, &[1]),
        FragmentRejection::OutOfWindow {
            sequence: 5u16.wrapping_sub(1025),
            current: 5,
        },
        5,
    );
}

#[test]
fn test_rejects_slot_collision() {
    let mut buffer = PacketBuffer::new();
    buffer.process_fragment(300, 0, 2, &full(1)).unwrap();
    // 44 maps to the same slot as 300 and is older
    assert_rejected(
        &mut buffer,
        Fragment(44, 0, 1, &[1]),
        FragmentRejection::SlotCollision {
            sequence: 44,
            occupant: 300,
        },
        300,
    );
}

#[test]
fn test_rejects_stale_sequence() {
    let mut buffer = PacketBuffer::new();
    buffer.process_fragment(300, 0, 2, &full(1)).unwrap();
    assert_rejected(
        &mut buffer,
        Fragment(40, 0, 1, &[1]),
        FragmentRejection::Stale {
            sequence: 40,
            current: 300,
        },
        300,
    );
}

#[test]
fn test_rejects_fragment_count_mismatch() {
    let mut buffer = primed();
    assert_rejected(
        &mut buffer,
        Fragment(5, 1, 2, &[1]),
        FragmentRejection::FragmentCountMismatch {
            expected: 3,
            actual: 2,
        },
        5,
    );
}

#[test]
fn test_rejects_duplicate_fragment() {
    let mut buffer = primed();
    assert_rejected(
        &mut buffer,
        Fragment(5, 0, 3, &full(9)),
        FragmentRejection::Duplicate {
            sequence: 5,
            fragment_id: 0,
        },
        5,
    );
    assert_eq!(buffer.received_fragments(5), Some(1));
}

#[test]
fn test_split_rejects_empty_and_oversized() {
    let codec = PacketCodec::new(PROTOCOL_ID);
    assert!(matches!(
        split_packet_into_fragments(&codec, 0, &[]),
        Err(ProtocolError::EmptyPayload)
    ));
    let huge = vec![0u8; MAX_PACKET_SIZE];
    assert!(matches!(
        split_packet_into_fragments(&codec, 0, &huge),
        Err(ProtocolError::OversizedPacket(size)) if size == MAX_PACKET_SIZE
    ));
}

#[test]
fn test_split_and_reassemble_in_any_order() {
    let codec = PacketCodec::new(PROTOCOL_ID);
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut buffer = PacketBuffer::new();

    let sizes = [1, MAX_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE + 1, MAX_PACKET_SIZE - 1];
    for (sequence, &size) in sizes.iter().enumerate() {
        let sequence = sequence as u16;
        let payload: Vec<u8> = (0..size).map(|i| (i * 31 % 256) as u8).collect();

        let mut fragments = split_packet_into_fragments(&codec, sequence, &payload).unwrap();
        assert_eq!(fragments.len(), size.div_ceil(MAX_FRAGMENT_SIZE));
        fragments.shuffle(&mut rng);

        for fragment in &fragments {
            let (packet_type, mut stream) = codec.decode(fragment).unwrap();
            assert_eq!(packet_type, PacketType::Fragment);
            let (header, data) = read_fragment(&mut stream).unwrap();
            assert_eq!(header.sequence, sequence);
            buffer
                .process_fragment(header.sequence, header.fragment_id, header.num_fragments, &data)
                .unwrap();
        }

        let completed = buffer.drain_completed();
        assert_eq!(completed.len(), 1, "size {size}");
        assert_eq!(completed[0].sequence, sequence);
        assert!(completed[0].payload == payload, "size {size} corrupted");
        assert_eq!(buffer.num_buffered(), 0);
    }
}

#[test]
fn test_interleaved_packets_drain_oldest_first() {
    let mut buffer = PacketBuffer::new();
    buffer.process_fragment(65535, 1, 2, &[2]).unwrap();
    buffer.process_fragment(0, 1, 2, &[4]).unwrap();
    buffer.process_fragment(0, 0, 2, &full(3)).unwrap();
    assert!(buffer.drain_completed().len() == 1);

    buffer.process_fragment(1, 0, 1, &[5]).unwrap();
    buffer.process_fragment(65535, 0, 2, &full(1)).unwrap();

    let sequences: Vec<u16> = buffer
        .drain_completed()
        .iter()
        .map(|packet| packet.sequence)
        .collect();
    assert_eq!(sequences, vec![65535, 1]);
}

#[test]
fn test_memory_stays_bounded_under_large_jumps() {
    let mut buffer = PacketBuffer::new();
    let stride = (PACKET_BUFFER_SIZE * 3) as u16;
    let mut sequence = 0u16;

    for _ in 0..500 {
        // only the first of two fragments ever arrives
        buffer.process_fragment(sequence, 0, 2, &full(7)).unwrap();
        assert_eq!(buffer.num_buffered(), 1);
        assert_eq!(buffer.current_sequence(), Some(sequence));
        sequence = sequence.wrapping_add(stride);
    }
}

#[test]
fn test_memory_stays_bounded_under_steady_loss() {
    let mut buffer = PacketBuffer::new();
    for sequence in 0..2000u16 {
        buffer.process_fragment(sequence, 0, 2, &full(7)).unwrap();
        assert!(buffer.num_buffered() <= PACKET_BUFFER_SIZE);
    }
    assert_eq!(buffer.num_buffered(), PACKET_BUFFER_SIZE);
    assert!(buffer.drain_completed().is_empty());
}

#[test]
fn test_rejection_converts_into_protocol_error() {
    let mut buffer = primed();
    let error: ProtocolError = buffer.process_fragment(5, 0, 3, &full(1)).unwrap_err().into();
    assert!(matches!(
        error,
        ProtocolError::FragmentRejected(FragmentRejection::Duplicate { sequence: 5, fragment_id: 0 })
    ));
    assert_eq!(
        error.to_string(),
        "Fragment rejected: duplicate fragment 0 of sequence 5"
    );
    assert!(std::error::Error::source(&error).is_some());
}
