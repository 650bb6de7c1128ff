#![no_main]

use datagram_protocol::core::packet_buffer::PacketBuffer;
use libfuzzer_sys::fuzz_target;

// Each record is [sequence lo, sequence hi, fragment_id, num_fragments, len lo, len hi]
fuzz_target!(|data: &[u8]| {
    let mut buffer = PacketBuffer::new();
    let mut rest = data;
    while rest.len() >= 6 {
        let sequence = u16::from_le_bytes([rest[0], rest[1]]);
        let fragment_id = usize::from(rest[2]);
        let num_fragments = usize::from(rest[3]) + 1;
        let len = usize::from(u16::from_le_bytes([rest[4], rest[5]])) % 1100;
        rest = &rest[6..];

        let body = vec![0xAB; len];
        let _ = buffer.process_fragment(sequence, fragment_id, num_fragments, &body);
        assert!(buffer.num_buffered() <= 256);

        for packet in buffer.drain_completed() {
            assert!(!packet.payload.is_empty());
        }
    }
});
