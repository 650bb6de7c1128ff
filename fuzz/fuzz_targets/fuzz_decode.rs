#![no_main]

use datagram_protocol::config::PROTOCOL_ID;
use datagram_protocol::core::packet::PacketCodec;
use datagram_protocol::protocol::{Dispatcher, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = PacketCodec::new(PROTOCOL_ID);
    let _ = Message::decode(&codec, data);

    // Same bytes with a valid checksum so the body parsers are reached
    if data.len() > 4 {
        let mut framed = data.to_vec();
        let crc = codec.checksum(&framed);
        framed[..4].copy_from_slice(&crc.to_le_bytes());
        let _ = Dispatcher::new(PROTOCOL_ID).decode(&framed);
    }
});
