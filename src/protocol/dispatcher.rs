use crate::config::MAX_FRAGMENT_SIZE;
use crate::core::fragment::{read_fragment, split_packet_into_fragments, FragmentHeader};
use crate::core::packet::{PacketCodec, PacketType};
use crate::core::packet_buffer::PacketBuffer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::metrics::global_metrics;
use tracing::{debug, trace};

/// A datagram after framing has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message),
    Fragment { header: FragmentHeader, data: Vec<u8> },
}

/// Per-peer state: reassembly buffer for what the peer sends, sequence counter for what we
/// send it.
#[derive(Debug, Default)]
pub struct PeerChannel {
    pub reassembly: PacketBuffer,
    next_sequence: u16,
}

impl PeerChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    pub fn reset(&mut self) {
        self.reassembly.reset();
        self.next_sequence = 0;
    }
}

/// Routes between raw datagrams and [`Message`]s.
///
/// Outbound frames larger than `MAX_FRAGMENT_SIZE` are split into fragments. Inbound
/// fragments are fed to the sender's [`PeerChannel`] and the completed frames decoded again.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    codec: PacketCodec,
}

impl Dispatcher {
    pub fn new(protocol_id: u32) -> Self {
        Self {
            codec: PacketCodec::new(protocol_id),
        }
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    /// Verify and decode one received datagram.
    pub fn decode(&self, datagram: &[u8]) -> Result<Inbound> {
        let (packet_type, mut stream) = self.codec.decode(datagram)?;
        if packet_type == PacketType::Fragment {
            let (header, data) = read_fragment(&mut stream)?;
            return Ok(Inbound::Fragment { header, data });
        }
        Ok(Inbound::Message(Message::read(packet_type, &mut stream)?))
    }

    /// Feed a fragment into `channel` and decode every packet it completes.
    ///
    /// A completed packet that fails to decode is dropped without affecting the others.
    pub fn reassemble(
        &self,
        channel: &mut PeerChannel,
        header: FragmentHeader,
        data: &[u8],
    ) -> Result<Vec<Message>> {
        if let Err(reason) = channel.reassembly.process_fragment(
            header.sequence,
            header.fragment_id,
            header.num_fragments,
            data,
        ) {
            global_metrics().fragment_rejected();
            return Err(reason.into());
        }
        global_metrics().fragment_accepted();

        let mut messages = Vec::new();
        for packet in channel.reassembly.drain_completed() {
            global_metrics().packet_reassembled();
            match self.decode(&packet.payload) {
                Ok(Inbound::Message(message)) => messages.push(message),
                Ok(Inbound::Fragment { .. }) => {
                    debug!(
                        sequence = packet.sequence,
                        "{}",
                        constants::ERR_FRAGMENT_IN_FRAGMENT
                    );
                    global_metrics().malformed_packet();
                }
                Err(e) => {
                    debug!(sequence = packet.sequence, error = %e, "dropping reassembled packet");
                    global_metrics().malformed_packet();
                }
            }
        }
        Ok(messages)
    }

    /// Encode a message into one or more datagrams.
    pub fn encode(&self, channel: &mut PeerChannel, message: Message) -> Result<Vec<Vec<u8>>> {
        let frame = message.encode(&self.codec)?;
        if frame.len() <= MAX_FRAGMENT_SIZE {
            return Ok(vec![frame]);
        }

        let sequence = channel.next_sequence;
        let fragments = split_packet_into_fragments(&self.codec, sequence, &frame)?;
        channel.next_sequence = channel.next_sequence.wrapping_add(1);
        trace!(
            sequence,
            frame_bytes = frame.len(),
            fragments = fragments.len(),
            "frame split into fragments"
        );
        Ok(fragments)
    }
}

/// Classify a decode failure for metrics.
pub(crate) fn record_decode_error(error: &ProtocolError) {
    match error {
        ProtocolError::CorruptPacket { .. } => global_metrics().corrupt_packet(),
        ProtocolError::FragmentRejected(_) => {}
        _ => global_metrics().malformed_packet(),
    }
}
