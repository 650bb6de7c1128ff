use crate::config::CONNECTION_REQUEST_PADDING;
use crate::core::packet::{PacketCodec, PacketType};
use crate::core::stream::{ReadStream, Stream};
use crate::error::{constants, ProtocolError, Result};

/// Why a server refused a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    ServerFull = 0,
    AlreadyConnected = 1,
}

impl DenyReason {
    pub const COUNT: usize = 2;

    fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        let mut index = *self as i32;
        stream.serialize_int(&mut index, 0, Self::COUNT as i32 - 1)?;
        *self = if index == 0 {
            Self::ServerFull
        } else {
            Self::AlreadyConnected
        };
        Ok(())
    }
}

/// Connection-level messages exchanged between client and server.
///
/// Every message except the request carries both salts; the pair is what identifies a
/// session, so a peer that can only forge the source address cannot act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ConnectionRequest {
        client_salt: u64,
    },
    ConnectionDenied {
        client_salt: u64,
        reason: DenyReason,
    },
    ConnectionChallenge {
        client_salt: u64,
        challenge_salt: u64,
    },
    ConnectionResponse {
        client_salt: u64,
        challenge_salt: u64,
    },
    ConnectionKeepAlive {
        client_salt: u64,
        challenge_salt: u64,
    },
    ConnectionDisconnect {
        client_salt: u64,
        challenge_salt: u64,
    },
    /// Application data between connected peers. Not ordered, not retransmitted.
    ConnectionPayload {
        client_salt: u64,
        challenge_salt: u64,
        data: Vec<u8>,
    },
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::ConnectionRequest { .. } => PacketType::ConnectionRequest,
            Self::ConnectionDenied { .. } => PacketType::ConnectionDenied,
            Self::ConnectionChallenge { .. } => PacketType::ConnectionChallenge,
            Self::ConnectionResponse { .. } => PacketType::ConnectionResponse,
            Self::ConnectionKeepAlive { .. } => PacketType::ConnectionKeepAlive,
            Self::ConnectionDisconnect { .. } => PacketType::ConnectionDisconnect,
            Self::ConnectionPayload { .. } => PacketType::ConnectionPayload,
        }
    }

    pub fn client_salt(&self) -> u64 {
        match self {
            Self::ConnectionRequest { client_salt }
            | Self::ConnectionDenied { client_salt, .. }
            | Self::ConnectionChallenge { client_salt, .. }
            | Self::ConnectionResponse { client_salt, .. }
            | Self::ConnectionKeepAlive { client_salt, .. }
            | Self::ConnectionDisconnect { client_salt, .. }
            | Self::ConnectionPayload { client_salt, .. } => *client_salt,
        }
    }

    // Zeroed message of the given type, ready to be filled by a read.
    fn empty(packet_type: PacketType) -> Result<Self> {
        Ok(match packet_type {
            PacketType::Fragment => {
                return Err(ProtocolError::UnexpectedPacket(
                    constants::ERR_FRAGMENT_IN_FRAGMENT,
                ))
            }
            PacketType::ConnectionRequest => Self::ConnectionRequest { client_salt: 0 },
            PacketType::ConnectionDenied => Self::ConnectionDenied {
                client_salt: 0,
                reason: DenyReason::ServerFull,
            },
            PacketType::ConnectionChallenge => Self::ConnectionChallenge {
                client_salt: 0,
                challenge_salt: 0,
            },
            PacketType::ConnectionResponse => Self::ConnectionResponse {
                client_salt: 0,
                challenge_salt: 0,
            },
            PacketType::ConnectionKeepAlive => Self::ConnectionKeepAlive {
                client_salt: 0,
                challenge_salt: 0,
            },
            PacketType::ConnectionDisconnect => Self::ConnectionDisconnect {
                client_salt: 0,
                challenge_salt: 0,
            },
            PacketType::ConnectionPayload => Self::ConnectionPayload {
                client_salt: 0,
                challenge_salt: 0,
                data: Vec::new(),
            },
        })
    }

    /// Serialize the body (everything after the packet type).
    pub fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<()> {
        match self {
            Self::ConnectionRequest { client_salt } => {
                stream.serialize_u64(client_salt)?;
                // requests are padded so a spoofed request can never be amplified
                let mut padding = [0u8; CONNECTION_REQUEST_PADDING];
                stream.serialize_align()?;
                stream.serialize_bytes(&mut padding).map_err(|e| match e {
                    ProtocolError::StreamOverflow { .. } => {
                        ProtocolError::UnexpectedPacket(constants::ERR_SHORT_CONNECTION_REQUEST)
                    }
                    other => other,
                })
            }
            Self::ConnectionDenied {
                client_salt,
                reason,
            } => {
                stream.serialize_u64(client_salt)?;
                reason.serialize(stream)
            }
            Self::ConnectionChallenge {
                client_salt,
                challenge_salt,
            }
            | Self::ConnectionResponse {
                client_salt,
                challenge_salt,
            }
            | Self::ConnectionKeepAlive {
                client_salt,
                challenge_salt,
            }
            | Self::ConnectionDisconnect {
                client_salt,
                challenge_salt,
            } => {
                stream.serialize_u64(client_salt)?;
                stream.serialize_u64(challenge_salt)
            }
            Self::ConnectionPayload {
                client_salt,
                challenge_salt,
                data,
            } => {
                stream.serialize_u64(client_salt)?;
                stream.serialize_u64(challenge_salt)?;
                stream.serialize_trailing_bytes(data)
            }
        }
    }

    /// Upper bound on the serialized body size in bytes.
    pub fn max_body_size(&self) -> usize {
        match self {
            Self::ConnectionRequest { .. } => 8 + CONNECTION_REQUEST_PADDING + 1,
            Self::ConnectionPayload { data, .. } => 16 + 1 + data.len(),
            _ => 17,
        }
    }

    /// Frame this message as a single packet.
    pub fn encode(mut self, codec: &PacketCodec) -> Result<Vec<u8>> {
        let packet_type = self.packet_type();
        let capacity = self.max_body_size();
        codec.write_packet(packet_type, capacity, |stream| self.serialize(stream))
    }

    /// Read a message body of `packet_type` from a stream positioned after the type field.
    pub fn read(packet_type: PacketType, stream: &mut ReadStream<'_>) -> Result<Self> {
        let mut message = Self::empty(packet_type)?;
        message.serialize(stream)?;
        Ok(message)
    }

    /// Decode a complete framed packet that must not be a fragment.
    pub fn decode(codec: &PacketCodec, packet: &[u8]) -> Result<Self> {
        let (packet_type, mut stream) = codec.decode(packet)?;
        Self::read(packet_type, &mut stream)
    }
}
