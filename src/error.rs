//! # Error Types
//!
//! Error handling for the datagram protocol.
//!
//! Every decode and validation path in this crate returns a [`Result`] instead of
//! panicking, so a malformed or hostile datagram can never take the process down.
//! The tick loop decides what to do with an error (usually: log and drop the packet).
//!
//! ## Error Categories
//! - **Stream Errors**: reads past the end of a buffer, bad padding, unaligned byte access
//! - **Framing Errors**: CRC mismatch, unknown packet type, oversized payloads
//! - **Fragment Errors**: the reassembly buffer refused a fragment (see [`FragmentRejection`])
//! - **I/O and Transport Errors**: socket failures surfaced by the transport layer
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use datagram_protocol::error::{ProtocolError, Result};
//! use tracing::debug;
//!
//! fn check_len(data: &[u8]) -> Result<()> {
//!     if data.len() < 4 {
//!         return Err(ProtocolError::StreamOverflow { requested: 32, available: data.len() * 8 });
//!     }
//!     Ok(())
//! }
//!
//! if let Err(e) = check_len(&[1, 2]) {
//!     debug!(error = %e, "dropping datagram");
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_SOCKET_BIND: &str = "Failed to bind UDP socket";
    pub const ERR_SOCKET_CLOSED: &str = "Socket is closed";
    pub const ERR_ADDRESS_IN_USE: &str = "Address already bound on this network";

    /// Framing errors
    pub const ERR_FRAGMENT_IN_FRAGMENT: &str = "Reassembled packet claims to be a fragment";
    pub const ERR_SHORT_CONNECTION_REQUEST: &str = "Connection request is missing its padding";

    /// Configuration errors
    pub const ERR_CONFIG_OPEN: &str = "Failed to open config file";
    pub const ERR_CONFIG_READ: &str = "Failed to read config file";
}

/// Reasons the reassembly buffer refuses a fragment.
///
/// Listed in the order the checks are applied. A rejected fragment never mutates the buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRejection {
    /// Fragment is empty or larger than `MAX_FRAGMENT_SIZE`.
    #[error("fragment size {0} out of bounds")]
    InvalidSize(usize),
    /// `num_fragments` is outside `[1, MAX_FRAGMENTS_PER_PACKET]`.
    #[error("fragment count {0} out of bounds")]
    InvalidFragmentCount(usize),
    /// `fragment_id` is not below `num_fragments`.
    #[error("fragment id {fragment_id} >= fragment count {num_fragments}")]
    InvalidFragmentId { fragment_id: usize, num_fragments: usize },
    /// A non-terminal fragment is not full size.
    #[error("non-terminal fragment {fragment_id} is only {size} bytes")]
    ShortFragment { fragment_id: usize, size: usize },
    /// Sequence is too far from the current sequence.
    #[error("sequence {sequence} too far from current {current}")]
    OutOfWindow { sequence: u16, current: u16 },
    /// The slot is still held by a different in-flight sequence.
    #[error("slot for sequence {sequence} still held by {occupant}")]
    SlotCollision { sequence: u16, occupant: u16 },
    /// Sequence is already behind the reassembly window.
    #[error("sequence {sequence} is behind the window ending at {current}")]
    Stale { sequence: u16, current: u16 },
    /// Fragment disagrees with the fragment count recorded for its sequence.
    #[error("fragment count {actual} does not match recorded {expected}")]
    FragmentCountMismatch { expected: usize, actual: usize },
    /// This fragment was already received.
    #[error("duplicate fragment {fragment_id} of sequence {sequence}")]
    Duplicate { sequence: u16, fragment_id: usize },
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream overflow: {requested} bits requested, {available} available")]
    StreamOverflow { requested: usize, available: usize },

    #[error("Alignment padding bits are not zero")]
    InvalidAlignment,

    #[error("Byte access at an unaligned bit position")]
    UnalignedAccess,

    #[error("Value {value} outside range [{min}, {max}]")]
    ValueOutOfRange { value: i64, min: i64, max: i64 },

    #[error("Corrupt packet: expected crc32 {expected:#010x}, got {actual:#010x}")]
    CorruptPacket { expected: u32, actual: u32 },

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u32),

    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(&'static str),

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Peer is not connected")]
    NotConnected,

    #[error("Fragment rejected: {0}")]
    FragmentRejected(#[from] FragmentRejection),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
