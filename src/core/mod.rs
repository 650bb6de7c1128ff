//! # Core Protocol Components
//!
//! Bit-level serialization, packet framing, and fragmentation.
//!
//! ## Components
//! - **Bitpacker**: scratch-word bit writer/reader
//! - **Stream**: one `serialize` function per packet body, shared by both directions
//! - **Packet**: crc32 framing and the packet type field
//! - **Fragment**: splitting payloads larger than `MAX_FRAGMENT_SIZE`
//! - **Packet Buffer**: hardened reassembly ring
//!
//! ## Wire Format
//! ```text
//! [crc32(32)] [type(3)] [body...]
//! ```
//!
//! ## Security
//! - crc32 is checked before any other field is interpreted
//! - every read is bounds-checked and fails with an error instead of panicking
//! - reassembly memory is bounded regardless of the sequence numbers a peer sends

pub mod bitpacker;
pub mod fragment;
pub mod packet;
pub mod packet_buffer;
pub mod stream;
