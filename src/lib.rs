//! # Datagram Protocol
//!
//! Bit-packed UDP framing, fragmentation and a salted connection handshake for real-time
//! client/server applications.
//!
//! ## Layers
//! - [`core`]: bit streams, crc32 packet framing, fragment splitting and reassembly
//! - [`protocol`]: message bodies and the client/server connection state machines
//! - [`transport`]: non-blocking datagram sockets (tokio UDP and an in-memory network)
//! - [`service`]: endpoints tying a socket to a state machine, plus async runners
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! The state machines never read a clock or touch a socket. Every operation takes the
//! current time in seconds, which keeps the protocol deterministic under test.
//!
//! ```rust
//! use datagram_protocol::config::{ClientTiming, ServerConfig, PROTOCOL_ID};
//! use datagram_protocol::core::packet::PacketCodec;
//! use datagram_protocol::protocol::{Client, ClientState, Message, Server};
//! use datagram_protocol::transport::parse_address;
//!
//! let codec = PacketCodec::new(PROTOCOL_ID);
//! let server_addr = parse_address(127, 0, 0, 1, 50000);
//! let client_addr = parse_address(127, 0, 0, 1, 60000);
//!
//! let mut server = Server::new(&ServerConfig::default(), 1);
//! let mut client = Client::new(ClientTiming::default(), 2);
//! client.connect(server_addr, 0.0);
//!
//! for _ in 0..2 {
//!     client.send_packets(0.0);
//!     for (_, message) in client.drain_outgoing() {
//!         let datagram = message.encode(&codec)?;
//!         server.process_message(client_addr, Message::decode(&codec, &datagram)?, 0.0);
//!     }
//!     for (_, message) in server.drain_outgoing() {
//!         let datagram = message.encode(&codec)?;
//!         client.process_message(server_addr, Message::decode(&codec, &datagram)?, 0.0);
//!     }
//! }
//!
//! assert_eq!(client.state(), ClientState::Connected);
//! assert_eq!(server.num_connected(), 1);
//! # Ok::<(), datagram_protocol::error::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{Client, ClientEvent, ClientState, Message, Server, ServerEvent};
pub use service::{run_client, run_server, ClientEndpoint, ServerCommand, ServerEndpoint};
pub use transport::DatagramSocket;
