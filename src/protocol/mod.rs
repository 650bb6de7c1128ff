//! # Connection Protocol
//!
//! Message bodies and the client/server connection state machines.
//!
//! ## Components
//! - **Message**: the seven non-fragment packet bodies
//! - **Handshake**: salt generation and the server's pending-challenge table
//! - **Client** / **Server**: time-driven state machines with no I/O of their own
//! - **Dispatcher**: datagram <-> message routing, including fragmentation
//!
//! ## Handshake
//! ```text
//! client                                   server
//!   ConnectionRequest(client_salt)    ->
//!                                     <-   ConnectionChallenge(client_salt, challenge_salt)
//!   ConnectionResponse(both salts)    ->
//!                                     <-   ConnectionKeepAlive(both salts)
//! ```
//!
//! Every later packet carries both salts; a packet whose salts do not match the session is
//! ignored.

pub mod client;
pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod server;


pub use client::{Client, ClientEvent, ClientState};
pub use dispatcher::{Dispatcher, Inbound, PeerChannel};
pub use message::{DenyReason, Message};
pub use server::{DisconnectReason, Server, ServerEvent};
