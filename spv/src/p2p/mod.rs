//! Bitcoin P2P network protocol implementation
//!
//! The wallet keeps a single outbound connection to one peer. This module implements the
//! message codec and framing, the handshake, the ping/pong keep-alive and the connection actor
//! that turns the peer's messages into an ordered stream of events.

mod config;
mod connection;
mod handshake;
mod message;
mod ping_pong;
mod protocol;

pub use self::config::*;
pub use self::connection::*;
pub use self::handshake::*;
pub use self::message::*;
pub use self::ping_pong::*;
pub use self::protocol::*;
