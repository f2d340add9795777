//! A RakNet transport core for Minecraft: Pocket Edition servers.
//!
//! The crate turns an unreliable UDP datagram stream into reliable,
//! ordered, optionally fragmented message channels per client, and drives
//! each client through the RakNet handshake until game packets flow.
//!
//! [`Listener`] is the entry point: bind it, start it, then consume
//! [`ServerEvent`]s and push payloads back with
//! [`Listener::send`](server::Listener::send).
//!
//! [`Listener`]: server::Listener
//! [`ServerEvent`]: server::ServerEvent

pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod util;

pub use protocol::mcpe::motd::Motd;
pub use protocol::reliability::Reliability;
pub use server::{Listener, ServerConfig, ServerEvent};
