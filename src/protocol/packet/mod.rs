//! Packet definitions for both stages of a RakNet session.
//!
//! Offline packets travel as raw datagrams before a session is
//! established; online packets travel inside frames once datapackets are
//! flowing. Each packet decodes from a [`ByteReader`] with its id byte
//! already consumed and encodes to a [`ByteWriter`] writing its own id,
//! so the dispatch byte is read exactly once.
//!
//! [`ByteReader`]: crate::protocol::io::ByteReader
//! [`ByteWriter`]: crate::protocol::io::ByteWriter

/// The protocol used before a session exists: pings and the
/// open-connection handshake.
pub mod offline;

/// The protocol carried inside frames: connected pings, the connection
/// handshake and disconnection.
pub mod online;
