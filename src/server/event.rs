use std::net::SocketAddr;

/// Events the listener surfaces to the application layer. Sessions are
/// identified by their peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A session finished the RakNet handshake.
    Connected(SocketAddr),
    /// An established session delivered a game packet. The payload keeps
    /// its leading `0x8e` byte.
    Packet(SocketAddr, Vec<u8>),
    /// A session closed, with the reason ("client disconnect",
    /// "timeout", or whatever the application passed to `close`).
    Disconnected(SocketAddr, String),
}
