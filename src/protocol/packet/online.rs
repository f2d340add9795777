//! Online packets travel inside frames once a session is exchanging
//! datapackets: keepalive pings, the connection handshake that finishes
//! establishing a session, and disconnection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::protocol::io::{ByteReader, ByteWriter, CodecError};

/// How many placeholder system addresses the handshake carries.
pub const SYSTEM_ADDRESS_COUNT: usize = 10;

/// The fixed system-address template sent with [`ConnectionAccept`]:
/// loopback first, the rest unspecified.
pub fn system_address_template() -> Vec<SocketAddr> {
    let mut addrs = Vec::with_capacity(SYSTEM_ADDRESS_COUNT);
    addrs.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0));
    for _ in 1..SYSTEM_ADDRESS_COUNT {
        addrs.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
    }
    addrs
}

fn read_system_addresses(buf: &mut ByteReader<'_>) -> Result<Vec<SocketAddr>, CodecError> {
    let mut addrs = Vec::with_capacity(SYSTEM_ADDRESS_COUNT);
    for _ in 0..SYSTEM_ADDRESS_COUNT {
        addrs.push(buf.read_address()?);
    }
    Ok(addrs)
}

fn write_system_addresses(addrs: &[SocketAddr], buf: &mut ByteWriter) -> Result<(), CodecError> {
    for addr in addrs.iter().take(SYSTEM_ADDRESS_COUNT) {
        buf.write_address(*addr)?;
    }
    Ok(())
}

/// An enum of all online packets understood by this core.
#[derive(Debug, Clone)]
pub enum OnlinePacket {
    ConnectedPing(ConnectedPing),
    ConnectedPong(ConnectedPong),
    ConnectionRequest(ConnectionRequest),
    ConnectionAccept(ConnectionAccept),
    NewConnection(NewConnection),
    Disconnect(Disconnect),
}

impl OnlinePacket {
    /// Decodes the packet for `id`, the id byte already consumed.
    /// Returns `None` for payload bytes that are not online packets.
    pub fn read(id: u8, buf: &mut ByteReader<'_>) -> Result<Option<Self>, CodecError> {
        Ok(Some(match id {
            ConnectedPing::ID => Self::ConnectedPing(ConnectedPing::read(buf)?),
            ConnectedPong::ID => Self::ConnectedPong(ConnectedPong::read(buf)?),
            ConnectionRequest::ID => Self::ConnectionRequest(ConnectionRequest::read(buf)?),
            ConnectionAccept::ID => Self::ConnectionAccept(ConnectionAccept::read(buf)?),
            NewConnection::ID => Self::NewConnection(NewConnection::read(buf)?),
            Disconnect::ID => Self::Disconnect(Disconnect),
            _ => return Ok(None),
        }))
    }

    /// Encodes the packet, its own id byte included.
    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        match self {
            Self::ConnectedPing(pk) => pk.write(buf),
            Self::ConnectedPong(pk) => pk.write(buf),
            Self::ConnectionRequest(pk) => pk.write(buf),
            Self::ConnectionAccept(pk) => pk.write(buf),
            Self::NewConnection(pk) => pk.write(buf),
            Self::Disconnect(pk) => pk.write(buf),
        }
    }
}

/// Keepalive ping (`0x00`). The peer answers with a [`ConnectedPong`]
/// echoing the same id.
#[derive(Debug, Clone)]
pub struct ConnectedPing {
    pub ping_id: u64,
}

impl ConnectedPing {
    pub const ID: u8 = 0x00;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            ping_id: buf.read_u64()?,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_u64(self.ping_id);
        Ok(())
    }
}

/// Keepalive pong (`0x03`).
#[derive(Debug, Clone)]
pub struct ConnectedPong {
    pub ping_id: u64,
}

impl ConnectedPong {
    pub const ID: u8 = 0x03;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            ping_id: buf.read_u64()?,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_u64(self.ping_id);
        Ok(())
    }
}

/// Connection request (`0x09`), the first framed handshake packet from
/// the client.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub client_id: u64,
    pub send_ping: u64,
    pub use_security: bool,
}

impl ConnectionRequest {
    pub const ID: u8 = 0x09;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_id: buf.read_u64()?,
            send_ping: buf.read_u64()?,
            use_security: buf.read_bool()?,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_u64(self.client_id);
        buf.write_u64(self.send_ping);
        buf.write_bool(self.use_security);
        Ok(())
    }
}

/// Connection accept (`0x10`), the server's answer to a
/// [`ConnectionRequest`]: the client's own address, the system-address
/// template, the echoed ping time and our pong time.
#[derive(Debug, Clone)]
pub struct ConnectionAccept {
    pub client_address: SocketAddr,
    pub system_addresses: Vec<SocketAddr>,
    pub send_ping: u64,
    pub send_pong: u64,
}

impl ConnectionAccept {
    pub const ID: u8 = 0x10;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let client_address = buf.read_address()?;
        buf.skip(1)?; // unknown
        let system_addresses = read_system_addresses(buf)?;
        let send_ping = buf.read_u64()?;
        let send_pong = buf.read_u64()?;
        Ok(Self {
            client_address,
            system_addresses,
            send_ping,
            send_pong,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_address(self.client_address)?;
        buf.write_u8(0); // unknown
        write_system_addresses(&self.system_addresses, buf)?;
        buf.write_u64(self.send_ping);
        buf.write_u64(self.send_pong);
        Ok(())
    }
}

/// New incoming connection (`0x13`), the client's confirmation that the
/// handshake is complete. Receiving this establishes the session.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub server_address: SocketAddr,
    pub system_addresses: Vec<SocketAddr>,
    pub send_ping: u64,
    pub send_pong: u64,
}

impl NewConnection {
    pub const ID: u8 = 0x13;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let server_address = buf.read_address()?;
        let system_addresses = read_system_addresses(buf)?;
        let send_ping = buf.read_u64()?;
        let send_pong = buf.read_u64()?;
        Ok(Self {
            server_address,
            system_addresses,
            send_ping,
            send_pong,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_address(self.server_address)?;
        write_system_addresses(&self.system_addresses, buf)?;
        buf.write_u64(self.send_ping);
        buf.write_u64(self.send_pong);
        Ok(())
    }
}

/// Disconnect notification (`0x15`). Either peer may send this; the
/// session closes immediately.
#[derive(Debug, Clone)]
pub struct Disconnect;

impl Disconnect {
    pub const ID: u8 = 0x15;

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        Ok(())
    }
}
