//! Offline packets are sent as plain datagrams while the peer is still
//! unidentified: the unconnected ping used for server-list discovery and
//! the two open-connection request/reply pairs of the handshake.

use std::net::SocketAddr;

use crate::protocol::io::{ByteReader, ByteWriter, CodecError};

/// An enum of all offline packets understood by this core.
#[derive(Debug, Clone)]
pub enum OfflinePacket {
    UnconnectedPing(UnconnectedPing),
    UnconnectedPong(UnconnectedPong),
    OpenConnectRequest(OpenConnectRequest),
    OpenConnectReply(OpenConnectReply),
    SessionInfoRequest(SessionInfoRequest),
    SessionInfoReply(SessionInfoReply),
}

impl OfflinePacket {
    /// Decodes the packet for `id`, the id byte already consumed.
    /// Returns `None` for ids this core does not recognize.
    pub fn read(id: u8, buf: &mut ByteReader<'_>) -> Result<Option<Self>, CodecError> {
        Ok(Some(match id {
            UnconnectedPing::ID => Self::UnconnectedPing(UnconnectedPing::read(buf)?),
            UnconnectedPong::ID => Self::UnconnectedPong(UnconnectedPong::read(buf)?),
            OpenConnectRequest::ID => Self::OpenConnectRequest(OpenConnectRequest::read(buf)?),
            OpenConnectReply::ID => Self::OpenConnectReply(OpenConnectReply::read(buf)?),
            SessionInfoRequest::ID => Self::SessionInfoRequest(SessionInfoRequest::read(buf)?),
            SessionInfoReply::ID => Self::SessionInfoReply(SessionInfoReply::read(buf)?),
            _ => return Ok(None),
        }))
    }

    /// Encodes the packet, its own id byte included.
    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        match self {
            Self::UnconnectedPing(pk) => pk.write(buf),
            Self::UnconnectedPong(pk) => pk.write(buf),
            Self::OpenConnectRequest(pk) => pk.write(buf),
            Self::OpenConnectReply(pk) => pk.write(buf),
            Self::SessionInfoRequest(pk) => pk.write(buf),
            Self::SessionInfoReply(pk) => pk.write(buf),
        }
    }
}

/// Unconnected Ping (`0x01`), the server-list query. Answered with an
/// [`UnconnectedPong`] without creating a session.
#[derive(Debug, Clone)]
pub struct UnconnectedPing {
    pub ping_id: u64,
    pub client_guid: u64,
}

impl UnconnectedPing {
    pub const ID: u8 = 0x01;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let ping_id = buf.read_u64()?;
        buf.read_magic()?;
        let client_guid = buf.read_u64()?;
        Ok(Self {
            ping_id,
            client_guid,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_u64(self.ping_id);
        buf.write_magic();
        buf.write_u64(self.client_guid);
        Ok(())
    }
}

/// Unconnected Pong (`0x1c`), carrying the server status string.
#[derive(Debug, Clone)]
pub struct UnconnectedPong {
    pub ping_id: u64,
    pub server_id: u64,
    pub motd: String,
}

impl UnconnectedPong {
    pub const ID: u8 = 0x1c;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let ping_id = buf.read_u64()?;
        let server_id = buf.read_u64()?;
        buf.read_magic()?;
        let motd = buf.read_string()?;
        Ok(Self {
            ping_id,
            server_id,
            motd,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_u64(self.ping_id);
        buf.write_u64(self.server_id);
        buf.write_magic();
        buf.write_string(&self.motd)?;
        Ok(())
    }
}

/// Open Connection Request 1 (`0x05`). The zero padding after the
/// protocol byte probes the path MTU: the usable size is 18 plus however
/// much padding survived.
#[derive(Debug, Clone)]
pub struct OpenConnectRequest {
    pub protocol: u8,
    pub mtu_size: u16,
}

impl OpenConnectRequest {
    pub const ID: u8 = 0x05;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        buf.read_magic()?;
        let protocol = buf.read_u8()?;
        let mtu_size = 18 + buf.read_rest().len() as u16;
        Ok(Self { protocol, mtu_size })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_magic();
        buf.write_u8(self.protocol);
        buf.write_bytes(&vec![0u8; self.mtu_size.saturating_sub(18) as usize]);
        Ok(())
    }
}

/// Open Connection Reply 1 (`0x06`), echoing the negotiated mtu.
#[derive(Debug, Clone)]
pub struct OpenConnectReply {
    pub server_id: u64,
    pub mtu_size: u16,
}

impl OpenConnectReply {
    pub const ID: u8 = 0x06;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        buf.read_magic()?;
        let server_id = buf.read_u64()?;
        buf.skip(1)?; // security byte, always 0
        let mtu_size = buf.read_u16()?;
        Ok(Self {
            server_id,
            mtu_size,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_magic();
        buf.write_u64(self.server_id);
        buf.write_u8(0);
        buf.write_u16(self.mtu_size);
        Ok(())
    }
}

/// Open Connection Request 2 (`0x07`), committing the mtu and the client
/// guid.
#[derive(Debug, Clone)]
pub struct SessionInfoRequest {
    pub server_address: SocketAddr,
    pub mtu_size: u16,
    pub client_id: u64,
}

impl SessionInfoRequest {
    pub const ID: u8 = 0x07;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        buf.read_magic()?;
        let server_address = buf.read_address()?;
        let mtu_size = buf.read_u16()?;
        let client_id = buf.read_u64()?;
        Ok(Self {
            server_address,
            mtu_size,
            client_id,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_magic();
        buf.write_address(self.server_address)?;
        buf.write_u16(self.mtu_size);
        buf.write_u64(self.client_id);
        Ok(())
    }
}

/// Open Connection Reply 2 (`0x08`), echoing the client's own address
/// back at it.
#[derive(Debug, Clone)]
pub struct SessionInfoReply {
    pub server_id: u64,
    pub client_address: SocketAddr,
    pub mtu_size: u16,
}

impl SessionInfoReply {
    pub const ID: u8 = 0x08;

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        buf.read_magic()?;
        let server_id = buf.read_u64()?;
        let client_address = buf.read_address()?;
        let mtu_size = buf.read_u16()?;
        buf.skip(1)?; // security byte, always 0
        Ok(Self {
            server_id,
            client_address,
            mtu_size,
        })
    }

    pub fn write(&self, buf: &mut ByteWriter) -> Result<(), CodecError> {
        buf.write_u8(Self::ID);
        buf.write_magic();
        buf.write_u64(self.server_id);
        buf.write_address(self.client_address)?;
        buf.write_u16(self.mtu_size);
        buf.write_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_connect_request_mtu_counts_padding() {
        let pk = OpenConnectRequest {
            protocol: 7,
            mtu_size: 1018,
        };
        let mut w = ByteWriter::new();
        pk.write(&mut w).unwrap();
        let buf = w.into_vec();
        // id + magic + protocol + 1000 bytes of padding
        assert_eq!(buf.len(), 1 + 16 + 1 + 1000);

        let mut r = ByteReader::new(&buf[1..]);
        let back = OpenConnectRequest::read(&mut r).unwrap();
        assert_eq!(back.protocol, 7);
        assert_eq!(back.mtu_size, 1018);
    }

    #[test]
    fn replies_round_trip() {
        let reply = OpenConnectReply {
            server_id: 0xfeed,
            mtu_size: 1400,
        };
        let mut w = ByteWriter::new();
        reply.write(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf[0], OpenConnectReply::ID);
        let back = OpenConnectReply::read(&mut ByteReader::new(&buf[1..])).unwrap();
        assert_eq!(back.server_id, 0xfeed);
        assert_eq!(back.mtu_size, 1400);

        let reply = SessionInfoReply {
            server_id: 1,
            client_address: "10.0.0.2:54321".parse().unwrap(),
            mtu_size: 1200,
        };
        let mut w = ByteWriter::new();
        reply.write(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf[0], SessionInfoReply::ID);
        let back = SessionInfoReply::read(&mut ByteReader::new(&buf[1..])).unwrap();
        assert_eq!(back.client_address, reply.client_address);
        assert_eq!(back.mtu_size, 1200);
    }

    #[test]
    fn unknown_id_reads_as_none() {
        let mut r = ByteReader::new(&[]);
        assert!(OfflinePacket::read(0x42, &mut r).unwrap().is_none());
    }
}
