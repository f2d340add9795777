//! Bounds-checked binary reader and writer for the RakNet wire format.
//!
//! Every packet in this crate is decoded through [`ByteReader`] and encoded
//! through [`ByteWriter`]. Reads past the end of the input fail with
//! [`CodecError::Overflow`] carrying how much was needed and how much was
//! left; the session catches that per datagram, logs a hex dump and drops
//! only the offending datagram.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

use super::magic::MAGIC;

/// Errors produced by the wire codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A read was attempted past the end of the input.
    #[error("overflow: needed {needed}, got {got}")]
    Overflow { needed: usize, got: usize },
    /// A string longer than 65535 bytes cannot be length-prefixed.
    #[error("string too long: {length} bytes overflows u16")]
    StringOverflow { length: usize },
    /// Address records only support IPv4 (version byte 4).
    #[error("unsupported address version {0}")]
    AddressVersion(u8),
    /// The 16 offline magic bytes did not match.
    #[error("offline magic mismatch")]
    BadMagic,
    /// A wire string was not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidString,
}

/// A cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        let got = self.remaining();
        if got < needed {
            return Err(CodecError::Overflow { needed, got });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? > 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u24(&mut self) -> Result<u32, CodecError> {
        Ok(BigEndian::read_u24(self.take(3)?))
    }

    pub fn read_u24_le(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u24(self.take(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(BigEndian::read_f64(self.take(8)?))
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Consumes and returns everything left in the input.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    /// Reads a u16-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidString)
    }

    /// Reads an address record: version byte 4, four XOR-0xff octets and a
    /// big-endian port.
    pub fn read_address(&mut self) -> Result<SocketAddr, CodecError> {
        let version = self.read_u8()?;
        if version != 4 {
            return Err(CodecError::AddressVersion(version));
        }
        let octets = self.take(4)?;
        let port = self.read_u16()?;
        let ip = Ipv4Addr::new(!octets[0], !octets[1], !octets[2], !octets[3]);
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }

    /// Reads and validates the 16 offline magic bytes.
    pub fn read_magic(&mut self) -> Result<(), CodecError> {
        let bytes = self.take(16)?;
        if bytes != MAGIC {
            return Err(CodecError::BadMagic);
        }
        Ok(())
    }
}

/// A growable output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, n: u8) {
        self.buf.push(n);
    }

    pub fn write_bool(&mut self, b: bool) {
        self.write_u8(b as u8);
    }

    pub fn write_u16(&mut self, n: u16) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_u16_le(&mut self, n: u16) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    /// Writes the low 24 bits of `n` big-endian.
    pub fn write_u24(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_be_bytes()[1..4]);
    }

    /// Writes the low 24 bits of `n` little-endian.
    pub fn write_u24_le(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_le_bytes()[0..3]);
    }

    pub fn write_u32(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_u32_le(&mut self, n: u32) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_u64(&mut self, n: u64) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_u64_le(&mut self, n: u64) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub fn write_f32(&mut self, f: f32) {
        self.write_u32(f.to_bits());
    }

    pub fn write_f64(&mut self, f: f64) {
        self.write_u64(f.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a u16-length-prefixed string. Strings longer than 65535 bytes
    /// are a caller bug and fail.
    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        if s.len() > u16::MAX as usize {
            return Err(CodecError::StringOverflow { length: s.len() });
        }
        self.write_u16(s.len() as u16);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Writes an address record. Only IPv4 addresses exist on this wire.
    pub fn write_address(&mut self, addr: SocketAddr) -> Result<(), CodecError> {
        match addr {
            SocketAddr::V4(v4) => {
                self.write_u8(4);
                for octet in v4.ip().octets() {
                    self.write_u8(!octet);
                }
                self.write_u16(v4.port());
                Ok(())
            }
            SocketAddr::V6(_) => Err(CodecError::AddressVersion(6)),
        }
    }

    pub fn write_magic(&mut self) {
        self.write_bytes(&MAGIC);
    }
}
