//! Wire protocol implementation for RakNet.
//!
//! This module contains the binary codec, the acknowledgement codec, the
//! frame (datapacket) layer and every packet needed to drive a RakNet
//! session from the server side.

/// Run-length acknowledgement payloads (`0xc0` ACK / `0xa0` NACK).
pub mod ack;
/// Frames are the encapsulation RakNet uses inside datapackets. This is
/// also called the "EncapsulatedPacket" in other implementations.
pub mod frame;
/// Bounds-checked primitive reader/writer used by every packet.
pub mod io;
/// The constant added to all offline packets to identify them as RakNet.
pub mod magic;
/// MCPE specifics: the status string served to unconnected pings.
pub mod mcpe;
/// Offline and online packet definitions and their handshake payloads.
pub mod packet;
pub mod reliability;

pub use magic::MAGIC;

/// The maximum amount of fragments a single split packet may declare.
/// Guards the reassembly table against hostile counts.
pub const MAX_FRAGS: u32 = 1024;
/// The number of order channels a session tracks.
pub const ORDER_CHANNELS: usize = 8;
/// Datapacket header: one head byte plus a 24-bit sequence number.
pub const DATAGRAM_HEADER: usize = 4;
/// Per-fragment overhead subtracted from the MTU when splitting: datagram
/// header plus a worst-case frame header.
pub const FRAGMENT_OVERHEAD: u16 = 34;
