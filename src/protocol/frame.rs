use super::io::{ByteReader, ByteWriter, CodecError};
use super::reliability::Reliability;

/// The head byte written on every outbound datapacket. Inbound heads may
/// set low-nibble bits; those flag internal variants this core ignores.
pub const DATAGRAM_HEAD: u8 = 0x80;

/// The information for the given fragment.
/// This is used to determine how to reassemble the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentMeta {
    /// The total number of fragments in this frame.
    pub size: u32,
    /// The identifier for this fragment. The trailing fragments of one
    /// split share this id.
    pub id: u16,
    /// The arrangement of this fragment in the frame.
    pub index: u32,
}

impl FragmentMeta {
    pub fn new(size: u32, id: u16, index: u32) -> Self {
        Self { size, id, index }
    }
}

/// An individual data frame, encapsulating one message with its delivery
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The reliability of this frame. Decides which index fields exist.
    pub reliability: Reliability,
    /// The message index of the frame (if reliable).
    pub reliable_index: Option<u32>,
    /// The order index of the frame (if ordered or sequenced).
    pub order_index: Option<u32>,
    /// The order channel of the frame (if ordered or sequenced).
    pub order_channel: Option<u8>,
    /// Fragmentation info when the frame is split into parts.
    pub fragment_meta: Option<FragmentMeta>,
    /// The payload of the frame.
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(reliability: Reliability, body: Vec<u8>) -> Self {
        Self {
            reliability,
            reliable_index: None,
            order_index: None,
            order_channel: None,
            fragment_meta: None,
            body,
        }
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragment_meta.is_some()
    }

    /// Encoded size: flags + bit length, the optional index blocks, the
    /// optional fragment trio and the payload.
    pub fn total_len(&self) -> usize {
        3 + if self.reliability.is_reliable() { 3 } else { 0 }
            + if self.reliability.is_ordered() { 4 } else { 0 }
            + if self.is_fragmented() { 10 } else { 0 }
            + self.body.len()
    }

    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let flags = buf.read_u8()?;
        let reliability = Reliability::from_flags(flags);

        // length is transmitted in bits, rounded up to whole bytes
        let bits = buf.read_u16()? as usize;
        let length = (bits + 7) / 8;

        let mut frame = Frame::new(reliability, Vec::new());

        if reliability.is_reliable() {
            frame.reliable_index = Some(buf.read_u24_le()?);
        }
        if reliability.is_ordered() {
            frame.order_index = Some(buf.read_u24_le()?);
            frame.order_channel = Some(buf.read_u8()?);
        }
        if flags & 0x10 > 0 {
            frame.fragment_meta = Some(FragmentMeta {
                size: buf.read_u32()?,
                id: buf.read_u16()?,
                index: buf.read_u32()?,
            });
        }

        frame.body = buf.read_bytes(length)?.to_vec();
        Ok(frame)
    }

    pub fn write(&self, buf: &mut ByteWriter) {
        let mut flags = self.reliability.to_flags();
        if self.is_fragmented() {
            flags |= 0x10;
        }

        buf.write_u8(flags);
        buf.write_u16((self.body.len() as u16) * 8);

        if self.reliability.is_reliable() {
            buf.write_u24_le(self.reliable_index.unwrap_or(0));
        }
        if self.reliability.is_ordered() {
            buf.write_u24_le(self.order_index.unwrap_or(0));
            buf.write_u8(self.order_channel.unwrap_or(0));
        }
        if let Some(meta) = &self.fragment_meta {
            buf.write_u32(meta.size);
            buf.write_u16(meta.id);
            buf.write_u32(meta.index);
        }

        buf.write_bytes(&self.body);
    }
}

/// The outer carrier for frames: a head byte, a 24-bit little-endian
/// sequence number and one or more frames back to back. Other
/// implementations call this the "DataPacket".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    /// The sequence of this packet. Ack and Nack respond to this.
    pub sequence: u32,
    /// The frames of this packet, not exceeding the mtu size in total.
    pub frames: Vec<Frame>,
}

impl FramePacket {
    pub fn new(sequence: u32, frames: Vec<Frame>) -> Self {
        Self { sequence, frames }
    }

    /// Reads a datapacket body. The head byte has already been consumed
    /// by the dispatcher.
    pub fn read(buf: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let sequence = buf.read_u24_le()?;
        let mut frames = Vec::new();
        while buf.remaining() > 0 {
            frames.push(Frame::read(buf)?);
        }
        Ok(Self { sequence, frames })
    }

    pub fn write(&self, buf: &mut ByteWriter) {
        buf.write_u8(DATAGRAM_HEAD);
        buf.write_u24_le(self.sequence);
        for frame in &self.frames {
            frame.write(buf);
        }
    }

    pub fn total_len(&self) -> usize {
        4 + self.frames.iter().map(Frame::total_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut w = ByteWriter::new();
        frame.write(&mut w);
        assert_eq!(w.len(), frame.total_len());
        let buf = w.into_vec();
        Frame::read(&mut ByteReader::new(&buf)).unwrap()
    }

    #[test]
    fn unreliable_frame_round_trips() {
        let frame = Frame::new(Reliability::Unreliable, vec![1, 2, 3]);
        assert_eq!(round_trip(frame.clone()), frame);
        assert_eq!(frame.total_len(), 3 + 3);
    }

    #[test]
    fn reliable_ordered_frame_round_trips() {
        let mut frame = Frame::new(Reliability::ReliableOrd, vec![0x8e, 9, 9]);
        frame.reliable_index = Some(0x0004d2);
        frame.order_index = Some(7);
        frame.order_channel = Some(2);
        assert_eq!(round_trip(frame.clone()), frame);
        assert_eq!(frame.total_len(), 3 + 3 + 4 + 3);
    }

    #[test]
    fn fragmented_frame_round_trips() {
        let mut frame = Frame::new(Reliability::Reliable, vec![7; 64]);
        frame.reliable_index = Some(11);
        frame.fragment_meta = Some(FragmentMeta::new(4, 3, 1));
        assert_eq!(round_trip(frame.clone()), frame);
        assert_eq!(frame.total_len(), 3 + 3 + 10 + 64);
    }

    #[test]
    fn datapacket_round_trips() {
        let mut a = Frame::new(Reliability::Reliable, vec![1; 10]);
        a.reliable_index = Some(0);
        let b = Frame::new(Reliability::Unreliable, vec![2; 700]);
        let mut c = Frame::new(Reliability::ReliableOrd, vec![3; 600]);
        c.reliable_index = Some(1);
        c.order_index = Some(0);
        c.order_channel = Some(0);

        let pk = FramePacket::new(0x123456, vec![a, b, c]);
        assert!(pk.total_len() <= 1400);

        let mut w = ByteWriter::new();
        pk.write(&mut w);
        assert_eq!(w.as_slice()[0], DATAGRAM_HEAD);
        assert_eq!(w.len(), pk.total_len());

        let buf = w.into_vec();
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), DATAGRAM_HEAD);
        assert_eq!(FramePacket::read(&mut r).unwrap(), pk);
    }

    #[test]
    fn truncated_frame_is_an_overflow() {
        let mut frame = Frame::new(Reliability::Reliable, vec![5; 32]);
        frame.reliable_index = Some(3);
        let mut w = ByteWriter::new();
        frame.write(&mut w);
        let buf = w.into_vec();

        let cut = &buf[..buf.len() - 4];
        assert!(matches!(
            Frame::read(&mut ByteReader::new(cut)),
            Err(CodecError::Overflow { needed: 32, got: 28 })
        ));
    }
}
