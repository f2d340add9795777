/// Delivery guarantees a frame can request, stored in the top three bits
/// of the frame flag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Reliability {
    /// Unreliable (with no ack)
    Unreliable = 0,
    /// Unreliable with a sequence
    UnreliableSeq = 1,
    /// Reliable
    Reliable = 2,
    ReliableOrd = 3,
    /// Reliably sequenced **AND** ordered
    ReliableSeq = 4,
    /// never sent over the wire by MCPE peers
    UnreliableAck = 5,
    ReliableAck = 6,
    ReliableOrdAck = 7,
}

impl Reliability {
    pub fn from_flags(flags: u8) -> Self {
        match (flags & 0xe0) >> 5 {
            0 => Reliability::Unreliable,
            1 => Reliability::UnreliableSeq,
            2 => Reliability::Reliable,
            3 => Reliability::ReliableOrd,
            4 => Reliability::ReliableSeq,
            5 => Reliability::UnreliableAck,
            6 => Reliability::ReliableAck,
            _ => Reliability::ReliableOrdAck,
        }
    }

    pub fn to_flags(self) -> u8 {
        (self as u8) << 5
    }

    /// Whether frames with this reliability carry a message index.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::Reliable
                | Self::ReliableOrd
                | Self::ReliableSeq
                | Self::ReliableAck
                | Self::ReliableOrdAck
        )
    }

    /// Whether frames with this reliability carry an order index and
    /// channel.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            Self::UnreliableSeq | Self::ReliableOrd | Self::ReliableSeq | Self::ReliableOrdAck
        )
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::Reliable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        for value in 0..8u8 {
            let reliability = Reliability::from_flags(value << 5);
            assert_eq!(reliability.to_flags(), value << 5);
        }
    }

    #[test]
    fn index_predicates() {
        let with_message: Vec<u8> = (0..8u8)
            .filter(|v| Reliability::from_flags(v << 5).is_reliable())
            .collect();
        assert_eq!(with_message, vec![2, 3, 4, 6, 7]);

        let with_order: Vec<u8> = (0..8u8)
            .filter(|v| Reliability::from_flags(v << 5).is_ordered())
            .collect();
        assert_eq!(with_order, vec![1, 3, 4, 7]);
    }
}
