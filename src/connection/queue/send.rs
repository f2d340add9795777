use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::protocol::ack::{encode_ack, ACK, NACK};
use crate::protocol::frame::{FragmentMeta, Frame, FramePacket};
use crate::protocol::io::ByteWriter;
use crate::protocol::reliability::Reliability;
use crate::protocol::{DATAGRAM_HEADER, FRAGMENT_OVERHEAD, ORDER_CHANNELS};
use crate::util::{current_epoch, TriadCounter, TRIAD_MASK};

use super::RecoveryQueue;

/// How long a datapacket lives in recovery before it is retransmitted.
pub const RECOVERY_TIMEOUT_MS: u64 = 8_000;

/// The send half of a session: assigns message and order indexes, splits
/// oversized frames, wraps every frame into its own datapacket and keeps
/// the recovery and ACK/NACK bookkeeping. Owned exclusively by the
/// session's sender task.
#[derive(Debug)]
pub struct SendQueue {
    /// Negotiated mtu, written once by the reader during the handshake.
    mtu: Arc<AtomicU16>,
    sequence: TriadCounter,
    message_index: TriadCounter,
    order_index: [u32; ORDER_CHANNELS],
    split_id: u16,
    recovery: RecoveryQueue,
    ack_queue: HashSet<u32>,
    nack_queue: HashSet<u32>,
}

impl SendQueue {
    pub fn new(mtu: Arc<AtomicU16>) -> Self {
        Self {
            mtu,
            sequence: TriadCounter::new(),
            message_index: TriadCounter::new(),
            order_index: [0; ORDER_CHANNELS],
            split_id: 0,
            recovery: RecoveryQueue::new(),
            ack_queue: HashSet::new(),
            nack_queue: HashSet::new(),
        }
    }

    /// Encapsulates a payload and returns the encoded datagrams to put on
    /// the wire: one for a frame that fits the mtu, one per fragment
    /// otherwise.
    pub fn send_payload(
        &mut self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Vec<Vec<u8>> {
        let channel = channel as usize % ORDER_CHANNELS;
        let mut frame = Frame::new(reliability, payload);

        if reliability.is_reliable() {
            frame.reliable_index = Some(self.message_index.next());
        }
        if reliability.is_ordered() {
            frame.order_index = Some(self.order_index[channel]);
            frame.order_channel = Some(channel as u8);
            self.order_index[channel] = self.order_index[channel].wrapping_add(1) & TRIAD_MASK;
        }

        let mtu = self.mtu.load(Ordering::Acquire) as usize;
        if mtu == 0 || frame.total_len() + DATAGRAM_HEADER <= mtu {
            return vec![self.send_frame(frame)];
        }
        self.split(frame, mtu)
    }

    /// Wraps one frame into a datapacket with the next sequence number,
    /// stores it for recovery and returns the encoded bytes.
    pub fn send_frame(&mut self, frame: Frame) -> Vec<u8> {
        let pk = FramePacket::new(self.sequence.next(), vec![frame]);
        let mut buf = ByteWriter::with_capacity(pk.total_len());
        pk.write(&mut buf);
        let datagram = buf.into_vec();
        self.recovery
            .insert(pk.sequence, datagram.clone(), current_epoch());
        datagram
    }

    fn split(&mut self, frame: Frame, mtu: usize) -> Vec<Vec<u8>> {
        let chunk = mtu - FRAGMENT_OVERHEAD as usize;
        let count = (frame.body.len() + chunk - 1) / chunk;
        let id = self.split_id;
        self.split_id = self.split_id.wrapping_add(1);

        let mut datagrams = Vec::with_capacity(count);
        for (index, part) in frame.body.chunks(chunk).enumerate() {
            let mut fragment = Frame::new(frame.reliability, part.to_vec());
            fragment.fragment_meta = Some(FragmentMeta::new(count as u32, id, index as u32));

            if frame.reliability.is_reliable() {
                // fragment 0 keeps the index already assigned to the
                // whole message
                fragment.reliable_index = if index == 0 {
                    frame.reliable_index
                } else {
                    Some(self.message_index.next())
                };
            }
            if frame.reliability == Reliability::ReliableOrd {
                fragment.order_index = frame.order_index;
                fragment.order_channel = frame.order_channel;
            }

            datagrams.push(self.send_frame(fragment));
        }
        datagrams
    }

    /// Queues sequences for the next ACK flush. A sequence that shows up
    /// here was received, so any pending NACK for it is dropped.
    pub fn queue_ack(&mut self, seqs: &[u32]) {
        for seq in seqs {
            self.ack_queue.insert(*seq);
            self.nack_queue.remove(seq);
        }
    }

    /// Queues sequences for the next NACK flush.
    pub fn queue_nack(&mut self, seqs: &[u32]) {
        self.nack_queue.extend(seqs.iter().copied());
    }

    /// Encodes and clears the pending ACK set, if any.
    pub fn flush_acks(&mut self) -> Option<Vec<u8>> {
        Self::flush_queue(&mut self.ack_queue, ACK)
    }

    /// Encodes and clears the pending NACK set, if any.
    pub fn flush_nacks(&mut self) -> Option<Vec<u8>> {
        Self::flush_queue(&mut self.nack_queue, NACK)
    }

    fn flush_queue(queue: &mut HashSet<u32>, id: u8) -> Option<Vec<u8>> {
        if queue.is_empty() {
            return None;
        }
        let seqs: Vec<u32> = queue.drain().collect();
        let mut buf = ByteWriter::new();
        buf.write_u8(id);
        encode_ack(seqs, &mut buf);
        Some(buf.into_vec())
    }

    /// The peer acknowledged these sequences; stop retransmitting them.
    pub fn ack_received(&mut self, seqs: &[u32]) {
        for seq in seqs {
            self.recovery.ack(*seq);
        }
    }

    /// The peer reported these sequences missing; returns the stored
    /// datagrams to resend right away. The entries stay in recovery
    /// until acknowledged or aged out.
    pub fn nack_received(&mut self, seqs: &[u32]) -> Vec<Vec<u8>> {
        seqs.iter()
            .filter_map(|seq| self.recovery.get(*seq).cloned())
            .collect()
    }

    /// Datagrams whose recovery entries aged past the timeout. Each is
    /// retransmitted once and dropped from recovery.
    pub fn flush_stale(&mut self, now: u64) -> Vec<Vec<u8>> {
        self.recovery.take_stale(now, RECOVERY_TIMEOUT_MS)
    }

    pub fn recovery_len(&self) -> usize {
        self.recovery.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::io::ByteReader;

    fn queue_with_mtu(mtu: u16) -> SendQueue {
        SendQueue::new(Arc::new(AtomicU16::new(mtu)))
    }

    fn parse(datagram: &[u8]) -> FramePacket {
        let mut r = ByteReader::new(datagram);
        assert_eq!(r.read_u8().unwrap() & 0xf0, 0x80);
        FramePacket::read(&mut r).unwrap()
    }

    #[test]
    fn first_sequence_is_zero() {
        let mut queue = queue_with_mtu(1400);
        let datagrams = queue.send_payload(vec![1, 2, 3], Reliability::Reliable, 0);
        assert_eq!(datagrams.len(), 1);

        let pk = parse(&datagrams[0]);
        assert_eq!(pk.sequence, 0);
        assert_eq!(pk.frames[0].reliable_index, Some(0));

        let pk = parse(&queue.send_payload(vec![4], Reliability::Reliable, 0)[0]);
        assert_eq!(pk.sequence, 1);
        assert_eq!(pk.frames[0].reliable_index, Some(1));
    }

    #[test]
    fn order_indexes_count_per_channel() {
        let mut queue = queue_with_mtu(1400);
        let a = parse(&queue.send_payload(vec![1], Reliability::ReliableOrd, 1)[0]);
        let b = parse(&queue.send_payload(vec![2], Reliability::ReliableOrd, 1)[0]);
        let c = parse(&queue.send_payload(vec![3], Reliability::ReliableOrd, 2)[0]);

        assert_eq!(a.frames[0].order_index, Some(0));
        assert_eq!(a.frames[0].order_channel, Some(1));
        assert_eq!(b.frames[0].order_index, Some(1));
        assert_eq!(c.frames[0].order_index, Some(0));
        assert_eq!(c.frames[0].order_channel, Some(2));
    }

    #[test]
    fn oversized_payloads_split_into_fragments() {
        let mut queue = queue_with_mtu(1200);
        let payload: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
        let datagrams = queue.send_payload(payload.clone(), Reliability::Reliable, 0);

        // ceil(4000 / 1166) fragments
        assert_eq!(datagrams.len(), 4);

        let mut rebuilt = Vec::new();
        for (i, datagram) in datagrams.iter().enumerate() {
            let pk = parse(datagram);
            assert_eq!(pk.sequence, i as u32);
            assert!(pk.total_len() <= 1200);

            let frame = &pk.frames[0];
            let meta = frame.fragment_meta.as_ref().unwrap();
            assert_eq!(meta.size, 4);
            assert_eq!(meta.id, 0);
            assert_eq!(meta.index, i as u32);
            assert_eq!(frame.reliable_index, Some(i as u32));
            assert_eq!(frame.reliability, Reliability::Reliable);
            rebuilt.extend_from_slice(&frame.body);
        }
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn ordered_splits_share_order_metadata() {
        let mut queue = queue_with_mtu(600);
        let datagrams = queue.send_payload(vec![7; 2000], Reliability::ReliableOrd, 3);
        assert!(datagrams.len() > 1);

        for datagram in &datagrams {
            let pk = parse(datagram);
            assert_eq!(pk.frames[0].order_index, Some(0));
            assert_eq!(pk.frames[0].order_channel, Some(3));
        }
    }

    #[test]
    fn acks_clear_recovery_and_nacks_resend() {
        let mut queue = queue_with_mtu(1400);
        let first = queue.send_payload(vec![1], Reliability::Reliable, 0);
        queue.send_payload(vec![2], Reliability::Reliable, 0);
        assert_eq!(queue.recovery_len(), 2);

        queue.ack_received(&[1]);
        assert_eq!(queue.recovery_len(), 1);

        let resend = queue.nack_received(&[0, 1]);
        assert_eq!(resend, vec![first[0].clone()]);
        assert_eq!(queue.recovery_len(), 1, "nack keeps the entry");
    }

    #[test]
    fn ack_and_nack_flushes_emit_single_packets() {
        let mut queue = queue_with_mtu(1400);
        assert!(queue.flush_acks().is_none());

        queue.queue_ack(&[0, 1, 2]);
        let ack = queue.flush_acks().unwrap();
        assert_eq!(ack[0], ACK);
        let mut r = ByteReader::new(&ack[1..]);
        assert_eq!(crate::protocol::ack::decode_ack(&mut r).unwrap(), vec![0, 1, 2]);
        assert!(queue.flush_acks().is_none(), "flush clears the queue");

        queue.queue_nack(&[5]);
        let nack = queue.flush_nacks().unwrap();
        assert_eq!(nack[0], NACK);
        let mut r = ByteReader::new(&nack[1..]);
        assert_eq!(crate::protocol::ack::decode_ack(&mut r).unwrap(), vec![5]);
    }

    #[test]
    fn receiving_a_sequence_cancels_its_pending_nack() {
        let mut queue = queue_with_mtu(1400);
        queue.queue_nack(&[2]);
        queue.queue_ack(&[2]);
        assert!(queue.flush_nacks().is_none());
        assert!(queue.flush_acks().is_some());
    }

    #[test]
    fn stale_entries_retransmit_once() {
        let mut queue = queue_with_mtu(1400);
        let sent = queue.send_payload(vec![9], Reliability::Reliable, 0);

        let later = current_epoch() + RECOVERY_TIMEOUT_MS + 1;
        let stale = queue.flush_stale(later);
        assert_eq!(stale, sent);
        assert_eq!(queue.recovery_len(), 0);
        assert!(queue.flush_stale(later + 10_000).is_empty());
    }
}
