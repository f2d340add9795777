use crate::connection::controller::window::{PacketWindow, ReliableWindow};
use crate::protocol::frame::{Frame, FramePacket};
use crate::util::TRIAD_MASK;

use super::FragmentQueue;

/// The receive half of a session: accepts datapackets, tracks which
/// sequences to ACK or NACK, reorders reliable frames and reassembles
/// splits. Owned exclusively by the session's reader task.
#[derive(Debug, Clone)]
pub struct RecvQueue {
    window: PacketWindow,
    reliable: ReliableWindow,
    fragments: FragmentQueue,
    ack: Vec<u32>,
    nack: Vec<u32>,
    ready: Vec<Frame>,
}

impl RecvQueue {
    pub fn new() -> Self {
        Self {
            window: PacketWindow::new(),
            reliable: ReliableWindow::new(),
            fragments: FragmentQueue::new(),
            ack: Vec::new(),
            nack: Vec::new(),
            ready: Vec::new(),
        }
    }

    /// Accepts one datapacket. Returns `false` when the sequence falls
    /// outside the window or was received before; the packet is dropped
    /// whole in that case.
    ///
    /// `connected` gates split reassembly: fragments from sessions that
    /// have not finished the handshake are discarded.
    pub fn insert(&mut self, pk: FramePacket, connected: bool) -> bool {
        let seq = pk.sequence & TRIAD_MASK;
        if !self.window.insert(seq) {
            return false;
        }
        self.ack.push(seq);

        let diff = self.window.last_diff(seq);
        if diff > 1 {
            self.nack.extend(self.window.missing_up_to(seq));
        }
        if diff >= 1 {
            self.window.advance(seq);
        }

        // frames of an out-of-order packet still feed the reorder buffer
        for frame in pk.frames {
            self.handle_frame(frame, connected);
        }
        true
    }

    /// Frames that are in order, reassembled and ready for dispatch.
    pub fn flush_ready(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.ready)
    }

    /// Sequences to acknowledge on the next flush tick.
    pub fn ack_flush(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.ack)
    }

    /// Sequences to report missing on the next flush tick.
    pub fn nack_flush(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.nack)
    }

    /// Garbage-collects window entries that can no longer be accepted.
    pub fn prune_window(&mut self) {
        self.window.prune();
    }

    fn handle_frame(&mut self, frame: Frame, connected: bool) {
        match frame.reliable_index {
            Some(index) => {
                for ordered in self.reliable.insert(index & TRIAD_MASK, frame) {
                    self.deliver(ordered, connected);
                }
            }
            None => self.deliver(frame, connected),
        }
    }

    fn deliver(&mut self, frame: Frame, connected: bool) {
        if frame.is_fragmented() {
            if !connected {
                return;
            }
            if let Some(payload) = self.fragments.insert(&frame) {
                self.ready.push(Frame::new(frame.reliability, payload));
            }
            return;
        }
        self.ready.push(frame);
    }
}

impl Default for RecvQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::FragmentMeta;
    use crate::protocol::reliability::Reliability;

    fn packet(seq: u32, frames: Vec<Frame>) -> FramePacket {
        FramePacket::new(seq, frames)
    }

    fn reliable(index: u32, tag: u8) -> Frame {
        let mut frame = Frame::new(Reliability::Reliable, vec![tag]);
        frame.reliable_index = Some(index);
        frame
    }

    #[test]
    fn sequential_packets_ack_and_deliver() {
        let mut queue = RecvQueue::new();
        assert!(queue.insert(packet(0, vec![reliable(0, 10)]), true));
        assert!(queue.insert(packet(1, vec![reliable(1, 11)]), true));

        assert_eq!(queue.ack_flush(), vec![0, 1]);
        assert!(queue.nack_flush().is_empty());
        let tags: Vec<u8> = queue.flush_ready().iter().map(|f| f.body[0]).collect();
        assert_eq!(tags, vec![10, 11]);
    }

    #[test]
    fn a_gap_queues_nacks() {
        let mut queue = RecvQueue::new();
        queue.insert(packet(0, vec![reliable(0, 0)]), true);
        queue.insert(packet(1, vec![reliable(1, 1)]), true);
        queue.insert(packet(3, vec![reliable(3, 3)]), true);

        assert_eq!(queue.nack_flush(), vec![2]);

        // the retransmission closes the gap and drains the reorder buffer
        queue.insert(packet(2, vec![reliable(2, 2)]), true);
        let tags: Vec<u8> = queue.flush_ready().iter().map(|f| f.body[0]).collect();
        assert_eq!(tags, vec![0, 1, 2, 3]);
    }

    #[test]
    fn duplicates_are_dropped_whole() {
        let mut queue = RecvQueue::new();
        assert!(queue.insert(packet(0, vec![reliable(0, 0)]), true));
        assert!(!queue.insert(packet(0, vec![reliable(0, 0)]), true));
        assert_eq!(queue.ack_flush(), vec![0]);
        assert_eq!(queue.flush_ready().len(), 1);
    }

    #[test]
    fn reordered_message_indexes_deliver_in_order() {
        let mut queue = RecvQueue::new();
        queue.insert(packet(0, vec![reliable(0, 0)]), true);
        queue.insert(packet(1, vec![reliable(2, 2)]), true);
        queue.insert(packet(2, vec![reliable(1, 1)]), true);

        let tags: Vec<u8> = queue.flush_ready().iter().map(|f| f.body[0]).collect();
        assert_eq!(tags, vec![0, 1, 2]);
    }

    #[test]
    fn out_of_order_datapacket_payloads_still_count() {
        let mut queue = RecvQueue::new();
        queue.insert(packet(1, vec![reliable(1, 1)]), true);
        // seq 0 arrives late; its frame closes the message-index gap
        queue.insert(packet(0, vec![reliable(0, 0)]), true);

        let tags: Vec<u8> = queue.flush_ready().iter().map(|f| f.body[0]).collect();
        assert_eq!(tags, vec![0, 1]);
    }

    #[test]
    fn splits_reassemble_only_once_connected() {
        let mut split = Frame::new(Reliability::Reliable, vec![1, 2]);
        split.reliable_index = Some(0);
        split.fragment_meta = Some(FragmentMeta::new(2, 0, 0));
        let mut queue = RecvQueue::new();
        queue.insert(packet(0, vec![split.clone()]), false);
        assert!(queue.flush_ready().is_empty(), "pre-handshake splits drop");

        let mut queue = RecvQueue::new();
        queue.insert(packet(0, vec![split]), true);
        let mut second = Frame::new(Reliability::Reliable, vec![3, 4]);
        second.reliable_index = Some(1);
        second.fragment_meta = Some(FragmentMeta::new(2, 0, 1));
        queue.insert(packet(1, vec![second]), true);

        let ready = queue.flush_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].body, vec![1, 2, 3, 4]);
        assert_eq!(ready[0].reliability, Reliability::Reliable);
        assert!(!ready[0].is_fragmented());
    }

    #[test]
    fn unreliable_frames_skip_the_reorder_buffer() {
        let mut queue = RecvQueue::new();
        queue.insert(packet(0, vec![Frame::new(Reliability::Unreliable, vec![9])]), true);
        assert_eq!(queue.flush_ready().len(), 1);
    }
}
