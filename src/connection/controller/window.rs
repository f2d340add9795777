//! Sliding windows over the 24-bit counter space.
//!
//! Both windows are 2048 wide and compare with wrap-aware arithmetic, so
//! a peer that wraps its counters past 2^24 keeps working. The low edge
//! only moves past contiguously received values; a retransmission that
//! fills a hole is still inside the window when it lands.

use std::collections::{HashMap, HashSet};

use crate::protocol::frame::Frame;
use crate::util::{wrap_diff, TRIAD_MASK};

/// Width of both the sequence and the reliable window.
pub const WINDOW_SIZE: u32 = 2048;

/// Tracks which datapacket sequences have been received.
///
/// A sequence is accepted once, and only while it falls inside the
/// current window.
#[derive(Debug, Clone)]
pub struct PacketWindow {
    border: (u32, u32),
    seen: HashSet<u32>,
    last_seq: u32,
}

impl PacketWindow {
    pub fn new() -> Self {
        Self {
            border: (0, WINDOW_SIZE),
            seen: HashSet::new(),
            last_seq: TRIAD_MASK,
        }
    }

    pub fn range(&self) -> (u32, u32) {
        self.border
    }

    fn accepts(&self, seq: u32) -> bool {
        wrap_diff(seq, self.border.0) >= 0 && wrap_diff(seq, self.border.1) < 0
    }

    /// Records `seq` as received. Returns `false` when the sequence is
    /// outside the window or was already seen.
    pub fn insert(&mut self, seq: u32) -> bool {
        if !self.accepts(seq) {
            return false;
        }
        self.seen.insert(seq)
    }

    /// Signed distance of `seq` from the newest accepted sequence.
    pub fn last_diff(&self, seq: u32) -> i32 {
        wrap_diff(seq, self.last_seq)
    }

    /// Sequences between the newest accepted one and `seq` (exclusive)
    /// that were never received. These are the NACK candidates.
    pub fn missing_up_to(&self, seq: u32) -> Vec<u32> {
        let mut missing = Vec::new();
        let mut i = self.last_seq.wrapping_add(1) & TRIAD_MASK;
        while i != seq {
            if !self.seen.contains(&i) {
                missing.push(i);
            }
            i = i.wrapping_add(1) & TRIAD_MASK;
        }
        missing
    }

    /// Marks `seq` as the newest sequence and slides the window past
    /// everything contiguously received. The low edge stops at the first
    /// hole, keeping retransmissions for that hole acceptable.
    pub fn advance(&mut self, seq: u32) {
        self.last_seq = seq;
        while self.seen.remove(&self.border.0) {
            self.border.0 = self.border.0.wrapping_add(1) & TRIAD_MASK;
            self.border.1 = self.border.1.wrapping_add(1) & TRIAD_MASK;
        }
    }

    /// Garbage-collects entries that fell behind the window.
    pub fn prune(&mut self) {
        let low = self.border.0;
        self.seen.retain(|seq| wrap_diff(*seq, low) >= 0);
    }

    #[cfg(test)]
    pub(crate) fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Test hook: positions the window as if everything up to and
    /// including `last` had been received.
    #[cfg(test)]
    pub(crate) fn at_position(last: u32) -> Self {
        let low = last.wrapping_add(1) & TRIAD_MASK;
        Self {
            border: (low, low.wrapping_add(WINDOW_SIZE) & TRIAD_MASK),
            seen: HashSet::new(),
            last_seq: last,
        }
    }
}

impl Default for PacketWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Reorders reliable frames by message index.
///
/// Frames arriving in order are released immediately; anything ahead of
/// the next expected index is buffered until the gap closes, then the
/// whole contiguous run drains at once.
#[derive(Debug, Clone)]
pub struct ReliableWindow {
    border: (u32, u32),
    last_index: u32,
    pending: HashMap<u32, Frame>,
}

impl ReliableWindow {
    pub fn new() -> Self {
        Self {
            border: (0, WINDOW_SIZE),
            last_index: TRIAD_MASK,
            pending: HashMap::new(),
        }
    }

    pub fn range(&self) -> (u32, u32) {
        self.border
    }

    fn accepts(&self, index: u32) -> bool {
        wrap_diff(index, self.border.0) >= 0 && wrap_diff(index, self.border.1) < 0
    }

    fn step(&mut self) {
        self.last_index = self.last_index.wrapping_add(1) & TRIAD_MASK;
        self.border.0 = self.border.0.wrapping_add(1) & TRIAD_MASK;
        self.border.1 = self.border.1.wrapping_add(1) & TRIAD_MASK;
    }

    /// Accepts a frame carrying `index` and returns every frame that is
    /// now deliverable in order. Out-of-window indexes (duplicates
    /// included) are dropped and return nothing.
    pub fn insert(&mut self, index: u32, frame: Frame) -> Vec<Frame> {
        let mut ready = Vec::new();
        if !self.accepts(index) {
            return ready;
        }

        if wrap_diff(index, self.last_index) == 1 {
            self.step();
            ready.push(frame);
            loop {
                let next = self.last_index.wrapping_add(1) & TRIAD_MASK;
                match self.pending.remove(&next) {
                    Some(buffered) => {
                        self.step();
                        ready.push(buffered);
                    }
                    None => break,
                }
            }
        } else {
            self.pending.insert(index, frame);
        }
        ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Test hook: positions the window as if everything up to and
    /// including `last` had been delivered.
    #[cfg(test)]
    pub(crate) fn at_position(last: u32) -> Self {
        let low = last.wrapping_add(1) & TRIAD_MASK;
        Self {
            border: (low, low.wrapping_add(WINDOW_SIZE) & TRIAD_MASK),
            last_index: last,
            pending: HashMap::new(),
        }
    }
}

impl Default for ReliableWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reliability::Reliability;

    fn frame(tag: u8) -> Frame {
        Frame::new(Reliability::Reliable, vec![tag])
    }

    #[test]
    fn sequences_accepted_only_inside_window() {
        let mut window = PacketWindow::new();
        assert!(window.insert(0));
        assert!(!window.insert(0), "duplicates are rejected");
        assert!(window.insert(WINDOW_SIZE - 1));
        assert!(!window.insert(WINDOW_SIZE), "outside [low, low + 2048)");
        assert!(!window.insert(TRIAD_MASK), "behind the window");
    }

    #[test]
    fn window_slides_past_contiguous_sequences() {
        let mut window = PacketWindow::new();
        for seq in 0..6 {
            window.insert(seq);
            window.advance(seq);
        }
        let (low, high) = window.range();
        assert_eq!(low, 6);
        assert_eq!(high, 6 + WINDOW_SIZE);
        assert!(window.insert(WINDOW_SIZE + 5));
    }

    #[test]
    fn a_hole_pins_the_low_edge() {
        let mut window = PacketWindow::new();
        for seq in [0, 1, 3] {
            window.insert(seq);
            if window.last_diff(seq) >= 1 {
                window.advance(seq);
            }
        }
        // seq 2 is missing, so the window waits for it at low = 2
        assert_eq!(window.range().0, 2);
        assert!(window.insert(2), "the retransmission is still acceptable");

        // the next in-order packet slides past the filled hole
        window.insert(4);
        window.advance(4);
        assert_eq!(window.range().0, 5);
    }

    #[test]
    fn missing_lists_the_gap() {
        let mut window = PacketWindow::new();
        for seq in [0, 1] {
            window.insert(seq);
            window.advance(seq);
        }
        window.insert(3);
        assert_eq!(window.missing_up_to(3), vec![2]);
        window.advance(3);

        window.insert(7);
        assert_eq!(window.missing_up_to(7), vec![4, 5, 6]);
    }

    #[test]
    fn prune_drops_entries_behind_the_window() {
        let mut window = PacketWindow::new();
        window.insert(5);
        window.advance(5);
        // 5 was never contiguous with 0, so it lingers in the seen set
        assert_eq!(window.seen_len(), 1);

        for seq in 0..5 {
            window.insert(seq);
        }
        window.advance(4);
        assert_eq!(window.range().0, 6);
        window.prune();
        assert_eq!(window.seen_len(), 0);
    }

    #[test]
    fn window_survives_the_counter_wrap() {
        let mut window = PacketWindow::at_position(TRIAD_MASK - 2);
        for seq in [TRIAD_MASK - 1, TRIAD_MASK, 0, 1] {
            assert!(window.insert(seq), "seq {seq:#x} should be acceptable");
            assert_eq!(window.last_diff(seq), 1);
            window.advance(seq);
        }
        assert_eq!(window.range().0, 2);
    }

    #[test]
    fn in_order_frames_release_immediately() {
        let mut window = ReliableWindow::new();
        assert_eq!(window.insert(0, frame(0)).len(), 1);
        assert_eq!(window.insert(1, frame(1)).len(), 1);
        assert_eq!(window.pending_len(), 0);
    }

    #[test]
    fn gaps_buffer_until_closed() {
        let mut window = ReliableWindow::new();
        assert_eq!(window.insert(0, frame(0)).len(), 1);
        assert!(window.insert(2, frame(2)).is_empty());
        assert_eq!(window.pending_len(), 1);

        let ready = window.insert(1, frame(1));
        let tags: Vec<u8> = ready.iter().map(|f| f.body[0]).collect();
        assert_eq!(tags, vec![1, 2]);
        assert_eq!(window.pending_len(), 0);
    }

    #[test]
    fn random_permutation_drains_in_order() {
        let mut window = ReliableWindow::new();
        let order = [3u32, 0, 7, 1, 2, 6, 4, 5];
        let mut delivered = Vec::new();
        for &index in &order {
            for f in window.insert(index, frame(index as u8)) {
                delivered.push(f.body[0] as u32);
            }
        }
        assert_eq!(delivered, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn reliable_window_wraps_with_the_counter() {
        let mut window = ReliableWindow::at_position(TRIAD_MASK - 1);
        assert_eq!(window.insert(TRIAD_MASK, frame(1)).len(), 1);
        assert!(window.insert(1, frame(3)).is_empty(), "0 still missing");
        let ready = window.insert(0, frame(2));
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn stale_indexes_are_dropped() {
        let mut window = ReliableWindow::new();
        window.insert(0, frame(0));
        assert!(window.insert(0, frame(0)).is_empty());
        assert_eq!(window.pending_len(), 0);
    }
}
