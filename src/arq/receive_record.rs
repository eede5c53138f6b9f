use std::collections::HashMap;
use std::time::Duration;

use crate::frame::{AckInfo, BlockAckBitmap, BLOCK_ACK_SIZE};
use crate::seq::{
    seq_after, seq_before, seq_distance, seq_range, within_window, Half, HalfReuse, SeqFlags, SeqNum,
    SEQ_WINDOW,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    New,
    /// Older than the highest sequence seen, but not received before.
    Reordered,
    Duplicate,
}

/// Receiver side state for one source.
#[derive(Debug, Default)]
pub struct ReceiveRecord {
    first_seen: Option<SeqNum>,
    highest: Option<SeqNum>,
    expected_next: SeqNum,
    received: SeqFlags,
    received_at: HashMap<SeqNum, Duration>,
    last_anchor: Option<SeqNum>,
    reuse: HalfReuse,
}

impl ReceiveRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highest(&self) -> Option<SeqNum> {
        self.highest
    }

    pub fn expected_next(&self) -> SeqNum {
        self.expected_next
    }

    pub fn is_received(&self, seq: SeqNum) -> bool {
        self.received.get(seq)
    }

    pub fn received_at(&self, seq: SeqNum) -> Option<Duration> {
        self.received_at.get(&seq).copied()
    }

    /// Sequence of the most recently stored header.
    pub fn last_anchor(&self) -> Option<SeqNum> {
        self.last_anchor
    }

    fn clear_half(&mut self, half: Half) {
        self.received.clear_half(half);
        self.received_at.retain(|&s, _| Half::of(s) != half);
    }

    pub fn register(&mut self, seq: SeqNum, now: Duration) -> RxVerdict {
        let verdict = match self.highest {
            None => RxVerdict::New,
            Some(h) if !within_window(seq, h) => RxVerdict::Duplicate,
            Some(h) if seq_after(seq, h) => RxVerdict::New,
            Some(_) if self.received.get(seq) => RxVerdict::Duplicate,
            Some(_) => RxVerdict::Reordered,
        };
        if verdict == RxVerdict::Duplicate {
            return verdict;
        }

        if verdict == RxVerdict::New {
            if let Some(half) = self.reuse.observe(seq) {
                self.clear_half(half);
            }
            self.highest = Some(seq);
            if seq_distance(self.expected_next, seq) > SEQ_WINDOW {
                self.expected_next = seq.wrapping_sub(SEQ_WINDOW);
            }
        }
        if self.first_seen.is_none() {
            self.first_seen = Some(seq);
            self.expected_next = seq;
        }

        self.received.set(seq, true);
        self.received_at.insert(seq, now);
        self.last_anchor = Some(seq);

        while self.received.get(self.expected_next)
            && self.highest.map_or(false, |h| !seq_after(self.expected_next, h))
        {
            self.expected_next = self.expected_next.wrapping_add(1);
        }
        verdict
    }

    /// Length of the contiguous received run ending at `anchor`, never
    /// reaching back before the first frame of this source.
    pub fn continuous_count(&self, anchor: SeqNum) -> u16 {
        let Some(first) = self.first_seen else {
            return 0;
        };
        let mut count = 0;
        let mut seq = anchor;
        while count < SEQ_WINDOW
            && self.received.get(seq)
            && !(within_window(seq, first) && seq_before(seq, first))
        {
            count += 1;
            seq = seq.wrapping_sub(1);
        }
        count
    }

    pub fn block_bitmap(&self, anchor: SeqNum) -> BlockAckBitmap {
        let mut block = BlockAckBitmap::default();
        for i in 0..BLOCK_ACK_SIZE {
            block.set(i, self.received.get(BlockAckBitmap::covered(anchor, i)));
        }
        block
    }

    /// Sequences between the expected cursor and the highest one seen that
    /// never arrived.
    pub fn missing(&self) -> u16 {
        let Some(h) = self.highest else {
            return 0;
        };
        seq_range(self.expected_next, h.wrapping_add(1))
            .filter(|&s| !self.received.get(s))
            .count() as u16
    }

    /// How many of the `window` sequences ending at `anchor` arrived.
    pub fn held(&self, anchor: SeqNum, window: u16) -> u16 {
        let from = anchor.wrapping_sub(window.saturating_sub(1));
        self.received.count_in(from, anchor.wrapping_add(1)) as u16
    }

    pub fn ack_info(&self, anchor: SeqNum, continuous: bool, block: bool) -> AckInfo {
        AckInfo {
            nack: false,
            continuous_count: if continuous {
                self.continuous_count(anchor)
            } else {
                0
            },
            block: if block {
                self.block_bitmap(anchor)
            } else {
                BlockAckBitmap::default()
            },
            nacked_count: self.missing(),
        }
    }

    pub fn nack_info(&self) -> AckInfo {
        AckInfo {
            nacked_count: self.missing(),
            ..AckInfo::nack()
        }
    }
}
