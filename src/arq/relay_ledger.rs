use std::collections::HashMap;

use crate::frame::Frame;
use crate::seq::{seq_after, within_window, Half, HalfReuse, SeqFlags, SeqNum};

/// What a relay does with an overheard data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    Forward,
    /// A better copy of a frame still waiting to be forwarded.
    ReplaceStoredCopy,
    /// The frame was acknowledged already, the source retries needlessly.
    ResendCachedAck,
    Drop,
}

/// Generation `a` is newer than `b` on the 8 bit circle.
pub fn generation_newer(a: u8, b: u8) -> bool {
    (a.wrapping_sub(b) as i8) > 0
}

/// Relay local bookkeeping of the traffic of one (source, destination) pair.
#[derive(Debug)]
pub struct RelayLedgerEntry {
    received: SeqFlags,
    transmitted: SeqFlags,
    acked: SeqFlags,
    retry: SeqFlags,
    ack_forwarded: SeqFlags,
    generation: Vec<u8>,
    best_error: HashMap<SeqNum, f64>,
    cached_ack: Option<Frame>,
    highest: Option<SeqNum>,
    reuse: HalfReuse,
}

impl Default for RelayLedgerEntry {
    fn default() -> Self {
        Self {
            received: SeqFlags::default(),
            transmitted: SeqFlags::default(),
            acked: SeqFlags::default(),
            retry: SeqFlags::default(),
            ack_forwarded: SeqFlags::default(),
            generation: vec![0; 1 << 16],
            best_error: HashMap::new(),
            cached_ack: None,
            highest: None,
            reuse: HalfReuse::default(),
        }
    }
}

impl RelayLedgerEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_received(&self, seq: SeqNum) -> bool {
        self.received.get(seq)
    }

    pub fn is_transmitted(&self, seq: SeqNum) -> bool {
        self.transmitted.get(seq)
    }

    pub fn is_acked(&self, seq: SeqNum) -> bool {
        self.acked.get(seq)
    }

    pub fn generation(&self, seq: SeqNum) -> u8 {
        self.generation[seq as usize]
    }

    pub fn best_error(&self, seq: SeqNum) -> Option<f64> {
        self.best_error.get(&seq).copied()
    }

    pub fn cached_ack(&self) -> Option<&Frame> {
        self.cached_ack.as_ref()
    }

    fn clear_half(&mut self, half: Half) {
        self.received.clear_half(half);
        self.transmitted.clear_half(half);
        self.acked.clear_half(half);
        self.retry.clear_half(half);
        self.ack_forwarded.clear_half(half);
        self.best_error.retain(|&s, _| Half::of(s) != half);
    }

    fn observe(&mut self, seq: SeqNum) {
        let newest = match self.highest {
            None => true,
            Some(h) => seq_after(seq, h) || !within_window(seq, h),
        };
        if newest {
            if let Some(half) = self.reuse.observe(seq) {
                self.clear_half(half);
            }
            self.highest = Some(seq);
        }
    }

    fn record(&mut self, seq: SeqNum, generation: u8, retry: bool, ber: f64) {
        self.received.set(seq, true);
        self.transmitted.set(seq, false);
        self.retry.set(seq, retry);
        self.generation[seq as usize] = generation;
        self.best_error.insert(seq, ber);
    }

    /// Classifies an overheard copy of `seq` with bit error rate `ber`.
    pub fn on_data(&mut self, seq: SeqNum, generation: u8, retry: bool, ber: f64) -> RelayDecision {
        self.observe(seq);
        let seen = self.received.get(seq);
        let stored = self.generation[seq as usize];

        if self.acked.get(seq) {
            if retry && generation_newer(generation, stored) {
                self.generation[seq as usize] = generation;
                return RelayDecision::ResendCachedAck;
            }
            return RelayDecision::Drop;
        }

        if seen && generation == stored {
            return RelayDecision::Drop;
        }

        if seen && !self.transmitted.get(seq) {
            let better = self.best_error.get(&seq).map_or(true, |&best| ber < best);
            if better {
                self.record(seq, generation, retry, ber);
                return RelayDecision::ReplaceStoredCopy;
            }
            if generation_newer(generation, stored) {
                self.generation[seq as usize] = generation;
            }
            return RelayDecision::Drop;
        }

        self.record(seq, generation, retry, ber);
        RelayDecision::Forward
    }

    /// Returns `false` if `seq` was never received, which leaves the entry
    /// untouched.
    pub fn mark_transmitted(&mut self, seq: SeqNum) -> bool {
        if !self.received.get(seq) {
            return false;
        }
        self.transmitted.set(seq, true);
        self.best_error.remove(&seq);
        true
    }

    pub fn mark_acked(&mut self, seq: SeqNum) {
        self.acked.set(seq, true);
        self.best_error.remove(&seq);
    }

    pub fn cache_ack(&mut self, frame: Frame) {
        self.cached_ack = Some(frame);
    }

    /// Whether this relay should pass on the acknowledgement of `seq`.
    /// A positive acknowledgement is passed on at most once.
    pub fn should_forward_ack(&mut self, seq: SeqNum, nack: bool) -> bool {
        if !self.received.get(seq) {
            return false;
        }
        let lock_step = self.received.get(seq) == self.transmitted.get(seq);
        if !(self.retry.get(seq) || lock_step) {
            return false;
        }
        if nack {
            return true;
        }
        if self.ack_forwarded.get(seq) {
            return false;
        }
        self.ack_forwarded.set(seq, true);
        true
    }

    /// Decision for a queued copy of generation `generation` right before it
    /// goes on the air.
    pub fn recheck(&self, seq: SeqNum, generation: u8) -> RelayDecision {
        if self.acked.get(seq) {
            if generation_newer(self.generation[seq as usize], generation) {
                return RelayDecision::ResendCachedAck;
            }
            return RelayDecision::Drop;
        }
        if self.transmitted.get(seq) && self.generation[seq as usize] == generation {
            return RelayDecision::Drop;
        }
        RelayDecision::Forward
    }
}
