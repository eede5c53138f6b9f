use std::collections::HashMap;

use crate::seq::{seq_before, seq_distance, within_window, HalfReuse, SeqFlags, SeqNum};

/// Bookkeeping of one transmitted but not yet acknowledged frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outstanding {
    pub retries: u8,
    pub generation: u8,
    /// Set once the frame has to go out again.
    pub retry: bool,
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Retry,
    Exhausted,
}

/// Sender side state towards one destination.
#[derive(Debug)]
pub struct SendRecord {
    next_seq: SeqNum,
    outstanding: HashMap<SeqNum, Outstanding>,
    acked: SeqFlags,
    reuse: HalfReuse,
    in_flight: u16,
    // received according to a later ACK's window field, individual ACK still missing
    credited: u16,
    cursor: SeqNum,
}

impl Default for SendRecord {
    fn default() -> Self {
        Self {
            next_seq: 0,
            outstanding: HashMap::new(),
            acked: SeqFlags::default(),
            reuse: HalfReuse::default(),
            in_flight: 0,
            credited: 0,
            cursor: 0,
        }
    }
}

impl SendRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> SeqNum {
        self.next_seq
    }

    pub fn in_flight(&self) -> u16 {
        self.in_flight
    }

    pub fn credited(&self) -> u16 {
        self.credited
    }

    pub fn cursor(&self) -> SeqNum {
        self.cursor
    }

    pub fn outstanding(&self, seq: SeqNum) -> Option<&Outstanding> {
        self.outstanding.get(&seq)
    }

    pub fn is_acked(&self, seq: SeqNum) -> bool {
        self.acked.get(seq)
    }

    /// Whether `seq` was handed out by this record at some point.
    pub fn was_allocated(&self, seq: SeqNum) -> bool {
        seq_before(seq, self.next_seq) && within_window(seq, self.next_seq)
    }

    pub fn allocate(&mut self) -> SeqNum {
        let seq = self.next_seq;
        if let Some(half) = self.reuse.observe(seq) {
            self.acked.clear_half(half);
        }
        self.acked.set(seq, false);
        self.next_seq = seq.wrapping_add(1);
        seq
    }

    pub fn is_tx_allowed(&self, window: u16, continuous: bool) -> bool {
        if self.in_flight >= window {
            return false;
        }
        !continuous || seq_distance(self.cursor, self.next_seq) < window
    }

    /// Registers a transmission of `seq`. The first transmission takes a slot
    /// of the window, every retry bumps the generation instead.
    pub fn on_transmit(&mut self, seq: SeqNum) -> Outstanding {
        match self.outstanding.get_mut(&seq) {
            Some(entry) => {
                if entry.retry {
                    entry.generation = entry.generation.wrapping_add(1);
                }
                *entry
            }
            None => {
                let entry = Outstanding::default();
                self.outstanding.insert(seq, entry);
                self.in_flight += 1;
                entry
            }
        }
    }

    /// Counts a failed attempt. `None` if `seq` is not outstanding anymore.
    pub fn fail_attempt(&mut self, seq: SeqNum, max_retries: u8) -> Option<RetryVerdict> {
        let entry = self.outstanding.get_mut(&seq)?;
        entry.retries = entry.retries.saturating_add(1);
        if entry.retries > max_retries {
            self.release(seq);
            return Some(RetryVerdict::Exhausted);
        }
        entry.retry = true;
        Some(RetryVerdict::Retry)
    }

    fn release(&mut self, seq: SeqNum) -> bool {
        if self.outstanding.remove(&seq).is_none() {
            return false;
        }
        if self.credited > 0 {
            self.credited -= 1;
        } else {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
        true
    }

    /// Returns whether `seq` was newly acknowledged.
    pub fn acknowledge(&mut self, seq: SeqNum) -> bool {
        if !self.release(seq) {
            return false;
        }
        self.acked.set(seq, true);
        true
    }

    /// Moves the cursor to `to` if that is ahead, then past everything that is
    /// no longer outstanding.
    pub fn advance_cursor(&mut self, to: Option<SeqNum>) {
        if let Some(to) = to {
            if seq_before(self.cursor, to) && !seq_before(self.next_seq, to) {
                self.cursor = to;
            }
        }
        while self.cursor != self.next_seq && !self.outstanding.contains_key(&self.cursor) {
            self.cursor = self.cursor.wrapping_add(1);
        }
    }

    /// `held` of the `window` sequences ending at `anchor` made it to the
    /// receiver. Those not individually acknowledged yet stop counting
    /// against the window.
    pub fn credit(&mut self, anchor: SeqNum, window: u16, held: u16) {
        let from = anchor.wrapping_sub(window.saturating_sub(1));
        let to = anchor.wrapping_add(1);
        let acked = self.acked.count_in(from, to) as u16;
        let pending = crate::seq::seq_range(from, to)
            .filter(|s| self.outstanding.contains_key(s))
            .count() as u16;

        let unaccounted = held.saturating_sub(acked).min(pending);
        if unaccounted > self.credited {
            let k = (unaccounted - self.credited).min(self.in_flight);
            self.in_flight -= k;
            self.credited += k;
        }
    }
}
