use std::time::Duration;

use super::error_floor::MAX_FLOOR_COPIES;
use super::{combine_observations, CopyObservation};
use crate::frame::{FrameKey, Payload};

/// Every corrupted copy of one frame received so far.
#[derive(Debug, Clone)]
pub struct PendingFrameAccumulator {
    key: FrameKey,
    copies: Vec<CopyObservation>,
    payload: Payload,
    first_seen: Duration,
    packet_length_bits: usize,
}

impl PendingFrameAccumulator {
    pub fn new(key: FrameKey, payload: Payload, first_seen: Duration) -> Self {
        let packet_length_bits = payload.size_bits().max(1);
        Self {
            key,
            copies: Vec::new(),
            payload,
            first_seen,
            packet_length_bits,
        }
    }

    pub fn key(&self) -> FrameKey {
        self.key
    }

    pub fn copies(&self) -> &[CopyObservation] {
        &self.copies
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn first_seen(&self) -> Duration {
        self.first_seen
    }

    pub fn packet_length_bits(&self) -> usize {
        self.packet_length_bits
    }

    /// Once full, a new copy only gets in by pushing out a worse one.
    pub fn push(&mut self, copy: CopyObservation) {
        if self.copies.len() < MAX_FLOOR_COPIES {
            self.copies.push(copy);
            return;
        }
        let worst = self
            .copies
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.link_error_rate.total_cmp(&b.link_error_rate))
            .map(|(i, c)| (i, c.link_error_rate));
        if let Some((i, rate)) = worst {
            if copy.link_error_rate < rate {
                self.copies[i] = copy;
            }
        }
    }

    pub fn combined_error_probability(&self) -> f64 {
        combine_observations(&self.copies, self.packet_length_bits)
    }
}

// NOTE: Holds at most max_size accumulators, the oldest one is replaced
// when a new frame shows up at capacity.
#[derive(Debug)]
pub struct AccumulatorPool {
    entries: Vec<PendingFrameAccumulator>,
    max_size: usize,
}

impl AccumulatorPool {
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "accumulator pool needs room for one frame");
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    fn position(&self, key: &FrameKey) -> Option<usize> {
        self.entries.iter().position(|e| e.key == *key)
    }

    /// Adds `copy` to the accumulator of `key`, creating it if needed.
    /// Returns whether earlier copies of the frame were already pending.
    pub fn store_or_combine(
        &mut self,
        key: FrameKey,
        copy: CopyObservation,
        payload: &Payload,
        now: Duration,
    ) -> bool {
        if let Some(pos) = self.position(&key) {
            self.entries[pos].push(copy);
            return true;
        }

        if self.entries.len() >= self.max_size {
            let evicted = self.entries.remove(0);
            log::debug!("Dropping pending copies of {}", evicted.key);
        }
        let mut acc = PendingFrameAccumulator::new(key, payload.clone(), now);
        acc.push(copy);
        self.entries.push(acc);
        false
    }

    pub fn get(&self, key: &FrameKey) -> Option<&PendingFrameAccumulator> {
        self.position(key).map(|pos| &self.entries[pos])
    }

    pub fn remove(&mut self, key: &FrameKey) -> Option<PendingFrameAccumulator> {
        let pos = self.position(key)?;
        Some(self.entries.remove(pos))
    }

    /// Drops every accumulator first seen more than `lifetime` before `now`.
    pub fn expire(&mut self, now: Duration, lifetime: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| now.saturating_sub(e.first_seen) <= lifetime);
        before - self.entries.len()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
