//! Sequence number arithmetic on the 16 bit circular sequence space.

use bitvec::prelude::*;
use std::cmp::Ordering;

pub type SeqNum = u16;

/// Two sequence numbers are only ever compared if they are at most this far
/// apart. Anything further away is treated as stale.
pub const SEQ_WINDOW: u16 = 4096;

const SEQ_SPACE: usize = 1 << 16;
const HALF: u16 = 0x8000;

/// Forward distance from `from` to `to`, i.e. how many increments it takes.
#[inline]
pub fn seq_distance(from: SeqNum, to: SeqNum) -> u16 {
    to.wrapping_sub(from)
}

/// Circular comparison using serial number arithmetic.
/// `a` is `Less` than `b` if `b` lies less than half the sequence space ahead.
pub fn seq_cmp(a: SeqNum, b: SeqNum) -> Ordering {
    let d = seq_distance(a, b);
    if d == 0 {
        Ordering::Equal
    } else if d < HALF {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

#[inline]
pub fn seq_after(a: SeqNum, b: SeqNum) -> bool {
    seq_cmp(a, b) == Ordering::Greater
}

#[inline]
pub fn seq_before(a: SeqNum, b: SeqNum) -> bool {
    seq_cmp(a, b) == Ordering::Less
}

/// Whether `a` and `b` are close enough to be compared at all.
pub fn within_window(a: SeqNum, b: SeqNum) -> bool {
    let d = seq_distance(a, b);
    d.min(d.wrapping_neg()) <= SEQ_WINDOW
}

/// Iterates `from..to` on the circle, `to` excluded.
pub fn seq_range(from: SeqNum, to: SeqNum) -> impl Iterator<Item = SeqNum> {
    (0..seq_distance(from, to)).map(move |i| from.wrapping_add(i))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Lower,
    Upper,
}

impl Half {
    pub fn of(seq: SeqNum) -> Half {
        if seq < HALF {
            Half::Lower
        } else {
            Half::Upper
        }
    }

    fn other(self) -> Half {
        match self {
            Half::Lower => Half::Upper,
            Half::Upper => Half::Lower,
        }
    }

    fn range(self) -> std::ops::Range<usize> {
        match self {
            Half::Lower => 0..HALF as usize,
            Half::Upper => HALF as usize..SEQ_SPACE,
        }
    }

    fn index(self) -> usize {
        match self {
            Half::Lower => 0,
            Half::Upper => 1,
        }
    }
}

/// Tracks which half of the sequence space may be recycled.
///
/// Once the newest sequence seen is more than [`SEQ_WINDOW`] into one half,
/// nothing in the other half can still be inside the window, so the other
/// half is marked reusable. The next time a sequence of a reusable half shows
/// up, the owner has to wipe that half before using it.
#[derive(Debug, Clone, Default)]
pub struct HalfReuse {
    reusable: [bool; 2],
}

impl HalfReuse {
    /// Registers `seq` as the newest observed sequence and returns the half
    /// that has to be cleared before `seq` is recorded, if any.
    pub fn observe(&mut self, seq: SeqNum) -> Option<Half> {
        let half = Half::of(seq);
        let clear = if self.reusable[half.index()] {
            self.reusable[half.index()] = false;
            Some(half)
        } else {
            None
        };

        if seq & (HALF - 1) >= SEQ_WINDOW {
            self.reusable[half.other().index()] = true;
        }

        clear
    }
}

/// One flag per sequence number.
#[derive(Debug, Clone)]
pub struct SeqFlags(BitVec);

impl Default for SeqFlags {
    fn default() -> Self {
        Self(bitvec![0; SEQ_SPACE])
    }
}

impl SeqFlags {
    pub fn get(&self, seq: SeqNum) -> bool {
        self.0[seq as usize]
    }

    pub fn set(&mut self, seq: SeqNum, value: bool) {
        self.0.set(seq as usize, value);
    }

    pub fn clear_half(&mut self, half: Half) {
        self.0[half.range()].fill(false);
    }

    /// Number of set flags in `from..to`.
    pub fn count_in(&self, from: SeqNum, to: SeqNum) -> usize {
        seq_range(from, to).filter(|&s| self.get(s)).count()
    }
}

/// Whether `seq` lies in the given half.
pub fn in_half(seq: SeqNum, half: Half) -> bool {
    Half::of(seq) == half
}
