use bitvec::prelude::*;
use coopmac_config::NodeID;
use serde::{Deserialize, Serialize};

use crate::seq::{seq_range, SeqNum};

pub const BLOCK_ACK_SIZE: u16 = 16;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    Data,
    Ack,
    BlockAckRequest,
}

/// End-to-end part of the header, never rewritten by relays.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MacHeader {
    pub frame_type: FrameType,
    pub source: NodeID,
    pub destination: NodeID,
    pub seq: SeqNum,
}

/// Frame Identity: (source, destination, sequence).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey {
    pub source: NodeID,
    pub destination: NodeID,
    pub seq: SeqNum,
}

impl MacHeader {
    pub fn key(&self) -> FrameKey {
        FrameKey {
            source: self.source,
            destination: self.destination,
            seq: self.seq,
        }
    }
}

impl std::fmt::Display for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}#{}", self.source, self.destination, self.seq)
    }
}

/// Hop-by-hop part of the header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PhyHeader {
    /// The node that put this copy on the air, distinct from the source.
    pub sender: NodeID,
    pub retry: bool,
    /// Data frames: free slots in the sender's window.
    /// ACK frames: how many of the `window` sequences ending at the anchor
    /// the receiver holds.
    pub send_window: u16,
    pub block_ack_enabled: bool,
    pub continuous_ack_enabled: bool,
    /// Interleaver generation, bumped on every independent attempt.
    pub generation: u8,
    pub ack: Option<AckInfo>,
}

/// Bit `i` covers sequence `anchor - 1 - i`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockAckBitmap(u16);

impl BlockAckBitmap {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn get(&self, i: u16) -> bool {
        self.0.view_bits::<Lsb0>()[i as usize]
    }

    pub fn set(&mut self, i: u16, value: bool) {
        self.0.view_bits_mut::<Lsb0>().set(i as usize, value);
    }

    pub fn covered(anchor: SeqNum, i: u16) -> SeqNum {
        anchor.wrapping_sub(1 + i)
    }

    pub fn acked(&self, anchor: SeqNum) -> impl Iterator<Item = SeqNum> + '_ {
        self.0
            .view_bits::<Lsb0>()
            .iter_ones()
            .map(move |i| Self::covered(anchor, i as u16))
    }

    pub fn count_ones(&self) -> u32 {
        self.0.count_ones()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AckInfo {
    pub nack: bool,
    /// Length of the contiguous received run ending at the anchor.
    pub continuous_count: u16,
    pub block: BlockAckBitmap,
    /// How many sequences the receiver currently misses.
    pub nacked_count: u16,
}

/// What a single ACK header says about which sequences arrived, split by
/// mechanism so callers can apply them in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AckResolution {
    pub basic: Option<(SeqNum, bool)>,
    pub continuous: Vec<SeqNum>,
    pub cursor: Option<SeqNum>,
    pub block: Vec<SeqNum>,
}

impl AckResolution {
    pub fn acked(&self) -> impl Iterator<Item = SeqNum> + '_ {
        let basic = match self.basic {
            Some((seq, false)) => Some(seq),
            _ => None,
        };
        basic
            .into_iter()
            .chain(self.continuous.iter().copied())
            .chain(self.block.iter().copied())
    }
}

impl AckInfo {
    pub fn ack() -> Self {
        Self::default()
    }

    pub fn nack() -> Self {
        Self {
            nack: true,
            ..Default::default()
        }
    }

    pub fn resolve(&self, anchor: SeqNum, continuous: bool, block: bool) -> AckResolution {
        let mut res = AckResolution {
            basic: Some((anchor, self.nack)),
            ..Default::default()
        };

        if continuous && self.continuous_count > 0 {
            let c = self.continuous_count;
            res.continuous = seq_range(anchor.wrapping_sub(c - 1), anchor).collect();
            res.cursor = Some(anchor.wrapping_sub(c));
        }

        if block {
            res.block = self.block.acked(anchor).collect();
        }

        res
    }
}
