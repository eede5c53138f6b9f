use std::collections::HashMap;

use coopmac_config::NodeID;

use crate::seq::{seq_after, SeqNum};

/// Per source watermark of the highest in-order sequence handed to the upper
/// layer. Only frames the receive record classifies as new pass through it,
/// a reordered frame below the watermark is delivered without consulting it.
#[derive(Debug, Default)]
pub struct DeliveryFilter {
    watermark: HashMap<NodeID, SeqNum>,
}

impl DeliveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `seq` from `src` should be delivered, raising the
    /// watermark if so.
    pub fn accept(&mut self, src: NodeID, seq: SeqNum) -> bool {
        match self.watermark.get(&src) {
            Some(&last) if !seq_after(seq, last) => false,
            _ => {
                self.watermark.insert(src, seq);
                true
            }
        }
    }
}
