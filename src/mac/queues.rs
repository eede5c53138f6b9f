use std::collections::VecDeque;

use coopmac_config::NodeID;

use crate::frame::{Frame, Payload};
use crate::seq::SeqNum;

#[derive(Debug, Clone, PartialEq)]
pub enum OwnEntry {
    New { payload: Payload, dst: NodeID },
    Retry { dst: NodeID, seq: SeqNum },
}

impl OwnEntry {
    pub fn dst(&self) -> NodeID {
        match self {
            OwnEntry::New { dst, .. } | OwnEntry::Retry { dst, .. } => *dst,
        }
    }
}

/// Transmit queues in priority order: acknowledgements and control frames,
/// relayed data, own data.
#[derive(Debug)]
pub struct TxQueues {
    control: VecDeque<Frame>,
    relay: VecDeque<Frame>,
    own: VecDeque<OwnEntry>,
    capacity: usize,
}

impl TxQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            control: VecDeque::new(),
            relay: VecDeque::new(),
            own: VecDeque::new(),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.relay.is_empty() && self.own.is_empty()
    }

    pub fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    pub fn own_len(&self) -> usize {
        self.own.len()
    }

    pub fn relay_len(&self) -> usize {
        self.relay.len()
    }

    pub fn push_control(&mut self, frame: Frame) {
        self.control.push_back(frame);
    }

    pub fn pop_control(&mut self) -> Option<Frame> {
        self.control.pop_front()
    }

    /// Puts back a frame the PHY refused.
    pub fn requeue_control(&mut self, frame: Frame) {
        self.control.push_front(frame);
    }

    /// Returns `false` if the queue is full.
    pub fn push_relay(&mut self, frame: Frame) -> bool {
        if self.relay.len() >= self.capacity {
            return false;
        }
        self.relay.push_back(frame);
        true
    }

    pub fn pop_relay(&mut self) -> Option<Frame> {
        self.relay.pop_front()
    }

    pub fn requeue_relay(&mut self, frame: Frame) {
        self.relay.push_front(frame);
    }

    /// Swaps the queued relay copy of `frame` for `frame`. Returns `false` if
    /// no copy is queued.
    pub fn replace_relay(&mut self, frame: Frame) -> bool {
        let key = frame.key();
        match self.relay.iter_mut().find(|f| f.key() == key) {
            Some(queued) => {
                *queued = frame;
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the queue is full.
    pub fn push_own(&mut self, payload: Payload, dst: NodeID) -> bool {
        if self.own.len() >= self.capacity {
            return false;
        }
        self.own.push_back(OwnEntry::New { payload, dst });
        true
    }

    /// Retransmissions jump the queue and are never refused.
    pub fn push_retry(&mut self, dst: NodeID, seq: SeqNum) {
        let entry = OwnEntry::Retry { dst, seq };
        if !self.own.contains(&entry) {
            self.own.push_front(entry);
        }
    }

    /// Removes the first own entry `eligible` accepts.
    pub fn pop_own_where<F: FnMut(&OwnEntry) -> bool>(
        &mut self,
        mut eligible: F,
    ) -> Option<OwnEntry> {
        let pos = self.own.iter().position(|e| eligible(e))?;
        self.own.remove(pos)
    }

    pub fn has_own_where<F: FnMut(&OwnEntry) -> bool>(&self, mut eligible: F) -> bool {
        self.own.iter().any(|e| eligible(e))
    }
}
