//! Node owned timer queue. Every timer is identified by a key, re-arming a
//! key replaces its previous deadline.

use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use coopmac_config::NodeID;

use crate::seq::SeqNum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArqTimer {
    /// Long ACK wait of one outstanding frame.
    AckAwait { dst: NodeID, seq: SeqNum },
    NackRetry { src: NodeID },
    /// Aggregation period after which a block ACK is sent to `src`.
    BlockAck { src: NodeID },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacTimer {
    /// Inter frame space after the medium went idle.
    Ifs,
    Backoff,
    /// Start of the own TDMA slot.
    Slot,
    /// Basic ACK wait after a unicast data transmission.
    AckWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Arq(ArqTimer),
    Mac(MacTimer),
}

impl TimerKey {
    pub fn is_mac(&self) -> bool {
        matches!(self, TimerKey::Mac(_))
    }
}

struct Entry<K> {
    deadline: Duration,
    id: u64,
    key: K,
}

// Reversed so the max-heap pops the earliest deadline first. Equal deadlines
// fire in the order they were armed.
impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<K> Eq for Entry<K> {}

pub struct TimerQueue<K> {
    heap: BinaryHeap<Entry<K>>,
    // key -> (entry id, deadline) of the live timer, stale heap entries are
    // skipped when popped
    armed: HashMap<K, (u64, Duration)>,
    next_id: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<K: Copy + Eq + Hash> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire at `deadline`, cancelling a timer already armed
    /// under the same key.
    pub fn arm(&mut self, key: K, deadline: Duration) {
        let id = self.next_id;
        self.next_id += 1;
        self.armed.insert(key, (id, deadline));
        self.heap.push(Entry { deadline, id, key });
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.armed.remove(key).is_some()
    }

    /// Cancels every armed timer matching `pred`.
    pub fn cancel_where<F: Fn(&K) -> bool>(&mut self, pred: F) -> usize {
        let before = self.armed.len();
        self.armed.retain(|k, _| !pred(k));
        before - self.armed.len()
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Duration> {
        self.armed.get(key).map(|(_, d)| *d)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    fn is_live(&self, entry: &Entry<K>) -> bool {
        matches!(self.armed.get(&entry.key), Some((id, _)) if *id == entry.id)
    }

    fn drop_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.drop_stale();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Removes and returns the earliest timer due at `now`, if any.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, K)> {
        self.drop_stale();
        if self.heap.peek()?.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.armed.remove(&entry.key);
        Some((entry.deadline, entry.key))
    }
}
