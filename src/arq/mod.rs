//! ARQ Manager: sequence allocation and the sender window, duplicate
//! filtering and acknowledgements on the receiver side, and the forwarding
//! ledger of relays.

pub mod receive_record;
pub mod relay_ledger;
pub mod send_record;

use std::collections::HashMap;
use std::time::Duration;

use coopmac_config::{ArqConfig, NodeID};

pub use receive_record::{ReceiveRecord, RxVerdict};
pub use relay_ledger::{generation_newer, RelayDecision, RelayLedgerEntry};
pub use send_record::{Outstanding, RetryVerdict, SendRecord};

use crate::frame::{AckInfo, Frame, FrameBuilder, FrameKey, FrameType, MacHeader};
use crate::seq::SeqNum;
use crate::timer::{ArqTimer, TimerKey, TimerQueue};

/// Work the ARQ Manager hands back to the channel access layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ArqAction {
    Retransmit { dst: NodeID, seq: SeqNum },
    FinalFailure { dst: NodeID, seq: SeqNum },
    SendAck(Frame),
}

#[derive(Debug, Default, PartialEq)]
pub struct AckOutcome {
    /// Sequences acknowledged for the first time by this ACK.
    pub acked: Vec<SeqNum>,
    pub actions: Vec<ArqAction>,
}

pub struct ArqManager {
    id: NodeID,
    config: ArqConfig,
    send: HashMap<NodeID, SendRecord>,
    receive: HashMap<NodeID, ReceiveRecord>,
    relay: HashMap<(NodeID, NodeID), RelayLedgerEntry>,
}

impl ArqManager {
    pub fn new(id: NodeID, config: ArqConfig) -> Self {
        Self {
            id,
            config,
            send: HashMap::new(),
            receive: HashMap::new(),
            relay: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    pub fn send_record(&self, dst: NodeID) -> Option<&SendRecord> {
        self.send.get(&dst)
    }

    pub fn receive_record(&self, src: NodeID) -> Option<&ReceiveRecord> {
        self.receive.get(&src)
    }

    pub fn relay_entry(&self, src: NodeID, dst: NodeID) -> Option<&RelayLedgerEntry> {
        self.relay.get(&(src, dst))
    }

    // sender

    pub fn open_send_record(&mut self, dst: NodeID) {
        self.send.entry(dst).or_default();
    }

    pub fn allocate_sequence(&mut self, dst: NodeID) -> SeqNum {
        self.send.entry(dst).or_default().allocate()
    }

    pub fn is_tx_allowed(&self, dst: NodeID) -> bool {
        self.send.get(&dst).map_or(true, |r| {
            r.is_tx_allowed(self.config.send_window, self.config.ack_policy.continuous_ack())
        })
    }

    /// Free slots of the send window towards `dst`.
    pub fn window_remaining(&self, dst: NodeID) -> u16 {
        let in_flight = self.send.get(&dst).map_or(0, |r| r.in_flight());
        self.config.send_window.saturating_sub(in_flight)
    }

    /// Registers a transmission of `seq` towards `dst` and arms its ACK wait.
    /// The returned entry says whether this is a retry and which generation
    /// goes on the air.
    pub fn send(
        &mut self,
        dst: NodeID,
        seq: SeqNum,
        now: Duration,
        timers: &mut TimerQueue<TimerKey>,
    ) -> Outstanding {
        let entry = self.send.entry(dst).or_default().on_transmit(seq);
        timers.arm(
            TimerKey::Arq(ArqTimer::AckAwait { dst, seq }),
            now + self.config.long_timeout,
        );
        log::trace!(
            "[Node {}]: Sending {}#{} (generation {}, retry {})",
            self.id,
            dst,
            seq,
            entry.generation,
            entry.retry
        );
        entry
    }

    /// A transmission of `seq` failed, either because its ACK timer ran out
    /// or because the receiver answered with a NACK.
    pub fn on_timeout(
        &mut self,
        dst: NodeID,
        seq: SeqNum,
        timers: &mut TimerQueue<TimerKey>,
    ) -> Option<ArqAction> {
        timers.cancel(&TimerKey::Arq(ArqTimer::AckAwait { dst, seq }));
        let record = self.send.get_mut(&dst)?;
        match record.fail_attempt(seq, self.config.max_retries) {
            None => {
                log::debug!("[Node {}]: Stale ACK timer for {}#{}", self.id, dst, seq);
                None
            }
            Some(RetryVerdict::Retry) => Some(ArqAction::Retransmit { dst, seq }),
            Some(RetryVerdict::Exhausted) => {
                record.advance_cursor(None);
                log::warn!(
                    "[Node {}]: Giving up on {}#{} after {} retries",
                    self.id,
                    dst,
                    seq,
                    self.config.max_retries
                );
                Some(ArqAction::FinalFailure { dst, seq })
            }
        }
    }

    pub fn on_ack(&mut self, frame: &Frame, timers: &mut TimerQueue<TimerKey>) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let Ok(info) = frame.ack_info() else {
            log::debug!("[Node {}]: Dropping ACK without ACK info", self.id);
            return outcome;
        };
        let dst = frame.source();
        let anchor = frame.seq();
        let phy = frame.phy();
        let res = info.resolve(anchor, phy.continuous_ack_enabled, phy.block_ack_enabled);

        if !self.send.contains_key(&dst) {
            log::debug!(
                "[Node {}]: ACK from {} which was never sent anything",
                self.id,
                dst
            );
            return outcome;
        }

        if let Some((seq, true)) = res.basic {
            if let Some(action) = self.on_timeout(dst, seq, timers) {
                outcome.actions.push(action);
            }
        }

        let Some(record) = self.send.get_mut(&dst) else {
            return outcome;
        };
        for seq in res.acked() {
            if record.acknowledge(seq) {
                timers.cancel(&TimerKey::Arq(ArqTimer::AckAwait { dst, seq }));
                outcome.acked.push(seq);
            } else if !record.was_allocated(seq) && seq == anchor {
                log::debug!(
                    "[Node {}]: ACK for {}#{} which was never sent",
                    self.id,
                    dst,
                    seq
                );
            }
        }
        record.advance_cursor(res.cursor);
        record.credit(anchor, self.config.send_window, phy.send_window);

        outcome
    }

    // receiver

    fn ack_frame(
        &self,
        to: NodeID,
        anchor: SeqNum,
        info: AckInfo,
        held: u16,
        block: bool,
    ) -> Frame {
        FrameBuilder::ack(info)
            .source(self.id)
            .destination(to)
            .sender(self.id)
            .seq(anchor)
            .send_window(held)
            .ack_modes(self.config.ack_policy.continuous_ack(), block)
            .build()
    }

    /// Classifies a correctly received data frame and builds the ACK to answer
    /// it with. Duplicates are acknowledged again, their first ACK may have
    /// been lost.
    pub fn check_and_register(
        &mut self,
        frame: &Frame,
        now: Duration,
        timers: &mut TimerQueue<TimerKey>,
    ) -> (RxVerdict, Frame) {
        let src = frame.source();
        let seq = frame.seq();
        let policy = self.config.ack_policy;
        let window = self.config.send_window;

        let record = self.receive.entry(src).or_default();
        let verdict = record.register(seq, now);
        let info = record.ack_info(seq, policy.continuous_ack(), policy.block_ack());
        let held = record.held(seq, window);
        if record.missing() == 0 {
            timers.cancel(&TimerKey::Arq(ArqTimer::NackRetry { src }));
        }

        if verdict == RxVerdict::Duplicate {
            log::debug!("[Node {}]: Duplicate {}", self.id, frame.key());
        }
        let block = policy.block_ack();
        (verdict, self.ack_frame(src, seq, info, held, block))
    }

    /// The header of a frame addressed to this node arrived, its payload did
    /// not. Returns an immediate NACK if NACKs are enabled.
    pub fn on_damaged(
        &mut self,
        header: &MacHeader,
        now: Duration,
        timers: &mut TimerQueue<TimerKey>,
    ) -> Option<Frame> {
        let src = header.source;
        let record = self.receive.entry(src).or_default();
        let nack = AckInfo {
            nacked_count: record.missing().saturating_add(1),
            ..AckInfo::nack()
        };

        if self.config.ack_policy.block_ack() {
            let key = TimerKey::Arq(ArqTimer::BlockAck { src });
            if !timers.is_armed(&key) {
                timers.arm(key, now + self.config.block_timeout);
            }
        }

        if !self.config.nack_send {
            return None;
        }
        timers.arm(
            TimerKey::Arq(ArqTimer::NackRetry { src }),
            now + self.config.nack_timeout,
        );
        Some(self.ack_frame(src, header.seq, nack, 0, false))
    }

    /// Answers a block ACK request of `src` from the most recently stored
    /// header.
    pub fn answer_block_ack_request(&self, src: NodeID) -> Option<Frame> {
        let record = self.receive.get(&src)?;
        let anchor = record.last_anchor()?;
        let info = record.ack_info(anchor, self.config.ack_policy.continuous_ack(), true);
        let held = record.held(anchor, self.config.send_window);
        Some(self.ack_frame(src, anchor, info, held, true))
    }

    pub fn block_ack_request(&self, dst: NodeID, seq: SeqNum) -> Frame {
        FrameBuilder::new(FrameType::BlockAckRequest)
            .source(self.id)
            .destination(dst)
            .sender(self.id)
            .seq(seq)
            .build()
    }

    fn on_nack_retry(&self, src: NodeID) -> Option<ArqAction> {
        let record = self.receive.get(&src)?;
        if record.missing() == 0 {
            return None;
        }
        let seq = record.expected_next();
        Some(ArqAction::SendAck(self.ack_frame(src, seq, record.nack_info(), 0, false)))
    }

    fn on_block_ack_timer(&self, src: NodeID) -> Option<ArqAction> {
        let record = self.receive.get(&src)?;
        let anchor = record.highest()?;
        let info = record.ack_info(anchor, self.config.ack_policy.continuous_ack(), true);
        let held = record.held(anchor, self.config.send_window);
        Some(ArqAction::SendAck(self.ack_frame(src, anchor, info, held, true)))
    }

    pub fn on_timer(
        &mut self,
        timer: ArqTimer,
        timers: &mut TimerQueue<TimerKey>,
    ) -> Option<ArqAction> {
        match timer {
            ArqTimer::AckAwait { dst, seq } => self.on_timeout(dst, seq, timers),
            ArqTimer::NackRetry { src } => self.on_nack_retry(src),
            ArqTimer::BlockAck { src } => self.on_block_ack_timer(src),
        }
    }

    // relay

    pub fn on_relay_rx(&mut self, frame: &Frame, bit_error_rate: f64) -> RelayDecision {
        let phy = frame.phy();
        let decision = self
            .relay
            .entry((frame.source(), frame.destination()))
            .or_default()
            .on_data(frame.seq(), phy.generation, phy.retry, bit_error_rate);
        log::debug!(
            "[Node {}]: Overheard {} (generation {}): {:?}",
            self.id,
            frame.key(),
            phy.generation,
            decision
        );
        decision
    }

    /// An ACK answering `key`, built from the last ACK this relay saw for the
    /// pair.
    pub fn cached_ack_for(&self, key: FrameKey) -> Option<Frame> {
        let entry = self.relay.get(&(key.source, key.destination))?;
        if !entry.is_acked(key.seq) {
            return None;
        }
        let cached = entry.cached_ack()?;
        if cached.seq() == key.seq {
            return Some(cached.relayed_by(self.id));
        }
        Some(
            FrameBuilder::ack(AckInfo::ack())
                .source(key.destination)
                .destination(key.source)
                .sender(self.id)
                .seq(key.seq)
                .send_window(cached.phy().send_window)
                .build(),
        )
    }

    /// Updates the ledger from an overheard ACK and decides whether this
    /// relay passes it on.
    pub fn on_ack_to_relay(&mut self, frame: &Frame) -> bool {
        let Ok(info) = frame.ack_info() else {
            return false;
        };
        // the ACK travels back, destination -> source
        let pair = (frame.destination(), frame.source());
        let Some(entry) = self.relay.get_mut(&pair) else {
            return false;
        };

        let anchor = frame.seq();
        let phy = frame.phy();
        let res = info.resolve(anchor, phy.continuous_ack_enabled, phy.block_ack_enabled);
        for seq in res.acked() {
            entry.mark_acked(seq);
        }
        if !info.nack {
            entry.cache_ack(frame.clone());
        }
        entry.should_forward_ack(anchor, info.nack)
    }

    /// Decision for a queued relay frame right before it is sent.
    pub fn recheck_relay(&self, frame: &Frame) -> RelayDecision {
        match self.relay.get(&(frame.source(), frame.destination())) {
            Some(entry) => entry.recheck(frame.seq(), frame.phy().generation),
            None => RelayDecision::Drop,
        }
    }

    pub fn mark_relayed(&mut self, key: FrameKey) -> bool {
        let marked = self
            .relay
            .get_mut(&(key.source, key.destination))
            .map_or(false, |e| e.mark_transmitted(key.seq));
        if !marked {
            log::warn!(
                "[Node {}]: Refusing to mark {} as relayed, it was never received",
                self.id,
                key
            );
        }
        marked
    }
}
