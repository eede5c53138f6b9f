//! Channel-Access State Machine. Decides on every access opportunity which
//! of the queued acknowledgements, relayed frames and own frames goes next,
//! and feeds receptions into the ARQ Manager.

pub mod backoff;
pub mod delivery;
pub mod queues;
pub mod tdma;

use std::collections::HashMap;
use std::time::Duration;

use coopmac_config::{AccessMode, NodeConfig, NodeID};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use backoff::Backoff;
pub use delivery::DeliveryFilter;
pub use queues::{OwnEntry, TxQueues};
pub use tdma::TdmaSchedule;

use crate::arq::{ArqAction, ArqManager, RelayDecision, RxVerdict};
use crate::frame::{Frame, FrameBuilder, FrameKey, FrameType, Payload};
use crate::phy::{LinkEnv, ReceivedFrame, TxMode};
use crate::reconstruction::entropy::per_to_ber;
use crate::seq::SeqNum;
use crate::stats::Stats;
use crate::timer::{MacTimer, TimerKey, TimerQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    QueueFull,
    PayloadTooLarge { size: usize, max: usize },
    SelfAddressed,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EnqueueError::QueueFull => write!(f, "[EnqueueError]: transmit queue is full"),
            EnqueueError::PayloadTooLarge { size, max } => write!(
                f,
                "[EnqueueError]: payload of {} bytes exceeds maximum of {}",
                size, max
            ),
            EnqueueError::SelfAddressed => {
                write!(f, "[EnqueueError]: frame is addressed to this node")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    Idle,
    /// Waiting for the medium to be idle for an inter frame space.
    Sensing,
    Backoff,
    SlotWait,
    /// Access granted, the next frame is being handed to the PHY.
    WaitTx,
    Tx,
    /// The medium turned busy while idle, a reception may be in progress.
    Rx,
    /// A reception failed to decode and the medium is still busy.
    Collision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Control,
    Relay(FrameKey),
    Data { dst: NodeID, seq: SeqNum },
}

pub struct ChannelAccess {
    id: NodeID,
    config: NodeConfig,
    arq: ArqManager,
    timers: TimerQueue<TimerKey>,
    queues: TxQueues,
    backoff: Backoff,
    backoff_started: Duration,
    tdma: Option<TdmaSchedule>,
    delivery: DeliveryFilter,
    // payloads of own frames until they are acknowledged or given up
    sent: HashMap<(NodeID, SeqNum), Payload>,
    awaiting_ack: Option<(NodeID, SeqNum)>,
    in_flight: Option<InFlight>,
    state: MacState,
    rng: StdRng,
    stats: Stats,
}

fn schedule_for(mode: &AccessMode) -> Option<TdmaSchedule> {
    match mode {
        AccessMode::Csma => None,
        AccessMode::Tdma {
            slot_index,
            slots_per_frame,
            slot_duration,
        } => Some(TdmaSchedule::new(
            *slot_index,
            *slots_per_frame,
            *slot_duration,
        )),
    }
}

impl ChannelAccess {
    /// Panics if `config` does not validate.
    pub fn new(config: NodeConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("Invalid configuration for node {}: {}", config.id, e);
        }
        let id = config.id;

        Self {
            id,
            arq: ArqManager::new(id, config.arq.clone()),
            timers: TimerQueue::new(),
            queues: TxQueues::new(config.queue_capacity),
            backoff: Backoff::new(&config.csma),
            backoff_started: Duration::ZERO,
            tdma: schedule_for(&config.access),
            delivery: DeliveryFilter::new(),
            sent: HashMap::new(),
            awaiting_ack: None,
            in_flight: None,
            state: MacState::Idle,
            rng: StdRng::seed_from_u64(config.rng_seed),
            stats: Stats::new(id),
            config,
        }
    }

    pub fn id(&self) -> NodeID {
        self.id
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn arq(&self) -> &ArqManager {
        &self.arq
    }

    pub fn queues(&self) -> &TxQueues {
        &self.queues
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn timers(&self) -> &TimerQueue<TimerKey> {
        &self.timers
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    pub fn awaiting_ack(&self) -> Option<(NodeID, SeqNum)> {
        self.awaiting_ack
    }

    /// When the driver has to call [`ChannelAccess::on_timers_due`] next.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn enqueue(&mut self, payload: Payload, dst: NodeID, env: &mut LinkEnv) -> bool {
        match self.try_enqueue(payload, dst, env) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[Node {}]: {}", self.id, e);
                false
            }
        }
    }

    pub fn try_enqueue(
        &mut self,
        payload: Payload,
        dst: NodeID,
        env: &mut LinkEnv,
    ) -> Result<(), EnqueueError> {
        if dst == self.id {
            return Err(EnqueueError::SelfAddressed);
        }
        if payload.size() > self.config.max_payload_size {
            return Err(EnqueueError::PayloadTooLarge {
                size: payload.size(),
                max: self.config.max_payload_size,
            });
        }
        if !self.queues.push_own(payload, dst) {
            return Err(EnqueueError::QueueFull);
        }
        self.arq.open_send_record(dst);
        self.request_access(env);
        Ok(())
    }

    /// Switches between contention and slotted access. Every running MAC
    /// timer of the old mode is cancelled.
    pub fn set_access_mode(&mut self, mode: AccessMode, env: &mut LinkEnv) {
        if let Err(e) = mode.validate() {
            panic!("Invalid access mode for node {}: {}", self.id, e);
        }
        let cancelled = self.timers.cancel_where(TimerKey::is_mac);
        log::debug!(
            "[Node {}]: Switching to {:?}, cancelled {} timers",
            self.id,
            mode,
            cancelled
        );

        self.tdma = schedule_for(&mode);
        self.config.access = mode;
        self.awaiting_ack = None;
        self.backoff.complete();
        if self.state != MacState::Tx {
            self.state = MacState::Idle;
            self.request_access(env);
        }
    }

    fn own_eligible(&self, entry: &OwnEntry) -> bool {
        match entry {
            OwnEntry::Retry { .. } => true,
            OwnEntry::New { dst, .. } => self.arq.is_tx_allowed(*dst),
        }
    }

    fn has_pending(&self) -> bool {
        if self.queues.has_control() || self.queues.relay_len() > 0 {
            return true;
        }
        self.awaiting_ack.is_none() && self.queues.has_own_where(|e| self.own_eligible(e))
    }

    fn ifs(&self) -> Duration {
        if self.queues.has_control() {
            self.config.csma.sifs
        } else {
            self.config.csma.difs
        }
    }

    fn arm(&mut self, timer: MacTimer, at: Duration) {
        self.timers.arm(TimerKey::Mac(timer), at);
    }

    fn cancel(&mut self, timer: MacTimer) {
        self.timers.cancel(&TimerKey::Mac(timer));
    }

    fn start_sensing(&mut self, env: &mut LinkEnv) {
        self.state = MacState::Sensing;
        if !env.phy.carrier_busy() {
            self.arm(MacTimer::Ifs, env.now + self.ifs());
        }
    }

    fn freeze_backoff(&mut self, now: Duration) {
        self.cancel(MacTimer::Backoff);
        self.backoff.freeze(now.saturating_sub(self.backoff_started));
    }

    fn request_access(&mut self, env: &mut LinkEnv) {
        match self.state {
            MacState::Tx
            | MacState::WaitTx
            | MacState::Sensing
            | MacState::Rx
            | MacState::Collision => return,
            MacState::Backoff | MacState::SlotWait => {
                if !self.queues.has_control() {
                    return;
                }
                // acknowledgements do not wait for the contention
                if self.state == MacState::Backoff {
                    self.freeze_backoff(env.now);
                }
                self.cancel(MacTimer::Slot);
            }
            MacState::Idle => {}
        }

        if !self.has_pending() {
            self.state = MacState::Idle;
            return;
        }
        if self.tdma.is_some() && !self.queues.has_control() {
            self.wait_for_slot(env.now);
            return;
        }
        self.start_sensing(env);
    }

    fn wait_for_slot(&mut self, now: Duration) {
        let Some(tdma) = self.tdma else {
            return;
        };
        self.state = MacState::SlotWait;
        self.arm(MacTimer::Slot, tdma.next_opportunity(now, Duration::ZERO));
    }

    pub fn on_carrier_changed(&mut self, busy: bool, env: &mut LinkEnv) {
        if self.state == MacState::Tx {
            return;
        }
        if busy {
            match self.state {
                MacState::Idle => self.state = MacState::Rx,
                MacState::Sensing => self.cancel(MacTimer::Ifs),
                MacState::Backoff => {
                    self.freeze_backoff(env.now);
                    self.state = MacState::Sensing;
                }
                _ => {}
            }
            return;
        }

        match self.state {
            MacState::Sensing => self.arm(MacTimer::Ifs, env.now + self.ifs()),
            MacState::Rx | MacState::Collision => {
                self.state = MacState::Idle;
                self.request_access(env);
            }
            MacState::Idle => self.request_access(env),
            _ => {}
        }
    }

    /// Fires every timer due at `env.now`.
    pub fn on_timers_due(&mut self, env: &mut LinkEnv) {
        while let Some((_, key)) = self.timers.pop_due(env.now) {
            match key {
                TimerKey::Arq(timer) => {
                    if let Some(action) = self.arq.on_timer(timer, &mut self.timers) {
                        self.handle_arq_action(action, env);
                    }
                }
                TimerKey::Mac(timer) => self.on_mac_timer(timer, env),
            }
        }
        self.request_access(env);
    }

    fn on_mac_timer(&mut self, timer: MacTimer, env: &mut LinkEnv) {
        match timer {
            MacTimer::Ifs => {
                if env.phy.carrier_busy() {
                    return;
                }
                if self.queues.has_control() {
                    self.transmit_next(env);
                } else if self.tdma.is_some() {
                    self.wait_for_slot(env.now);
                } else {
                    let countdown = self.backoff.start(&mut self.rng);
                    self.backoff_started = env.now;
                    self.state = MacState::Backoff;
                    self.arm(MacTimer::Backoff, env.now + countdown);
                }
            }
            MacTimer::Backoff => {
                self.backoff.complete();
                self.transmit_next(env);
            }
            MacTimer::Slot => self.transmit_next(env),
            MacTimer::AckWait => {
                if let Some((dst, seq)) = self.awaiting_ack.take() {
                    log::debug!("[Node {}]: No ACK for {}#{}", self.id, dst, seq);
                    env.rates.report_data_failed(dst);
                    self.backoff.on_failure();
                }
                if self.state == MacState::Idle {
                    self.request_access(env);
                }
            }
        }
    }

    fn handle_arq_action(&mut self, action: ArqAction, env: &mut LinkEnv) {
        match action {
            ArqAction::Retransmit { dst, seq } => {
                if self.awaiting_ack == Some((dst, seq)) {
                    self.awaiting_ack = None;
                    self.cancel(MacTimer::AckWait);
                    env.rates.report_data_failed(dst);
                    self.backoff.on_failure();
                }
                if self.config.arq.ack_policy.block_ack() {
                    // the frame may have arrived with only its ACK lost
                    self.queues
                        .push_control(self.arq.block_ack_request(dst, seq));
                }
                self.queues.push_retry(dst, seq);
            }
            ArqAction::FinalFailure { dst, seq } => {
                if self.awaiting_ack == Some((dst, seq)) {
                    self.awaiting_ack = None;
                    self.cancel(MacTimer::AckWait);
                }
                self.sent.remove(&(dst, seq));
                self.stats.add_final_failure();
                self.backoff.reset();
                env.rates.report_final_data_failed(dst);
                env.upper.on_final_failure(dst, seq);
            }
            ArqAction::SendAck(frame) => self.queues.push_control(frame),
        }
    }

    fn next_own_frame(&mut self, env: &mut LinkEnv) -> Option<(Frame, NodeID, SeqNum)> {
        if self.awaiting_ack.is_some() {
            return None;
        }
        loop {
            let arq = &self.arq;
            let entry = self.queues.pop_own_where(|e| match e {
                OwnEntry::Retry { .. } => true,
                OwnEntry::New { dst, .. } => arq.is_tx_allowed(*dst),
            })?;

            let (dst, seq, payload) = match entry {
                OwnEntry::New { payload, dst } => {
                    let seq = self.arq.allocate_sequence(dst);
                    self.sent.insert((dst, seq), payload.clone());
                    (dst, seq, payload)
                }
                OwnEntry::Retry { dst, seq } => {
                    let outstanding = self
                        .arq
                        .send_record(dst)
                        .and_then(|r| r.outstanding(seq))
                        .is_some();
                    match self.sent.get(&(dst, seq)) {
                        Some(payload) if outstanding => (dst, seq, payload.clone()),
                        _ => {
                            log::trace!(
                                "[Node {}]: Skipping retry of {}#{}, already resolved",
                                self.id,
                                dst,
                                seq
                            );
                            continue;
                        }
                    }
                }
            };

            let tx = self.arq.send(dst, seq, env.now, &mut self.timers);
            if tx.retry {
                self.stats.add_retransmission();
            }
            let policy = self.config.arq.ack_policy;
            let frame = FrameBuilder::data()
                .source(self.id)
                .destination(dst)
                .sender(self.id)
                .seq(seq)
                .retry(tx.retry)
                .generation(tx.generation)
                .send_window(self.arq.window_remaining(dst))
                .ack_modes(policy.continuous_ack(), policy.block_ack())
                .payload(payload)
                .build();
            return Some((frame, dst, seq));
        }
    }

    fn transmit_next(&mut self, env: &mut LinkEnv) {
        self.state = MacState::WaitTx;
        self.send_next(env);
        if self.state == MacState::WaitTx {
            self.state = MacState::Idle;
        }
    }

    fn send_next(&mut self, env: &mut LinkEnv) {
        if let Some(frame) = self.queues.pop_control() {
            let mode = match frame.frame_type() {
                FrameType::Ack => env.rates.ack_tx_mode(frame.destination()),
                _ => env.rates.control_tx_mode(),
            };
            if frame.frame_type() == FrameType::Ack {
                self.stats.add_ack_sent();
            }
            self.send(frame, InFlight::Control, &mode, env);
            return;
        }

        while let Some(frame) = self.queues.pop_relay() {
            match self.arq.recheck_relay(&frame) {
                RelayDecision::Forward | RelayDecision::ReplaceStoredCopy => {
                    let mode = env
                        .rates
                        .data_tx_mode(frame.destination(), frame.payload().size());
                    let key = frame.key();
                    self.send(frame, InFlight::Relay(key), &mode, env);
                    return;
                }
                RelayDecision::ResendCachedAck => {
                    if let Some(ack) = self.arq.cached_ack_for(frame.key()) {
                        log::debug!(
                            "[Node {}]: {} was acknowledged while queued, repeating the ACK",
                            self.id,
                            frame.key()
                        );
                        let mode = env.rates.ack_tx_mode(ack.destination());
                        self.stats.add_ack_forwarded();
                        self.send(ack, InFlight::Control, &mode, env);
                        return;
                    }
                }
                RelayDecision::Drop => {
                    log::debug!("[Node {}]: Pulled {} from relay queue", self.id, frame.key());
                }
            }
        }

        if let Some((frame, dst, seq)) = self.next_own_frame(env) {
            let mode = env.rates.data_tx_mode(dst, frame.payload().size());
            self.stats.add_sent(frame.payload().size());
            self.send(frame, InFlight::Data { dst, seq }, &mode, env);
        }
    }

    fn send(&mut self, frame: Frame, kind: InFlight, mode: &TxMode, env: &mut LinkEnv) {
        let bytes = match frame.serialize_into() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[Node {}]: Dropping {}: {}", self.id, frame.key(), e);
                return;
            }
        };

        if !env.phy.transmit(&bytes, mode) {
            log::debug!("[Node {}]: PHY busy, deferring {}", self.id, frame.key());
            match kind {
                InFlight::Control => self.queues.requeue_control(frame),
                InFlight::Relay(_) => self.queues.requeue_relay(frame),
                InFlight::Data { dst, seq } => self.queues.push_retry(dst, seq),
            }
            self.start_sensing(env);
            return;
        }

        log::trace!(
            "[Node {}]: Transmitting {:?} {} in {}",
            self.id,
            frame.frame_type(),
            frame.key(),
            mode.name
        );
        self.state = MacState::Tx;
        self.in_flight = Some(kind);
    }

    pub fn on_send_complete(&mut self, env: &mut LinkEnv) {
        self.state = MacState::Idle;
        match self.in_flight.take() {
            Some(InFlight::Relay(key)) => {
                if self.arq.mark_relayed(key) {
                    self.stats.add_relayed();
                }
            }
            Some(InFlight::Data { dst, seq }) => {
                self.awaiting_ack = Some((dst, seq));
                self.arm(MacTimer::AckWait, env.now + self.config.arq.basic_timeout);
            }
            Some(InFlight::Control) => {}
            None => log::debug!("[Node {}]: Send complete without transmission", self.id),
        }
        self.request_access(env);
    }

    pub fn on_receive_complete(&mut self, rx: ReceivedFrame, env: &mut LinkEnv) {
        if matches!(self.state, MacState::Rx | MacState::Collision) {
            self.state = MacState::Idle;
        }
        let decoded = if rx.header_ok {
            Frame::deserialize_from(&rx.bytes).map_err(|e| {
                log::debug!("[Node {}]: {}", self.id, e);
            })
        } else {
            Err(())
        };
        let frame = match decoded {
            Ok(frame) => frame,
            Err(()) => {
                self.stats.add_collision();
                if self.state == MacState::Idle && env.phy.carrier_busy() {
                    self.state = MacState::Collision;
                    return;
                }
                self.request_access(env);
                return;
            }
        };

        if frame.sender() != self.id {
            match frame.frame_type() {
                FrameType::Data => self.on_data(frame, &rx, env),
                FrameType::Ack => self.on_ack(frame, env),
                FrameType::BlockAckRequest => {
                    if frame.destination() == self.id {
                        if let Some(answer) = self.arq.answer_block_ack_request(frame.source()) {
                            self.queues.push_control(answer);
                        }
                    }
                }
            }
        }
        self.request_access(env);
    }

    fn on_data(&mut self, frame: Frame, rx: &ReceivedFrame, env: &mut LinkEnv) {
        if frame.destination() == self.id {
            self.on_data_for_us(frame, rx, env);
            return;
        }
        if !self.config.relay || frame.source() == self.id {
            return;
        }
        // a corrupted copy is still worth passing on for combining
        if !rx.payload_ok && rx.link_error_rate > self.config.combining.max_usable_error_rate {
            log::debug!(
                "[Node {}]: Not relaying {}, error rate {:.3} too high",
                self.id,
                frame.key(),
                rx.link_error_rate
            );
            return;
        }

        let ber = per_to_ber(rx.link_error_rate, frame.payload().size_bits().max(1));
        match self.arq.on_relay_rx(&frame, ber) {
            RelayDecision::Forward => {
                if !self.queues.push_relay(frame.relayed_by(self.id)) {
                    log::warn!("[Node {}]: Relay queue full, dropping {}", self.id, frame.key());
                }
            }
            RelayDecision::ReplaceStoredCopy => {
                let copy = frame.relayed_by(self.id);
                if !self.queues.replace_relay(copy.clone()) {
                    self.queues.push_relay(copy);
                }
            }
            RelayDecision::ResendCachedAck => {
                if let Some(ack) = self.arq.cached_ack_for(frame.key()) {
                    self.stats.add_ack_forwarded();
                    self.queues.push_control(ack);
                }
            }
            RelayDecision::Drop => {}
        }
    }

    fn on_data_for_us(&mut self, frame: Frame, rx: &ReceivedFrame, env: &mut LinkEnv) {
        let mut decoded = rx.payload_ok || rx.reconstructed;
        let mut reconstructed = rx.reconstructed;
        if !decoded
            && env
                .phy
                .store_or_combine_copy(&frame, rx.snr_db, rx.link_error_rate)
            && env.phy.attempt_reconstruction(&frame.key())
        {
            decoded = true;
            reconstructed = true;
        }

        if !decoded {
            if let Some(nack) = self.arq.on_damaged(frame.mac(), env.now, &mut self.timers) {
                self.queues.push_control(nack);
            }
            return;
        }
        if reconstructed {
            self.stats.add_reconstruction();
        }
        self.stats.add_received();

        let (verdict, ack) = self
            .arq
            .check_and_register(&frame, env.now, &mut self.timers);
        self.queues.push_control(ack);

        let (src, seq) = (frame.source(), frame.seq());
        match verdict {
            RxVerdict::Duplicate => {
                self.stats.add_duplicate();
                return;
            }
            // the receive record already guarantees a single delivery
            RxVerdict::Reordered => {}
            RxVerdict::New => {
                if !self.delivery.accept(src, seq) {
                    log::debug!("[Node {}]: {} already delivered", self.id, frame.key());
                    return;
                }
            }
        }
        self.stats.add_delivered(frame.payload().size());
        let dst = frame.destination();
        env.upper.on_frame_delivered(frame.into_payload(), src, dst);
    }

    fn on_ack(&mut self, frame: Frame, env: &mut LinkEnv) {
        if frame.destination() != self.id {
            if self.config.relay && frame.source() != self.id && self.arq.on_ack_to_relay(&frame) {
                self.stats.add_ack_forwarded();
                self.queues.push_control(frame.relayed_by(self.id));
            }
            return;
        }

        let dst = frame.source();
        let outcome = self.arq.on_ack(&frame, &mut self.timers);
        for seq in outcome.acked {
            self.sent.remove(&(dst, seq));
            env.rates.report_data_ok(dst);
            if self.awaiting_ack == Some((dst, seq)) {
                self.awaiting_ack = None;
                self.cancel(MacTimer::AckWait);
                self.backoff.reset();
            }
        }
        for action in outcome.actions {
            self.handle_arq_action(action, env);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::AckInfo;
    use crate::phy::{ConstantRate, Phy, UpperLayer};

    fn node(c: char) -> NodeID {
        NodeID::new(c)
    }

    fn us(v: u64) -> Duration {
        Duration::from_micros(v)
    }

    #[derive(Default)]
    struct MockPhy {
        busy: bool,
        sent: Vec<Frame>,
    }

    impl Phy for MockPhy {
        fn carrier_busy(&self) -> bool {
            self.busy
        }

        fn transmit(&mut self, frame: &[u8], _mode: &TxMode) -> bool {
            self.sent.push(Frame::deserialize_from(frame).unwrap());
            true
        }

        fn store_or_combine_copy(&mut self, _: &Frame, _: f64, _: f64) -> bool {
            false
        }

        fn attempt_reconstruction(&mut self, _: &FrameKey) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Sink {
        delivered: Vec<(Payload, NodeID, NodeID)>,
        failed: Vec<(NodeID, SeqNum)>,
    }

    impl UpperLayer for Sink {
        fn on_frame_delivered(&mut self, payload: Payload, src: NodeID, dst: NodeID) {
            self.delivered.push((payload, src, dst));
        }

        fn on_final_failure(&mut self, dst: NodeID, seq: SeqNum) {
            self.failed.push((dst, seq));
        }
    }

    struct Harness {
        now: Duration,
        phy: MockPhy,
        rates: ConstantRate,
        upper: Sink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                now: Duration::ZERO,
                phy: MockPhy::default(),
                rates: ConstantRate::default(),
                upper: Sink::default(),
            }
        }

        fn env(&mut self) -> LinkEnv<'_> {
            LinkEnv {
                now: self.now,
                phy: &mut self.phy,
                rates: &mut self.rates,
                upper: &mut self.upper,
            }
        }

        /// Fires every timer up to `until`. Transmissions complete instantly.
        fn run_until(&mut self, mac: &mut ChannelAccess, until: Duration) {
            while let Some(deadline) = mac.next_deadline() {
                if deadline > until {
                    break;
                }
                self.now = deadline;
                let sent = self.phy.sent.len();
                mac.on_timers_due(&mut self.env());
                if self.phy.sent.len() > sent {
                    mac.on_send_complete(&mut self.env());
                }
            }
            self.now = until;
        }

        fn receive(&mut self, mac: &mut ChannelAccess, frame: &Frame) {
            self.receive_with(mac, frame, true, 0.0);
        }

        fn receive_with(
            &mut self,
            mac: &mut ChannelAccess,
            frame: &Frame,
            payload_ok: bool,
            link_error_rate: f64,
        ) {
            let rx = ReceivedFrame {
                bytes: frame.serialize_into().unwrap(),
                snr_db: 20.0,
                link_error_rate,
                mode: TxMode::new("BPSK 1/2", 6_000_000, 2, 0.5),
                header_ok: true,
                payload_ok,
                reconstructed: false,
            };
            mac.on_receive_complete(rx, &mut self.env());
        }
    }

    fn data(src: NodeID, dst: NodeID, seq: SeqNum) -> Frame {
        FrameBuilder::data()
            .source(src)
            .destination(dst)
            .sender(src)
            .seq(seq)
            .with_payload_size(8)
            .build()
    }

    fn ack(from: NodeID, to: NodeID, seq: SeqNum) -> Frame {
        FrameBuilder::ack(AckInfo::ack())
            .source(from)
            .destination(to)
            .sender(from)
            .seq(seq)
            .build()
    }

    fn mac_for(c: char) -> ChannelAccess {
        ChannelAccess::new(NodeConfig::new(node(c)))
    }

    #[test]
    fn test_enqueue_rejections() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('S'));
        cfg.queue_capacity = 1;
        let mut mac = ChannelAccess::new(cfg);

        assert_eq!(
            mac.try_enqueue(Payload::zeroed(8), node('S'), &mut h.env()),
            Err(EnqueueError::SelfAddressed)
        );
        assert_eq!(
            mac.try_enqueue(Payload::zeroed(2000), node('D'), &mut h.env()),
            Err(EnqueueError::PayloadTooLarge {
                size: 2000,
                max: 1500
            })
        );
        assert_eq!(
            mac.try_enqueue(Payload::zeroed(8), node('D'), &mut h.env()),
            Ok(())
        );
        assert!(!mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env()));
    }

    #[test]
    #[should_panic]
    fn test_invalid_config_panics() {
        let mut cfg = NodeConfig::new(node('S'));
        cfg.arq.send_window = 0;
        ChannelAccess::new(cfg);
    }

    #[test]
    fn test_sends_after_difs_and_backoff() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');

        assert!(mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env()));
        assert_eq!(mac.state(), MacState::Sensing);
        assert_eq!(mac.next_deadline(), Some(us(50)));

        // DIFS plus at most 15 slots
        h.run_until(&mut mac, us(400));
        assert_eq!(h.phy.sent.len(), 1);
        let frame = &h.phy.sent[0];
        assert_eq!(frame.frame_type(), FrameType::Data);
        assert_eq!(frame.destination(), node('D'));
        assert_eq!(frame.sender(), node('S'));
        assert_eq!(frame.seq(), 0);
        assert!(!frame.phy().retry);

        assert_eq!(mac.awaiting_ack(), Some((node('D'), 0)));
        assert!(mac.timers().is_armed(&TimerKey::Mac(MacTimer::AckWait)));
        assert_eq!(mac.stats().data_sent(), 1);
    }

    #[test]
    fn test_ack_wait_holds_back_new_data() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());

        h.run_until(&mut mac, us(900));
        assert_eq!(h.phy.sent.len(), 1);
        assert_eq!(mac.state(), MacState::Idle);

        h.receive(&mut mac, &ack(node('D'), node('S'), 0));
        assert_eq!(mac.awaiting_ack(), None);
        assert!(mac.arq().send_record(node('D')).unwrap().is_acked(0));

        h.run_until(&mut mac, us(1400));
        assert_eq!(h.phy.sent.len(), 2);
        assert_eq!(h.phy.sent[1].seq(), 1);
    }

    #[test]
    fn test_missing_ack_leads_to_retransmission() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');
        mac.enqueue(Payload::new(vec![1, 2, 3]), node('D'), &mut h.env());

        h.run_until(&mut mac, us(400));
        assert_eq!(mac.backoff().cw(), 15);

        // basic ACK wait runs out first
        h.run_until(&mut mac, us(1500));
        assert_eq!(mac.awaiting_ack(), None);
        assert_eq!(mac.backoff().cw(), 31);
        assert_eq!(h.phy.sent.len(), 1);

        // then the long timeout brings the frame back
        h.run_until(&mut mac, Duration::from_millis(22));
        assert_eq!(h.phy.sent.len(), 2);
        let retry = &h.phy.sent[1];
        assert_eq!(retry.seq(), 0);
        assert!(retry.phy().retry);
        assert_eq!(retry.payload().as_slice(), &[1, 2, 3]);
        assert_eq!(mac.stats().retransmissions(), 1);
    }

    #[test]
    fn test_final_failure_reaches_upper_layer() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('S'));
        cfg.arq.max_retries = 1;
        let mut mac = ChannelAccess::new(cfg);
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());

        h.run_until(&mut mac, Duration::from_millis(100));
        assert_eq!(h.phy.sent.len(), 2);
        assert_eq!(h.upper.failed, vec![(node('D'), 0)]);
        assert_eq!(mac.stats().final_failures(), 1);
        assert_eq!(mac.backoff().cw(), 15);
    }

    #[test]
    fn test_ack_goes_out_after_sifs() {
        let mut h = Harness::new();
        let mut mac = mac_for('D');

        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        assert_eq!(h.upper.delivered.len(), 1);
        assert_eq!(h.upper.delivered[0].1, node('S'));
        assert_eq!(h.upper.delivered[0].2, node('D'));
        assert_eq!(mac.next_deadline(), Some(us(10)));

        h.run_until(&mut mac, us(20));
        assert_eq!(h.phy.sent.len(), 1);
        let ack = &h.phy.sent[0];
        assert_eq!(ack.frame_type(), FrameType::Ack);
        assert_eq!(ack.destination(), node('S'));
        assert_eq!(ack.seq(), 0);
        assert!(!ack.ack_info().unwrap().nack);
        assert_eq!(mac.stats().acks_sent(), 1);
    }

    #[test]
    fn test_control_frames_go_before_own_data() {
        let mut h = Harness::new();
        let mut mac = mac_for('D');
        mac.enqueue(Payload::zeroed(8), node('S'), &mut h.env());
        h.now = us(5);
        h.receive(&mut mac, &data(node('S'), node('D'), 0));

        h.run_until(&mut mac, Duration::from_millis(1));
        assert_eq!(h.phy.sent.len(), 2);
        assert_eq!(h.phy.sent[0].frame_type(), FrameType::Ack);
        assert_eq!(h.phy.sent[1].frame_type(), FrameType::Data);
    }

    #[test]
    fn test_duplicate_is_delivered_once() {
        let mut h = Harness::new();
        let mut mac = mac_for('D');
        let frame = data(node('S'), node('D'), 3);

        h.receive(&mut mac, &frame);
        h.receive(&mut mac, &frame);
        assert_eq!(h.upper.delivered.len(), 1);
        assert_eq!(mac.stats().duplicates(), 1);

        // both copies are acknowledged
        h.run_until(&mut mac, us(200));
        assert_eq!(h.phy.sent.len(), 2);
        assert!(h.phy.sent.iter().all(|f| f.frame_type() == FrameType::Ack));
    }

    #[test]
    fn test_reordered_frame_is_delivered() {
        let mut h = Harness::new();
        let mut mac = mac_for('D');

        h.receive(&mut mac, &data(node('S'), node('D'), 1));
        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        let delivered: Vec<_> = h.upper.delivered.iter().map(|(_, src, _)| *src).collect();
        assert_eq!(delivered, vec![node('S'), node('S')]);
        assert_eq!(mac.stats().duplicates(), 0);

        // a late copy of either one is not handed up again
        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        h.receive(&mut mac, &data(node('S'), node('D'), 1));
        assert_eq!(h.upper.delivered.len(), 2);
        assert_eq!(mac.stats().duplicates(), 2);

        h.run_until(&mut mac, us(500));
        assert_eq!(h.phy.sent.len(), 4);
        assert!(h.phy.sent.iter().all(|f| f.frame_type() == FrameType::Ack));
    }

    #[test]
    fn test_busy_medium_while_idle_is_reception() {
        let mut h = Harness::new();
        let mut mac = mac_for('D');

        h.phy.busy = true;
        mac.on_carrier_changed(true, &mut h.env());
        assert_eq!(mac.state(), MacState::Rx);

        // queued, but no access attempt while receiving
        assert!(mac.enqueue(Payload::zeroed(8), node('S'), &mut h.env()));
        assert_eq!(mac.state(), MacState::Rx);
        assert_eq!(mac.next_deadline(), None);

        h.now = us(100);
        h.phy.busy = false;
        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        assert_eq!(mac.state(), MacState::Sensing);
        // the ACK only needs SIFS
        assert_eq!(mac.next_deadline(), Some(us(110)));
    }

    #[test]
    fn test_undecodable_frame_on_busy_medium_is_collision() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');

        h.phy.busy = true;
        mac.on_carrier_changed(true, &mut h.env());
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());

        let rx = ReceivedFrame {
            bytes: vec![0xff; 3],
            snr_db: 3.0,
            link_error_rate: 1.0,
            mode: TxMode::new("BPSK 1/2", 6_000_000, 2, 0.5),
            header_ok: false,
            payload_ok: false,
            reconstructed: false,
        };
        mac.on_receive_complete(rx, &mut h.env());
        assert_eq!(mac.state(), MacState::Collision);
        assert_eq!(mac.stats().collisions(), 1);
        assert_eq!(mac.next_deadline(), None);

        h.now = us(200);
        h.phy.busy = false;
        mac.on_carrier_changed(false, &mut h.env());
        assert_eq!(mac.state(), MacState::Sensing);
        assert_eq!(mac.next_deadline(), Some(us(250)));

        h.run_until(&mut mac, us(700));
        assert_eq!(h.phy.sent.len(), 1);
    }

    #[test]
    fn test_busy_medium_defers_ifs() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');
        h.phy.busy = true;
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());
        assert_eq!(mac.state(), MacState::Sensing);
        assert_eq!(mac.next_deadline(), None);

        h.now = us(100);
        h.phy.busy = false;
        mac.on_carrier_changed(false, &mut h.env());
        assert_eq!(mac.next_deadline(), Some(us(150)));
    }

    #[test]
    fn test_busy_medium_freezes_backoff() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('S'));
        cfg.csma.cw_min = 1023;
        let mut mac = ChannelAccess::new(cfg);
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());

        // end of DIFS, without letting a zero countdown fire right away
        h.now = us(50);
        mac.timers.cancel(&TimerKey::Mac(MacTimer::Ifs));
        mac.on_mac_timer(MacTimer::Ifs, &mut h.env());
        assert_eq!(mac.state(), MacState::Backoff);
        let countdown = mac.backoff().remaining().unwrap();

        h.now = us(55);
        h.phy.busy = true;
        mac.on_carrier_changed(true, &mut h.env());
        assert_eq!(mac.state(), MacState::Sensing);
        assert_eq!(
            mac.backoff().remaining(),
            Some(countdown.saturating_sub(us(5)))
        );
        assert!(!mac.timers().is_armed(&TimerKey::Mac(MacTimer::Backoff)));

        h.now = us(500);
        h.phy.busy = false;
        mac.on_carrier_changed(false, &mut h.env());
        assert_eq!(
            mac.timers().deadline(&TimerKey::Mac(MacTimer::Ifs)),
            Some(us(550))
        );

        h.now = us(550);
        mac.timers.cancel(&TimerKey::Mac(MacTimer::Ifs));
        mac.on_mac_timer(MacTimer::Ifs, &mut h.env());
        // the remainder resumes rounded to whole slots
        assert_eq!(
            mac.timers().deadline(&TimerKey::Mac(MacTimer::Backoff)),
            Some(us(550) + countdown)
        );
    }

    #[test]
    fn test_switching_to_tdma_cancels_contention() {
        let mut h = Harness::new();
        let mut mac = mac_for('S');
        mac.enqueue(Payload::zeroed(8), node('D'), &mut h.env());
        assert!(mac.timers().is_armed(&TimerKey::Mac(MacTimer::Ifs)));

        let mode = AccessMode::Tdma {
            slot_index: 1,
            slots_per_frame: 4,
            slot_duration: Duration::from_millis(1),
        };
        mac.set_access_mode(mode, &mut h.env());
        assert!(!mac.timers().is_armed(&TimerKey::Mac(MacTimer::Ifs)));
        assert_eq!(mac.state(), MacState::SlotWait);
        assert_eq!(
            mac.timers().deadline(&TimerKey::Mac(MacTimer::Slot)),
            Some(Duration::from_millis(1))
        );

        h.run_until(&mut mac, us(1500));
        assert_eq!(h.phy.sent.len(), 1);
    }

    #[test]
    fn test_relay_pulls_frame_acknowledged_while_queued() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('R'));
        cfg.relay = true;
        let mut mac = ChannelAccess::new(cfg);

        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        assert_eq!(mac.queues().relay_len(), 1);

        // D answered S directly before the relay got the medium
        h.now = us(10);
        h.receive(&mut mac, &ack(node('D'), node('S'), 0));
        assert!(!mac.queues().has_control());

        h.run_until(&mut mac, Duration::from_millis(1));
        assert!(h.phy.sent.is_empty());
        assert_eq!(mac.queues().relay_len(), 0);
        assert_eq!(mac.stats().relayed(), 0);
    }

    #[test]
    fn test_relay_forwards_damaged_copies() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('R'));
        cfg.relay = true;
        let mut mac = ChannelAccess::new(cfg);

        h.receive_with(&mut mac, &data(node('S'), node('D'), 0), false, 0.4);
        assert_eq!(mac.queues().relay_len(), 1);
        let entry = mac.arq().relay_entry(node('S'), node('D')).unwrap();
        assert!(entry.is_received(0));
        let first = entry.best_error(0).unwrap();

        // the retry arrives in better shape before the relay got the medium
        let retry = FrameBuilder::data()
            .source(node('S'))
            .destination(node('D'))
            .sender(node('S'))
            .seq(0)
            .retry(true)
            .generation(1)
            .with_payload_size(8)
            .build();
        h.receive_with(&mut mac, &retry, false, 0.1);
        assert_eq!(mac.queues().relay_len(), 1);
        let entry = mac.arq().relay_entry(node('S'), node('D')).unwrap();
        assert!(entry.best_error(0).unwrap() < first);

        // too damaged to help anyone
        h.receive_with(&mut mac, &data(node('S'), node('D'), 1), false, 0.7);
        assert_eq!(mac.queues().relay_len(), 1);
        assert!(!mac
            .arq()
            .relay_entry(node('S'), node('D'))
            .unwrap()
            .is_received(1));

        h.run_until(&mut mac, Duration::from_millis(1));
        assert_eq!(h.phy.sent.len(), 1);
        assert_eq!(h.phy.sent[0].sender(), node('R'));
        assert_eq!(h.phy.sent[0].phy().generation, 1);
        assert_eq!(mac.stats().relayed(), 1);
    }

    #[test]
    fn test_relay_forwards_data_then_ack() {
        let mut h = Harness::new();
        let mut cfg = NodeConfig::new(node('R'));
        cfg.relay = true;
        let mut mac = ChannelAccess::new(cfg);

        h.receive(&mut mac, &data(node('S'), node('D'), 0));
        h.run_until(&mut mac, Duration::from_millis(1));
        assert_eq!(h.phy.sent.len(), 1);
        let relayed = &h.phy.sent[0];
        assert_eq!(relayed.sender(), node('R'));
        assert_eq!(relayed.source(), node('S'));
        assert_eq!(mac.stats().relayed(), 1);
        assert!(mac
            .arq()
            .relay_entry(node('S'), node('D'))
            .unwrap()
            .is_transmitted(0));
        // a relay never waits for an ACK of its own
        assert_eq!(mac.awaiting_ack(), None);

        h.receive(&mut mac, &ack(node('D'), node('S'), 0));
        h.run_until(&mut mac, Duration::from_millis(2));
        assert_eq!(h.phy.sent.len(), 2);
        assert_eq!(h.phy.sent[1].frame_type(), FrameType::Ack);
        assert_eq!(h.phy.sent[1].sender(), node('R'));

        // the same ACK overheard again is not passed on twice
        h.receive(&mut mac, &ack(node('D'), node('S'), 0));
        h.run_until(&mut mac, Duration::from_millis(3));
        assert_eq!(h.phy.sent.len(), 2);
    }
}
