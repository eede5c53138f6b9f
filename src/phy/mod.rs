//! Collaborators the channel access layer talks to. The PHY and rate control
//! are implemented by whatever drives the stack, a simulator or a radio.

pub mod combining;

use std::time::Duration;

use coopmac_config::NodeID;

pub use combining::CombiningReceiver;

use crate::frame::{Frame, FrameKey, Payload};
use crate::seq::SeqNum;

/// Opaque transmission mode handed out by rate control.
#[derive(Debug, Clone, PartialEq)]
pub struct TxMode {
    pub name: String,
    pub bit_rate_bps: u64,
    pub constellation_size: u16,
    /// Information bits per symbol.
    pub spectral_efficiency: f64,
}

impl TxMode {
    pub fn new(
        name: &str,
        bit_rate_bps: u64,
        constellation_size: u16,
        spectral_efficiency: f64,
    ) -> Self {
        Self {
            name: name.to_owned(),
            bit_rate_bps,
            constellation_size,
            spectral_efficiency,
        }
    }

    /// Time `bits` bits take on the air.
    pub fn airtime(&self, bits: usize) -> Duration {
        if self.bit_rate_bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((bits as u64).saturating_mul(1_000_000_000) / self.bit_rate_bps)
    }
}

pub trait Phy {
    fn carrier_busy(&self) -> bool;
    /// Returns `false` if a transmission is already running.
    fn transmit(&mut self, frame: &[u8], mode: &TxMode) -> bool;
    /// Keeps a corrupted copy of `frame`, returns whether copies of the same
    /// frame were already stored.
    fn store_or_combine_copy(&mut self, frame: &Frame, snr_db: f64, link_error_rate: f64)
        -> bool;
    fn attempt_reconstruction(&mut self, key: &FrameKey) -> bool;
}

pub trait RateControl {
    fn data_tx_mode(&mut self, dst: NodeID, size: usize) -> TxMode;
    fn ack_tx_mode(&mut self, dst: NodeID) -> TxMode;
    fn control_tx_mode(&mut self) -> TxMode;
    fn report_data_ok(&mut self, dst: NodeID);
    fn report_data_failed(&mut self, dst: NodeID);
    fn report_final_data_failed(&mut self, dst: NodeID);
}

pub trait UpperLayer {
    fn on_frame_delivered(&mut self, payload: Payload, src: NodeID, dst: NodeID);
    fn on_final_failure(&mut self, dst: NodeID, seq: SeqNum);
}

/// Everything one event handler of the channel access layer may touch.
pub struct LinkEnv<'a> {
    pub now: Duration,
    pub phy: &'a mut dyn Phy,
    pub rates: &'a mut dyn RateControl,
    pub upper: &'a mut dyn UpperLayer,
}

/// One reception as reported by the PHY.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub bytes: Vec<u8>,
    pub snr_db: f64,
    pub link_error_rate: f64,
    pub mode: TxMode,
    pub header_ok: bool,
    pub payload_ok: bool,
    pub reconstructed: bool,
}

/// Rate control that never adapts.
#[derive(Debug, Clone)]
pub struct ConstantRate {
    data: TxMode,
    control: TxMode,
}

impl ConstantRate {
    pub fn new(data: TxMode, control: TxMode) -> Self {
        Self { data, control }
    }
}

impl Default for ConstantRate {
    fn default() -> Self {
        Self::new(
            TxMode::new("QPSK 3/4", 12_000_000, 4, 1.5),
            TxMode::new("BPSK 1/2", 6_000_000, 2, 0.5),
        )
    }
}

impl RateControl for ConstantRate {
    fn data_tx_mode(&mut self, _dst: NodeID, _size: usize) -> TxMode {
        self.data.clone()
    }

    fn ack_tx_mode(&mut self, _dst: NodeID) -> TxMode {
        self.control.clone()
    }

    fn control_tx_mode(&mut self) -> TxMode {
        self.control.clone()
    }

    fn report_data_ok(&mut self, _dst: NodeID) {}

    fn report_data_failed(&mut self, _dst: NodeID) {}

    fn report_final_data_failed(&mut self, _dst: NodeID) {}
}
