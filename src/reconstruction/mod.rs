//! Reconstruction Engine: how likely several corrupted copies of one frame
//! decode once soft combined.

pub mod accumulator;
pub mod entropy;
pub mod error_count;
pub mod error_floor;
pub mod mutual_info;

pub use accumulator::{AccumulatorPool, PendingFrameAccumulator};
pub use error_count::{expected_error_count, MAX_COMBINED_LINKS};

use entropy::{ber_to_per, binary_entropy, inverse_binary_entropy, per_to_ber};
use error_floor::{error_floor, MAX_FLOOR_COPIES};
use mutual_info::{is_supported, symbol_mutual_information};

/// Link quality of one received copy, as reported per hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkObservation {
    pub snr_db: f64,
    /// Packet error rate of the link the copy came over.
    pub link_error_rate: f64,
}

impl LinkObservation {
    pub fn with_mode(self, constellation_size: u16, spectral_efficiency: f64) -> CopyObservation {
        CopyObservation {
            snr_db: self.snr_db,
            link_error_rate: self.link_error_rate,
            constellation_size,
            spectral_efficiency,
        }
    }
}

/// A [`LinkObservation`] together with the mode the copy was sent in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyObservation {
    pub snr_db: f64,
    pub link_error_rate: f64,
    pub constellation_size: u16,
    /// Information bits per symbol.
    pub spectral_efficiency: f64,
}

/// Packet error probability after soft combining `copies` of a frame of
/// `packet_length_bits` bits, all sent with the same mode.
///
/// Every copy adds to the mutual information, but only the best
/// [`MAX_FLOOR_COPIES`] enter the error floor.
///
/// Panics on an unsupported constellation size.
pub fn combine(
    copies: &[LinkObservation],
    constellation_size: u16,
    spectral_efficiency: f64,
    packet_length_bits: usize,
) -> f64 {
    assert!(
        is_supported(constellation_size),
        "unsupported constellation size {}",
        constellation_size
    );
    let copies: Vec<CopyObservation> = copies
        .iter()
        .map(|c| c.with_mode(constellation_size, spectral_efficiency))
        .collect();
    combine_observations(&copies, packet_length_bits)
}

/// Like [`combine`], but every copy carries its own mode.
pub fn combine_observations(copies: &[CopyObservation], packet_length_bits: usize) -> f64 {
    assert!(packet_length_bits > 0, "empty frames cannot be combined");
    for c in copies {
        assert!(
            is_supported(c.constellation_size),
            "unsupported constellation size {}",
            c.constellation_size
        );
        assert!(c.spectral_efficiency > 0.0);
    }

    if copies.is_empty() {
        return 1.0;
    }

    let bers: Vec<f64> = copies
        .iter()
        .map(|c| per_to_ber(c.link_error_rate, packet_length_bits))
        .collect();
    // an error free copy decodes on its own
    if bers.iter().any(|&p| p <= 0.0) {
        return 0.0;
    }

    let mi = aggregate_mutual_information(copies, &bers);
    let rate_distortion = if mi >= 1.0 {
        0.0
    } else {
        inverse_binary_entropy(1.0 - mi)
    };
    let mut best = bers;
    if best.len() > MAX_FLOOR_COPIES {
        best.sort_by(|a, b| a.total_cmp(b));
        best.truncate(MAX_FLOOR_COPIES);
    }
    let ber = rate_distortion.max(error_floor(&best));

    ber_to_per(ber, packet_length_bits)
}

/// Reliable information bits per coded bit the copies add up to. Each copy
/// contributes at most one bit.
pub(crate) fn aggregate_mutual_information(copies: &[CopyObservation], bers: &[f64]) -> f64 {
    copies
        .iter()
        .zip(bers)
        .map(|(c, &p)| {
            let reliable = 1.0 - binary_entropy(p);
            let phi = symbol_mutual_information(c.snr_db, c.constellation_size)
                / c.spectral_efficiency;
            (reliable * phi).min(reliable)
        })
        .sum()
}
