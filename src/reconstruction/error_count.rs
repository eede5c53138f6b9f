//! Expected number of bit errors left in a combined frame, read off trained
//! curves instead of the success probability alone.

use rand::Rng;
use rand_distr::{Distribution, Weibull};

use super::entropy::per_to_ber;
use super::mutual_info::is_supported;
use super::{aggregate_mutual_information, LinkObservation};

/// Curves were only trained for up to this many combined links.
pub const MAX_COMBINED_LINKS: usize = 3;

#[derive(Debug, Clone, Copy)]
struct CurveKnot {
    mi: f64,
    scale: f64,
    shape: f64,
    offset: f64,
}

#[derive(Debug, Clone, Copy)]
struct ErrorCountCurve {
    /// At or above this aggregate MI the frame decodes without errors.
    threshold_mi: f64,
    knots: [CurveKnot; 4],
}

const fn knot(mi: f64, scale: f64, shape: f64, offset: f64) -> CurveKnot {
    CurveKnot {
        mi,
        scale,
        shape,
        offset,
    }
}

const fn curve(threshold_mi: f64, knots: [CurveKnot; 4]) -> ErrorCountCurve {
    ErrorCountCurve {
        threshold_mi,
        knots,
    }
}

impl ErrorCountCurve {
    fn interpolate(&self, mi: f64) -> CurveKnot {
        let first = self.knots[0];
        if mi <= first.mi {
            return first;
        }
        for pair in self.knots.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if mi <= b.mi {
                let t = (mi - a.mi) / (b.mi - a.mi);
                return knot(
                    mi,
                    a.scale + (b.scale - a.scale) * t,
                    a.shape + (b.shape - a.shape) * t,
                    a.offset + (b.offset - a.offset) * t,
                );
            }
        }
        self.knots[self.knots.len() - 1]
    }
}

fn constellation_index(constellation_size: u16) -> usize {
    match constellation_size {
        2 => 0,
        4 => 1,
        16 => 2,
        64 => 3,
        256 => 4,
        m => panic!("unsupported constellation size {}", m),
    }
}

/// Samples how many of the `packet_length_bits` bits are still wrong after
/// combining `copies`.
///
/// Panics on an unsupported constellation, on no copies at all and on more
/// than [`MAX_COMBINED_LINKS`] copies.
pub fn expected_error_count<R: Rng + ?Sized>(
    copies: &[LinkObservation],
    constellation_size: u16,
    spectral_efficiency: f64,
    packet_length_bits: usize,
    rng: &mut R,
) -> f64 {
    assert!(
        is_supported(constellation_size),
        "unsupported constellation size {}",
        constellation_size
    );
    assert!(
        !copies.is_empty() && copies.len() <= MAX_COMBINED_LINKS,
        "error count curves exist for 1 to {} links, got {}",
        MAX_COMBINED_LINKS,
        copies.len()
    );

    let observations: Vec<_> = copies
        .iter()
        .map(|c| c.with_mode(constellation_size, spectral_efficiency))
        .collect();
    let bers: Vec<f64> = copies
        .iter()
        .map(|c| per_to_ber(c.link_error_rate, packet_length_bits))
        .collect();
    let mi = aggregate_mutual_information(&observations, &bers);

    let curve = &CURVES[constellation_index(constellation_size)][copies.len() - 1];
    if mi >= curve.threshold_mi {
        return 0.0;
    }

    let params = curve.interpolate(mi);
    let weibull = Weibull::new(params.scale, params.shape)
        .expect("trained curve parameters are positive");
    let fraction = params.offset + weibull.sample(rng);

    let len = packet_length_bits as f64;
    (fraction * len).clamp(0.0, len)
}

#[rustfmt::skip]
const CURVES: [[ErrorCountCurve; MAX_COMBINED_LINKS]; 5] = [
    // M = 2
    [
        curve(0.90, [
            knot(0.200, 0.3000, 1.60, 0.0500),
            knot(0.450, 0.1800, 1.40, 0.0000),
            knot(0.700, 0.0800, 1.20, -0.0200),
            knot(0.900, 0.0200, 1.00, -0.0150),
        ]),
        curve(0.86, [
            knot(0.191, 0.2550, 1.60, 0.0500),
            knot(0.430, 0.1530, 1.40, 0.0000),
            knot(0.669, 0.0680, 1.20, -0.0200),
            knot(0.860, 0.0170, 1.00, -0.0150),
        ]),
        curve(0.83, [
            knot(0.184, 0.2250, 1.60, 0.0500),
            knot(0.415, 0.1350, 1.40, 0.0000),
            knot(0.646, 0.0600, 1.20, -0.0200),
            knot(0.830, 0.0150, 1.00, -0.0150),
        ]),
    ],
    // M = 4
    [
        curve(0.91, [
            knot(0.202, 0.3300, 1.65, 0.0500),
            knot(0.455, 0.1980, 1.45, 0.0000),
            knot(0.708, 0.0880, 1.25, -0.0200),
            knot(0.910, 0.0220, 1.05, -0.0150),
        ]),
        curve(0.87, [
            knot(0.193, 0.2805, 1.65, 0.0500),
            knot(0.435, 0.1683, 1.45, 0.0000),
            knot(0.677, 0.0748, 1.25, -0.0200),
            knot(0.870, 0.0187, 1.05, -0.0150),
        ]),
        curve(0.84, [
            knot(0.187, 0.2475, 1.65, 0.0500),
            knot(0.420, 0.1485, 1.45, 0.0000),
            knot(0.653, 0.0660, 1.25, -0.0200),
            knot(0.840, 0.0165, 1.05, -0.0150),
        ]),
    ],
    // M = 16
    [
        curve(0.92, [
            knot(0.204, 0.3600, 1.70, 0.0500),
            knot(0.460, 0.2160, 1.50, 0.0000),
            knot(0.716, 0.0960, 1.30, -0.0200),
            knot(0.920, 0.0240, 1.10, -0.0150),
        ]),
        curve(0.88, [
            knot(0.196, 0.3060, 1.70, 0.0500),
            knot(0.440, 0.1836, 1.50, 0.0000),
            knot(0.684, 0.0816, 1.30, -0.0200),
            knot(0.880, 0.0204, 1.10, -0.0150),
        ]),
        curve(0.85, [
            knot(0.189, 0.2700, 1.70, 0.0500),
            knot(0.425, 0.1620, 1.50, 0.0000),
            knot(0.661, 0.0720, 1.30, -0.0200),
            knot(0.850, 0.0180, 1.10, -0.0150),
        ]),
    ],
    // M = 64
    [
        curve(0.93, [
            knot(0.207, 0.3900, 1.75, 0.0500),
            knot(0.465, 0.2340, 1.55, 0.0000),
            knot(0.723, 0.1040, 1.35, -0.0200),
            knot(0.930, 0.0260, 1.15, -0.0150),
        ]),
        curve(0.89, [
            knot(0.198, 0.3315, 1.75, 0.0500),
            knot(0.445, 0.1989, 1.55, 0.0000),
            knot(0.692, 0.0884, 1.35, -0.0200),
            knot(0.890, 0.0221, 1.15, -0.0150),
        ]),
        curve(0.86, [
            knot(0.191, 0.2925, 1.75, 0.0500),
            knot(0.430, 0.1755, 1.55, 0.0000),
            knot(0.669, 0.0780, 1.35, -0.0200),
            knot(0.860, 0.0195, 1.15, -0.0150),
        ]),
    ],
    // M = 256
    [
        curve(0.94, [
            knot(0.209, 0.4200, 1.80, 0.0500),
            knot(0.470, 0.2520, 1.60, 0.0000),
            knot(0.731, 0.1120, 1.40, -0.0200),
            knot(0.940, 0.0280, 1.20, -0.0150),
        ]),
        curve(0.90, [
            knot(0.200, 0.3570, 1.80, 0.0500),
            knot(0.450, 0.2142, 1.60, 0.0000),
            knot(0.700, 0.0952, 1.40, -0.0200),
            knot(0.900, 0.0238, 1.20, -0.0150),
        ]),
        curve(0.87, [
            knot(0.193, 0.3150, 1.80, 0.0500),
            knot(0.435, 0.1890, 1.60, 0.0000),
            knot(0.677, 0.0840, 1.40, -0.0200),
            knot(0.870, 0.0210, 1.20, -0.0150),
        ]),
    ],
];

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn obs(snr_db: f64, link_error_rate: f64) -> LinkObservation {
        LinkObservation {
            snr_db,
            link_error_rate,
        }
    }

    #[test]
    fn test_curves_are_well_formed() {
        for row in CURVES.iter() {
            for c in row.iter() {
                for pair in c.knots.windows(2) {
                    assert!(pair[0].mi < pair[1].mi);
                }
                for k in c.knots.iter() {
                    assert!(k.scale > 0.0 && k.shape > 0.0);
                    assert!(k.mi <= c.threshold_mi);
                }
            }
        }
    }

    #[test]
    fn test_clean_link_has_no_errors() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = expected_error_count(&[obs(20.0, 1e-4)], 4, 1.5, 1000, &mut rng);
        assert_eq!(n, 0.0);
    }

    #[test]
    fn test_count_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for snr in [-10.0, -3.0, 0.0, 2.0] {
            for m in [2, 4, 16, 64, 256] {
                let n = expected_error_count(&[obs(snr, 0.9)], m, 2.0, 800, &mut rng);
                assert!((0.0..=800.0).contains(&n), "{} at {} dB", n, snr);
            }
        }
    }

    #[test]
    fn test_second_copy_clears_errors() {
        let mut rng = StdRng::seed_from_u64(3);
        let weak = obs(2.0, 0.9);

        let single: f64 = (0..200)
            .map(|_| expected_error_count(&[weak], 4, 1.5, 1000, &mut rng))
            .sum();
        assert!(single > 0.0);

        let combined = expected_error_count(&[weak, weak], 4, 1.5, 1000, &mut rng);
        assert_eq!(combined, 0.0);
    }

    #[test]
    #[should_panic]
    fn test_too_many_links() {
        let mut rng = StdRng::seed_from_u64(0);
        expected_error_count(&[obs(0.0, 0.5); 4], 4, 1.5, 1000, &mut rng);
    }

    #[test]
    #[should_panic]
    fn test_no_links() {
        let mut rng = StdRng::seed_from_u64(0);
        expected_error_count(&[], 4, 1.5, 1000, &mut rng);
    }
}
