//! Residual error probability of soft combining that no amount of SNR
//! removes, given the bit error probability each copy already carries.

/// Enumeration is exponential in the number of copies.
pub const MAX_FLOOR_COPIES: usize = 16;

/// Sums the likelihood of every failure combination whose combined soft
/// decision is wrong or tied.
///
/// A copy whose bit survived votes `+(1 - p)` for the right value, a copy
/// whose bit flipped votes `-p` for the wrong one.
pub fn error_floor(bers: &[f64]) -> f64 {
    assert!(
        bers.len() <= MAX_FLOOR_COPIES,
        "error floor over {} copies is not supported",
        bers.len()
    );
    if bers.is_empty() {
        return 1.0;
    }
    if bers.iter().any(|&p| p <= 0.0) {
        return 0.0;
    }

    let n = bers.len();
    let mut floor = 0.0;
    for failed in 1u32..(1 << n) {
        let mut likelihood = 1.0;
        let mut soft = 0.0;
        for (i, &p) in bers.iter().enumerate() {
            if failed & (1 << i) != 0 {
                likelihood *= p;
                soft -= p;
            } else {
                likelihood *= 1.0 - p;
                soft += 1.0 - p;
            }
        }
        if soft <= 0.0 {
            floor += likelihood;
        }
    }
    floor
}
