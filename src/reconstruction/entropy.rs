//! Binary entropy and the conversions between packet and bit error rates.

const BISECTION_STEPS: usize = 64;

pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

/// The bit error rate `p` in `[0, 0.5]` with `H(p) == h`, found by bisection.
pub fn inverse_binary_entropy(h: f64) -> f64 {
    if h <= 0.0 {
        return 0.0;
    }
    if h >= 1.0 {
        return 0.5;
    }

    let (mut lo, mut hi) = (0.0f64, 0.5f64);
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        if binary_entropy(mid) < h {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

/// Bit error rate of a packet of `len` bits that fails with probability
/// `per`, assuming independent bit errors. Capped at 0.5, beyond which a
/// bit carries no information.
pub fn per_to_ber(per: f64, len: usize) -> f64 {
    let per = per.clamp(0.0, 1.0);
    (1.0 - (1.0 - per).powf(1.0 / len as f64)).min(0.5)
}

pub fn ber_to_per(ber: f64, len: usize) -> f64 {
    let ber = ber.clamp(0.0, 1.0);
    1.0 - (1.0 - ber).powi(len as i32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_entropy_edges() {
        assert_eq!(binary_entropy(0.0), 0.0);
        assert_eq!(binary_entropy(1.0), 0.0);
        assert!((binary_entropy(0.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_entropy() {
        for p in [1e-6, 1e-3, 0.01, 0.11, 0.3, 0.49] {
            let back = inverse_binary_entropy(binary_entropy(p));
            assert!((back - p).abs() < 1e-9, "{} -> {}", p, back);
        }
        assert_eq!(inverse_binary_entropy(0.0), 0.0);
        assert_eq!(inverse_binary_entropy(1.5), 0.5);
    }

    #[test]
    fn test_per_ber_conversion() {
        let ber = per_to_ber(0.3, 1000);
        assert!((ber_to_per(ber, 1000) - 0.3).abs() < 1e-9);
        assert_eq!(per_to_ber(0.0, 1000), 0.0);
        assert_eq!(per_to_ber(1.0, 1000), 0.5);
    }
}
