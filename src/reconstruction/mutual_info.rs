//! Per-symbol mutual information of a copy as a function of its SNR.
//!
//! BPSK and QPSK use a closed form approximation of the J-function, the
//! higher order square QAM constellations a piecewise linear table of their
//! constrained capacity in 0.5 dB steps over [-35, 25] dB.

pub const SUPPORTED_CONSTELLATIONS: [u16; 5] = [2, 4, 16, 64, 256];

const TABLE_MIN_DB: f64 = -35.0;
const TABLE_STEP_DB: f64 = 0.5;
const TABLE_LEN: usize = 121;

// J-function fit, Brännström et al.
const J_H1: f64 = 0.3073;
const J_H2: f64 = 0.8935;
const J_H3: f64 = 1.1064;

pub fn is_supported(constellation_size: u16) -> bool {
    SUPPORTED_CONSTELLATIONS.contains(&constellation_size)
}

#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Mutual information between a BPSK symbol and its LLR with standard
/// deviation `sigma`.
fn j_function(sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    (1.0 - 2f64.powf(-J_H1 * sigma.powf(2.0 * J_H2))).powf(J_H3)
}

fn table_lookup(table: &[f64; TABLE_LEN], snr_db: f64) -> f64 {
    let pos = (snr_db - TABLE_MIN_DB) / TABLE_STEP_DB;
    if pos <= 0.0 {
        return table[0];
    }
    let idx = pos.floor() as usize;
    if idx >= TABLE_LEN - 1 {
        return table[TABLE_LEN - 1];
    }
    let frac = pos - idx as f64;
    table[idx] + (table[idx + 1] - table[idx]) * frac
}

/// Bits per symbol a copy received at `snr_db` can carry.
///
/// Panics on constellation sizes without an approximation.
pub fn symbol_mutual_information(snr_db: f64, constellation_size: u16) -> f64 {
    let snr = db_to_linear(snr_db);
    match constellation_size {
        2 => j_function((8.0 * snr).sqrt()),
        // two BPSK streams, each with half of the symbol energy
        4 => 2.0 * j_function((4.0 * snr).sqrt()),
        16 => table_lookup(&QAM16_MI, snr_db),
        64 => table_lookup(&QAM64_MI, snr_db),
        256 => table_lookup(&QAM256_MI, snr_db),
        m => panic!("unsupported constellation size {}", m),
    }
}

#[rustfmt::skip]
const QAM16_MI: [f64; TABLE_LEN] = [
    0.0005, 0.0005, 0.0006, 0.0006, 0.0007, 0.0008, 0.0009, 0.0010,
    0.0011, 0.0013, 0.0014, 0.0016, 0.0018, 0.0020, 0.0023, 0.0026,
    0.0029, 0.0032, 0.0036, 0.0041, 0.0046, 0.0051, 0.0057, 0.0064,
    0.0072, 0.0081, 0.0091, 0.0102, 0.0114, 0.0128, 0.0144, 0.0161,
    0.0180, 0.0202, 0.0227, 0.0254, 0.0285, 0.0319, 0.0358, 0.0401,
    0.0449, 0.0503, 0.0563, 0.0630, 0.0706, 0.0789, 0.0883, 0.0987,
    0.1103, 0.1232, 0.1375, 0.1534, 0.1711, 0.1906, 0.2122, 0.2361,
    0.2624, 0.2913, 0.3231, 0.3579, 0.3960, 0.4375, 0.4826, 0.5316,
    0.5844, 0.6414, 0.7025, 0.7679, 0.8376, 0.9115, 0.9897, 1.0721,
    1.1585, 1.2487, 1.3427, 1.4402, 1.5410, 1.6449, 1.7517, 1.8612,
    1.9732, 2.0874, 2.2036, 2.3217, 2.4413, 2.5621, 2.6837, 2.8056,
    2.9269, 3.0467, 3.1639, 3.2772, 3.3852, 3.4863, 3.5794, 3.6633,
    3.7371, 3.8003, 3.8530, 3.8955, 3.9285, 3.9532, 3.9708, 3.9827,
    3.9904, 3.9950, 3.9976, 3.9989, 3.9996, 3.9998, 3.9999, 4.0000,
    4.0000, 4.0000, 4.0000, 4.0000, 4.0000, 4.0000, 4.0000, 4.0000,
    4.0000,
];

#[rustfmt::skip]
const QAM64_MI: [f64; TABLE_LEN] = [
    0.0005, 0.0005, 0.0006, 0.0006, 0.0007, 0.0008, 0.0009, 0.0010,
    0.0011, 0.0013, 0.0014, 0.0016, 0.0018, 0.0020, 0.0023, 0.0026,
    0.0029, 0.0032, 0.0036, 0.0041, 0.0046, 0.0051, 0.0057, 0.0064,
    0.0072, 0.0081, 0.0091, 0.0102, 0.0114, 0.0128, 0.0144, 0.0161,
    0.0180, 0.0202, 0.0227, 0.0254, 0.0285, 0.0319, 0.0358, 0.0401,
    0.0449, 0.0503, 0.0563, 0.0630, 0.0706, 0.0789, 0.0883, 0.0987,
    0.1103, 0.1232, 0.1375, 0.1534, 0.1711, 0.1906, 0.2122, 0.2361,
    0.2624, 0.2913, 0.3231, 0.3580, 0.3961, 0.4376, 0.4828, 0.5318,
    0.5847, 0.6418, 0.7031, 0.7687, 0.8387, 0.9131, 0.9918, 1.0748,
    1.1620, 1.2532, 1.3484, 1.4474, 1.5500, 1.6560, 1.7652, 1.8775,
    1.9926, 2.1105, 2.2308, 2.3536, 2.4786, 2.6058, 2.7349, 2.8658,
    2.9985, 3.1328, 3.2686, 3.4058, 3.5442, 3.6839, 3.8246, 3.9662,
    4.1087, 4.2518, 4.3953, 4.5387, 4.6814, 4.8227, 4.9613, 5.0959,
    5.2250, 5.3469, 5.4601, 5.5631, 5.6547, 5.7343, 5.8015, 5.8565,
    5.9000, 5.9331, 5.9573, 5.9741, 5.9852, 5.9920, 5.9960, 5.9982,
    5.9992,
];

#[rustfmt::skip]
const QAM256_MI: [f64; TABLE_LEN] = [
    0.0005, 0.0005, 0.0006, 0.0006, 0.0007, 0.0008, 0.0009, 0.0010,
    0.0011, 0.0013, 0.0014, 0.0016, 0.0018, 0.0020, 0.0023, 0.0026,
    0.0029, 0.0032, 0.0036, 0.0041, 0.0046, 0.0051, 0.0057, 0.0064,
    0.0072, 0.0081, 0.0091, 0.0102, 0.0114, 0.0128, 0.0144, 0.0161,
    0.0180, 0.0202, 0.0227, 0.0254, 0.0285, 0.0319, 0.0358, 0.0401,
    0.0449, 0.0503, 0.0563, 0.0630, 0.0706, 0.0789, 0.0883, 0.0987,
    0.1103, 0.1232, 0.1375, 0.1534, 0.1711, 0.1906, 0.2122, 0.2361,
    0.2624, 0.2913, 0.3231, 0.3580, 0.3961, 0.4376, 0.4828, 0.5318,
    0.5848, 0.6419, 0.7033, 0.7689, 0.8390, 0.9134, 0.9922, 1.0753,
    1.1627, 1.2542, 1.3497, 1.4489, 1.5519, 1.6583, 1.7680, 1.8808,
    1.9966, 2.1151, 2.2363, 2.3599, 2.4859, 2.6141, 2.7444, 2.8766,
    3.0106, 3.1464, 3.2838, 3.4228, 3.5632, 3.7050, 3.8480, 3.9923,
    4.1377, 4.2842, 4.4316, 4.5800, 4.7293, 4.8794, 5.0302, 5.1818,
    5.3339, 5.4867, 5.6401, 5.7939, 5.9481, 6.1026, 6.2571, 6.4114,
    6.5649, 6.7167, 6.8658, 7.0108, 7.1501, 7.2820, 7.4047, 7.5167,
    7.6167,
];
