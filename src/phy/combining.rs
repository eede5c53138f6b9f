use std::time::Duration;

use coopmac_config::CombiningConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::TxMode;
use crate::frame::{Frame, FrameKey};
use crate::reconstruction::{AccumulatorPool, CopyObservation};

/// Soft combining state a PHY embeds. It keeps the corrupted copies of
/// frames and decides whether they decode together.
pub struct CombiningReceiver {
    pool: AccumulatorPool,
    config: CombiningConfig,
    rng: StdRng,
}

impl CombiningReceiver {
    pub fn new(config: CombiningConfig, seed: u64) -> Self {
        Self {
            pool: AccumulatorPool::new(config.max_pending),
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pool(&self) -> &AccumulatorPool {
        &self.pool
    }

    /// Returns whether copies of the frame were already stored. Copies too
    /// damaged to help are not kept.
    pub fn store_or_combine_copy(
        &mut self,
        frame: &Frame,
        snr_db: f64,
        link_error_rate: f64,
        mode: &TxMode,
        now: Duration,
    ) -> bool {
        self.pool.expire(now, self.config.pending_lifetime);
        let key = frame.key();
        if link_error_rate > self.config.max_usable_error_rate {
            log::debug!(
                "Ignoring copy of {} with error rate {:.3}",
                key,
                link_error_rate
            );
            return self.pool.get(&key).is_some();
        }

        let copy = CopyObservation {
            snr_db,
            link_error_rate,
            constellation_size: mode.constellation_size,
            spectral_efficiency: mode.spectral_efficiency,
        };
        self.pool.store_or_combine(key, copy, frame.payload(), now)
    }

    /// Error probability of the copies stored for `key`, `None` if there
    /// are none.
    pub fn combined_error_probability(&self, key: &FrameKey) -> Option<f64> {
        self.pool.get(key).map(|acc| acc.combined_error_probability())
    }

    /// Draws whether the stored copies decode. A decoded frame leaves the
    /// pool.
    pub fn attempt_reconstruction(&mut self, key: &FrameKey) -> bool {
        let Some(p) = self.combined_error_probability(key) else {
            return false;
        };
        let decoded = self.rng.gen::<f64>() >= p;
        log::debug!(
            "Reconstruction of {} (error probability {:.4}): {}",
            key,
            p,
            if decoded { "ok" } else { "failed" }
        );
        if decoded {
            self.pool.remove(key);
        }
        decoded
    }
}
