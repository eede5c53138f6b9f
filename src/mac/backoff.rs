use std::time::Duration;

use coopmac_config::CsmaConfig;
use rand::Rng;

/// Binary exponential backoff with a frozen remainder across busy periods.
#[derive(Debug, Clone)]
pub struct Backoff {
    cw: u32,
    cw_min: u32,
    cw_max: u32,
    slot: Duration,
    remaining: Option<Duration>,
}

impl Backoff {
    pub fn new(config: &CsmaConfig) -> Self {
        Self {
            cw: config.cw_min,
            cw_min: config.cw_min,
            cw_max: config.cw_max,
            slot: config.slot_time,
            remaining: None,
        }
    }

    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    /// Time left to count down: a fresh draw of `[0, cw]` slots, or the frozen
    /// remainder rounded to whole slots.
    pub fn start<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let remaining = match self.remaining {
            Some(left) => {
                let slots = (left.as_secs_f64() / self.slot.as_secs_f64()).round() as u32;
                self.slot * slots
            }
            None => self.slot * rng.gen_range(0..=self.cw),
        };
        self.remaining = Some(remaining);
        remaining
    }

    /// The medium went busy `elapsed` into the countdown.
    pub fn freeze(&mut self, elapsed: Duration) {
        if let Some(left) = self.remaining {
            self.remaining = Some(left.saturating_sub(elapsed));
        }
    }

    /// The countdown ran out and the medium was granted.
    pub fn complete(&mut self) {
        self.remaining = None;
    }

    pub fn on_failure(&mut self) {
        self.cw = ((self.cw + 1) * 2 - 1).min(self.cw_max);
    }

    pub fn reset(&mut self) {
        self.cw = self.cw_min;
    }
}
