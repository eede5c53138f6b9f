use std::time::Duration;

/// A node's slot in a fixed TDMA frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdmaSchedule {
    slot_index: u16,
    slots_per_frame: u16,
    slot_duration: Duration,
}

impl TdmaSchedule {
    pub fn new(slot_index: u16, slots_per_frame: u16, slot_duration: Duration) -> Self {
        assert!(slot_index < slots_per_frame && !slot_duration.is_zero());
        Self {
            slot_index,
            slots_per_frame,
            slot_duration,
        }
    }

    fn frame_duration(&self) -> Duration {
        self.slot_duration * self.slots_per_frame as u32
    }

    /// Start and end of the own slot `now` is in, or of the next one.
    pub fn slot_bounds(&self, now: Duration) -> (Duration, Duration) {
        let frame = self.frame_duration().as_nanos();
        let frame_start = now.as_nanos() - now.as_nanos() % frame;
        let mut start = Duration::from_nanos(frame_start as u64)
            + self.slot_duration * self.slot_index as u32;
        if now >= start + self.slot_duration {
            start += self.frame_duration();
        }
        (start, start + self.slot_duration)
    }

    /// Earliest time at or after `now` a transmission of `airtime` fits
    /// into the own slot. Frames longer than a slot start at a slot
    /// boundary.
    pub fn next_opportunity(&self, now: Duration, airtime: Duration) -> Duration {
        let (start, end) = self.slot_bounds(now);
        if now >= start && (now + airtime <= end || now == start) {
            return now;
        }
        if now < start {
            return start;
        }
        start + self.frame_duration()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_slot_bounds() {
        let tdma = TdmaSchedule::new(1, 4, ms(10));
        assert_eq!(tdma.slot_bounds(ms(0)), (ms(10), ms(20)));
        assert_eq!(tdma.slot_bounds(ms(15)), (ms(10), ms(20)));
        assert_eq!(tdma.slot_bounds(ms(20)), (ms(50), ms(60)));
    }

    #[test]
    fn test_next_opportunity() {
        let tdma = TdmaSchedule::new(1, 4, ms(10));
        assert_eq!(tdma.next_opportunity(ms(3), ms(2)), ms(10));
        assert_eq!(tdma.next_opportunity(ms(12), ms(2)), ms(12));
        // does not fit into the rest of the slot
        assert_eq!(tdma.next_opportunity(ms(19), ms(2)), ms(50));
        assert_eq!(tdma.next_opportunity(ms(50), ms(30)), ms(50));
    }
}
