use std::hint;
use std::thread;
use std::time::Duration;

/// Adaptive backoff for worker-side waiting.
///
/// A three-tier ladder: PAUSE-hint spinning, then scheduler yields, then
/// bounded parks. `snooze` walks the whole ladder, so an idle worker loop
/// can lean on it alone and ends up sleeping in [`Self::PARK_INTERVAL`]
/// slices instead of burning the core. Callers that must stay on-CPU
/// (publishing into a ring mid-reduction) bail out when `is_parking`
/// reports the ladder has reached the park tier.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    /// How long one park-tier snooze sleeps. Bounds the latency of
    /// noticing new work or a shutdown flag while idle.
    pub const PARK_INTERVAL: Duration = Duration::from_micros(50);

    #[inline]
    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Busy-spin with exponentially more PAUSE hints per call.
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..(1u32 << self.step.min(Self::SPIN_LIMIT)) {
            hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// One rung of the ladder: spin while cheap, yield the scheduler once
    /// spinning stops paying, park once yielding stops paying.
    #[inline]
    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            self.spin();
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
            self.step += 1;
        } else {
            thread::sleep(Self::PARK_INTERVAL);
        }
    }

    /// True once `snooze` has escalated to bounded parks.
    #[inline]
    pub fn is_parking(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn escalates_through_the_ladder_and_resets() {
        let mut b = Backoff::new();
        assert!(!b.is_parking());

        while !b.is_parking() {
            b.snooze();
        }

        // Park-tier snoozes actually sleep.
        let start = Instant::now();
        b.snooze();
        assert!(start.elapsed() >= Backoff::PARK_INTERVAL);

        b.reset();
        assert!(!b.is_parking());
    }

    #[test]
    fn spinning_alone_never_reaches_the_park_tier() {
        let mut b = Backoff::new();
        for _ in 0..100 {
            b.spin();
        }
        assert!(!b.is_parking());
    }
}
