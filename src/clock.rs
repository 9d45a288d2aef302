use std::time::Instant;

/// Source of sample timestamps, in seconds.
///
/// The producer reads it exactly once per accepted sample; the buffered and
/// the published copy of a sample carry the same value.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

/// Seconds elapsed since the clock was created.
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// The Lab Streaming Layer clock, so local and outward timestamps agree with
/// other LSL streams on the machine.
#[cfg(feature = "lsl")]
pub struct LslClock;

#[cfg(feature = "lsl")]
impl Clock for LslClock {
    fn now(&self) -> f64 {
        lsl::local_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        assert!(last >= 0.0);
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }
}
