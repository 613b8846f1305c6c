use std::time::Instant;

/// Monotonic seconds-since-start clock, mirroring Mallob's `Timer::elapsedSeconds()`.
///
/// All age-dependent calculations in the Job State Machine (demand growth,
/// temperature decay) are expressed in terms of this clock rather than wall
/// time, so they are unaffected by system clock adjustments.
#[derive(Debug, Clone)]
pub struct PlatformClock {
    start: Instant,
}

impl PlatformClock {
    /// Start a new clock anchored at the current instant.
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Seconds elapsed since this clock was started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for PlatformClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn elapsed_is_monotone() {
        let clock = PlatformClock::start();
        let first = clock.elapsed_secs();
        sleep(Duration::from_millis(5));
        let second = clock.elapsed_secs();
        assert!(second >= first);
    }
}
