//! Time source used by the pacers.
//!
//! Production code runs on [`SystemClock`]; tests swap in a manual clock to
//! drive arbitrary wake-up delay sequences without real sleeping.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic seconds since an arbitrary epoch.
    fn now(&self) -> f64;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(5));
        let b = clock.now();
        assert!(b - a >= 0.005);
    }
}
