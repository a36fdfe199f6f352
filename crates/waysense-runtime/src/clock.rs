//! Monotonic millisecond clock shared by every guidance task.

use std::time::Duration;

use tokio::time::Instant;
use waysense_types::Millis;

/// Milliseconds since the guidance core started.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }

    /// The instant `at` corresponds to, for `sleep_until`.
    pub fn instant_at(&self, at: Millis) -> Instant {
        self.origin + Duration::from_millis(at)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_monotonic_and_maps_back_to_instants() {
        let clock = MonotonicClock::start();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now();
        assert!(b >= a + 5);
        assert_eq!(clock.instant_at(b) - clock.instant_at(a), Duration::from_millis(b - a));
        assert!(clock.instant_at(0) <= Instant::now());
    }
}
