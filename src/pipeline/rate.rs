use chrono::TimeDelta;

use crate::core::time::{Instant, TD};

/// Event rate over fixed, back to back windows.
///
/// The rate is recomputed as `count / elapsed` each time a window closes and
/// stays at that value until the next one closes. Before the first window
/// closes the rate is zero.
#[derive(Debug, Clone)]
pub struct RateCounter {
    window: TimeDelta,
    window_start: Instant,
    count: u64,
    rate_hz: f64,
}

impl RateCounter {
    pub fn new(window: TimeDelta, now: Instant) -> Self {
        Self {
            window,
            window_start: now,
            count: 0,
            rate_hz: 0.0,
        }
    }

    /// Counts one event at `now` and returns the current rate
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.count += 1;

        let elapsed = now - self.window_start;
        if elapsed >= self.window {
            self.rate_hz = self.count as f64 / TD(elapsed).seconds();
            self.window_start = now;
            self.count = 0;
        }

        self.rate_hz
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }
}
