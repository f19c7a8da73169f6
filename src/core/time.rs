use std::{
    ops::{Add, AddAssign, Sub},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::TimeDelta;

pub trait Clock {
    fn monotonic(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default)]
pub struct Instant {
    delta: TimeDelta,
}

impl Instant {
    pub fn from_elapsed(delta: TimeDelta) -> Self {
        Instant { delta }
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.delta
    }

    pub fn elapsed_seconds_f64(&self) -> f64 {
        TD(self.elapsed()).seconds()
    }

    pub fn duration_since(&self, other: &Instant) -> TimeDelta {
        self.delta - other.delta
    }
}

impl Add<TimeDelta> for Instant {
    type Output = Instant;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Instant {
            delta: self.delta + rhs,
        }
    }
}

impl AddAssign<TimeDelta> for Instant {
    fn add_assign(&mut self, rhs: TimeDelta) {
        self.delta += rhs;
    }
}

impl Sub<Instant> for Instant {
    type Output = TimeDelta;

    fn sub(self, rhs: Instant) -> Self::Output {
        self.duration_since(&rhs)
    }
}

/// Wall clock, monotonic time is measured from construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant {
            delta: TimeDelta::from_std(self.start.elapsed()).unwrap_or(TimeDelta::MAX),
        }
    }
}

/// Manually stepped clock. Clones share the same time base, so a test can keep
/// a handle while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    elapsed: Arc<Mutex<TimeDelta>>,
}

impl SimulatedClock {
    pub fn new(elapsed: TimeDelta) -> SimulatedClock {
        SimulatedClock {
            elapsed: Arc::new(Mutex::new(elapsed)),
        }
    }

    pub fn step(&self, delta: TimeDelta) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += delta;
    }
}

impl Clock for SimulatedClock {
    fn monotonic(&self) -> Instant {
        Instant {
            delta: *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

pub struct TD(pub TimeDelta);

impl TD {
    pub fn seconds(&self) -> f64 {
        self.0.num_seconds() as f64 + (self.0.subsec_nanos() as f64) / 1000000000.0
    }
}

pub fn sec_f64_to_delta(sec: f64) -> TimeDelta {
    TimeDelta::nanoseconds((sec * 1e9).round() as i64)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::default();
        let handle = clock.clone();

        handle.step(TimeDelta::milliseconds(1500));

        assert_relative_eq!(clock.monotonic().elapsed_seconds_f64(), 1.5);
    }

    #[test]
    fn test_duration_since() {
        let a = Instant::from_elapsed(TimeDelta::milliseconds(250));
        let b = a + sec_f64_to_delta(2.0);

        assert_eq!(b - a, TimeDelta::seconds(2));
        assert_relative_eq!(TD(b.duration_since(&a)).seconds(), 2.0);
    }

    #[test]
    fn test_subsecond_seconds() {
        assert_relative_eq!(TD(TimeDelta::milliseconds(500)).seconds(), 0.5);
        assert_relative_eq!(TD(TimeDelta::microseconds(2_000_100)).seconds(), 2.0001);
    }
}
