use std::time::Duration;

use flume::{Receiver, RecvTimeoutError};

/// Waits out a calibration window on the phase task.
///
/// `cancel` never carries data: it disconnects (or receives) when the engine
/// cancels the run, and the wait must return `false` as soon as it does.
pub trait PhaseTimer: Send + Sync {
    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool;
}

/// Real time windows, used outside of tests
#[derive(Debug, Clone, Default)]
pub struct ThreadTimer;

impl PhaseTimer for ThreadTimer {
    fn wait(&self, duration: Duration, cancel: &Receiver<()>) -> bool {
        matches!(
            cancel.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use std::time::Duration;

    use flume::{Receiver, Selector, Sender};

    use super::PhaseTimer;

    /// Timer whose windows elapse only when the test says so
    pub struct ManualTimer {
        ticks: Receiver<()>,
    }

    impl ManualTimer {
        pub fn new() -> (Self, Sender<()>) {
            let (tx, ticks) = flume::unbounded();
            (Self { ticks }, tx)
        }
    }

    impl PhaseTimer for ManualTimer {
        fn wait(&self, _duration: Duration, cancel: &Receiver<()>) -> bool {
            Selector::new()
                .recv(&self.ticks, |r| r.is_ok())
                .recv(cancel, |_| false)
                .wait()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_thread_timer_elapses() {
        let (_cancel_tx, cancel_rx) = flume::bounded::<()>(1);

        let start = Instant::now();
        assert!(ThreadTimer.wait(Duration::from_millis(20), &cancel_rx));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_thread_timer_cancelled_by_drop() {
        let (cancel_tx, cancel_rx) = flume::bounded::<()>(1);
        drop(cancel_tx);

        let start = Instant::now();
        assert!(!ThreadTimer.wait(Duration::from_secs(10), &cancel_rx));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_manual_timer() {
        let (timer, ticks) = manual::ManualTimer::new();
        let (cancel_tx, cancel_rx) = flume::bounded::<()>(1);

        ticks.send(()).unwrap();
        assert!(timer.wait(Duration::from_secs(100), &cancel_rx));

        drop(cancel_tx);
        assert!(!timer.wait(Duration::from_secs(100), &cancel_rx));
    }
}
