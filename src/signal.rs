//! Auto-reset wait handle
//!
//! A `Signal` is set by a producer and consumed by exactly one waiter.
//! Setting an already-set signal is a no-op; a successful wait clears it.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake any waiter
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Clear the signal without waiting
    pub fn reset(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Wait up to `timeout` for the signal
    ///
    /// Returns `true` (and clears the signal) if it was set in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *flag, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_signal_times_out_when_unset() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_signal_auto_resets() {
        let signal = Signal::new();
        signal.set();
        assert!(signal.is_set());
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_signal_wakes_waiter_from_other_thread() {
        let signal = Arc::new(Signal::new());
        let setter = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(signal.wait_timeout(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_reset_discards_pending_set() {
        let signal = Signal::new();
        signal.set();
        signal.reset();
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }
}
