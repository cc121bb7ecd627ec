//! Completion handle shared by a queued operation and its caller
//!
//! `channel()` returns the two halves: the caller keeps the [`Pending`], the
//! job keeps the [`Completer`]. Completion is fixed by the first call to
//! `complete`; later calls change nothing. A completer dropped without
//! completing (the scheduler stopped with the job still queued) completes
//! with an error so no caller waits forever.

use crate::error::{ModemError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot<T> {
    Waiting,
    Ready(Result<T>),
    Taken,
}

struct Completion<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Caller side of a scheduled operation
pub struct Pending<T> {
    shared: Arc<Completion<T>>,
}

/// Job side of a scheduled operation
pub struct Completer<T> {
    shared: Arc<Completion<T>>,
}

pub fn channel<T>() -> (Pending<T>, Completer<T>) {
    let shared = Arc::new(Completion {
        slot: Mutex::new(Slot::Waiting),
        done: Condvar::new(),
    });
    (
        Pending {
            shared: shared.clone(),
        },
        Completer { shared },
    )
}

impl<T> Completer<T> {
    /// Record the outcome; returns false if it was already recorded
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let mut slot = self.shared.slot.lock();
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        *slot = Slot::Ready(outcome);
        self.shared.done.notify_all();
        true
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.complete(Err(ModemError::NotReady {
            reason: "operation dropped before it ran",
        }));
    }
}

impl<T> Pending<T> {
    pub fn is_completed(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Waiting)
    }

    /// Wait up to `timeout` for completion without consuming the outcome
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        !matches!(*slot, Slot::Waiting)
    }

    /// Block until completion and return the outcome, error included
    pub fn end(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            self.shared.done.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Waiting | Slot::Taken => Err(ModemError::NotReady {
                reason: "operation outcome already taken",
            }),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_complete_is_idempotent() {
        let (pending, completer) = channel::<u32>();
        assert!(!pending.is_completed());
        assert!(completer.complete(Ok(1)));
        assert!(!completer.complete(Ok(2)));
        assert!(!completer.complete(Err(ModemError::TooManyOpenSockets)));
        assert!(pending.is_completed());
        assert_eq!(pending.end().unwrap(), 1);
    }

    #[test]
    fn test_pending_end_reraises_error() {
        let (pending, completer) = channel::<u32>();
        completer.complete(Err(ModemError::TooManyOpenSockets));
        assert!(matches!(pending.end(), Err(ModemError::TooManyOpenSockets)));
    }

    #[test]
    fn test_pending_end_blocks_until_completed() {
        let (pending, completer) = channel::<&'static str>();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            completer.complete(Ok("done"));
        });
        assert_eq!(pending.end().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn test_pending_wait_timeout() {
        let (pending, completer) = channel::<()>();
        assert!(!pending.wait_timeout(Duration::from_millis(20)));
        completer.complete(Ok(()));
        assert!(pending.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_dropped_completer_fails_pending() {
        let (pending, completer) = channel::<u8>();
        drop(completer);
        assert!(matches!(pending.end(), Err(ModemError::NotReady { .. })));
    }

    #[test]
    fn test_dropped_completer_keeps_earlier_outcome() {
        let (pending, completer) = channel::<u8>();
        completer.complete(Ok(9));
        drop(completer);
        assert_eq!(pending.end().unwrap(), 9);
    }
}
