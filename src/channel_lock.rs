//! Exclusive access to the command channel
//!
//! At most one thread may transact on the serial channel at a time. The lock
//! is re-entrant for the thread holding it: a scheduled operation runs with
//! the lock already held by the scheduler thread and still goes through the
//! engine for every command it sends.

use crate::constants::LOCK_POLL_MS;
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Default)]
pub struct ChannelLock {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

/// Holds the channel until dropped
#[must_use = "the channel is released as soon as the guard is dropped"]
pub struct ChannelGuard<'a> {
    lock: &'a ChannelLock,
}

impl ChannelLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the channel is ours
    ///
    /// Re-checks every `LOCK_POLL_MS` in addition to release wake-ups.
    pub fn grab(&self) -> ChannelGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((id, depth)) if *id == me => {
                    *depth += 1;
                    break;
                }
                Some(_) => {
                    self.released
                        .wait_for(&mut owner, Duration::from_millis(LOCK_POLL_MS));
                }
            }
        }
        ChannelGuard { lock: self }
    }

    /// Take the channel only if nobody else holds it
    pub fn try_grab(&self) -> Option<ChannelGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        match owner.as_mut() {
            None => *owner = Some((me, 1)),
            Some((id, depth)) if *id == me => *depth += 1,
            Some(_) => return None,
        }
        Some(ChannelGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        matches!(*self.owner.lock(), Some((id, _)) if id == me)
    }

    fn release(&self) {
        let mut owner = self.owner.lock();
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.released.notify_all();
            }
        }
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_channel_lock_reentrant_on_same_thread() {
        let lock = ChannelLock::new();
        let outer = lock.grab();
        let inner = lock.grab();
        assert!(lock.is_held_by_current_thread());
        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_channel_lock_try_grab_fails_for_other_thread() {
        let lock = Arc::new(ChannelLock::new());
        let _guard = lock.grab();
        let other = lock.clone();
        let got = std::thread::spawn(move || other.try_grab().is_some())
            .join()
            .unwrap();
        assert!(!got);
    }

    #[test]
    fn test_channel_lock_waiter_gets_channel_after_release() {
        let lock = Arc::new(ChannelLock::new());
        let guard = lock.grab();
        let other = lock.clone();
        let handle = std::thread::spawn(move || {
            let _g = other.grab();
            other.is_held_by_current_thread()
        });
        std::thread::sleep(Duration::from_millis(30));
        drop(guard);
        assert!(handle.join().unwrap());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_channel_lock_mutual_exclusion() {
        let lock = Arc::new(ChannelLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let inside = inside.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    let _g = lock.grab();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
