//! Per-socket inbound byte buffer
//!
//! The reader thread appends socket payloads; the owning socket drains them.
//! Consumed bytes are released from the front, so the buffer behaves like a
//! ring that grows on demand.

use bytes::{Buf, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Initial capacity of a socket buffer
const INITIAL_CAPACITY: usize = 1024;

pub struct ByteBuffer {
    data: Mutex<BytesMut>,
    grown: Condvar,
    closed: AtomicBool,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Mutex::new(BytesMut::with_capacity(capacity)),
            grown: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append bytes and wake any reader waiting for them
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut data = self.data.lock();
        data.extend_from_slice(bytes);
        self.grown.notify_all();
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.lock().capacity()
    }

    /// Copy and consume up to `dst.len()` bytes
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let mut data = self.data.lock();
        let count = dst.len().min(data.len());
        data.copy_to_slice(&mut dst[..count]);
        count
    }

    /// Drop everything buffered and wake waiting readers
    pub fn clear(&self) {
        let mut data = self.data.lock();
        data.clear();
        self.grown.notify_all();
    }

    /// Drop everything and end current and future waits at once
    pub fn close(&self) {
        let mut data = self.data.lock();
        self.closed.store(true, Ordering::SeqCst);
        data.clear();
        self.grown.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `size` bytes are buffered or `budget` elapses
    ///
    /// The buffer is re-checked at least every `poll`. A closed buffer ends
    /// the wait. Returns the number of bytes available when the wait ended.
    pub fn wait_for(&self, size: usize, poll: Duration, budget: Duration) -> usize {
        let deadline = Instant::now() + budget;
        let mut data = self.data.lock();
        loop {
            if data.len() >= size {
                return data.len();
            }
            let now = Instant::now();
            if now >= deadline || self.is_closed() {
                return data.len();
            }
            let slice = poll.min(deadline - now);
            self.grown.wait_for(&mut data, slice);
        }
    }
}
