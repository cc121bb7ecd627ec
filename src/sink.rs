//! Response sink: ordered queue of decoded tokens
//!
//! The demultiplexer pushes every complete line or payload here. Two
//! consumers drain it: a transaction waiting for its terminal token, and the
//! line classifier picking up unsolicited events. Each push wakes the one
//! that should look: the waiting transaction if there is one, otherwise the
//! classifier.

use crate::signal::Signal;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
pub struct ResponseSink {
    queue: Mutex<VecDeque<Bytes>>,
    waiting: AtomicBool,
    response_ready: Signal,
    prompt_available: Signal,
}

/// Marks a transaction as waiting for as long as it lives
///
/// Dropping it clears the waiting flag and hands any leftover tokens to the
/// classifier.
pub struct WaitGuard<'a> {
    sink: &'a ResponseSink,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let queue = self.sink.queue.lock();
        self.sink.waiting.store(false, Ordering::SeqCst);
        let leftovers = !queue.is_empty();
        drop(queue);
        if leftovers {
            self.sink.prompt_available.set();
        }
    }
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token and wake the consumer in charge
    pub fn push(&self, token: Bytes) {
        debug!(token = %String::from_utf8_lossy(&token), "rx");
        let mut queue = self.queue.lock();
        queue.push_back(token);
        let waiting = self.waiting.load(Ordering::SeqCst);
        drop(queue);
        if waiting {
            self.response_ready.set();
        } else {
            self.prompt_available.set();
        }
    }

    /// Arm the response signal and flag a waiting transaction
    ///
    /// The flag only changes under the queue lock, so the classifier sees
    /// it and the queue in one consistent state.
    pub fn begin_wait(&self) -> WaitGuard<'_> {
        let queue = self.queue.lock();
        self.response_ready.reset();
        self.waiting.store(true, Ordering::SeqCst);
        drop(queue);
        WaitGuard { sink: self }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for a push made while a transaction is waiting
    pub fn wait_response(&self, timeout: Duration) -> bool {
        self.response_ready.wait_timeout(timeout)
    }

    /// Wait for a push made while nobody is waiting
    pub fn wait_prompt(&self, timeout: Duration) -> bool {
        self.prompt_available.wait_timeout(timeout)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn pop_front(&self) -> Option<Bytes> {
        self.queue.lock().pop_front()
    }

    /// Next token for the classifier
    ///
    /// While a transaction waits, only the oldest token matching
    /// `unsolicited` is handed out; otherwise the oldest token. The flag is
    /// checked and the token removed under one lock.
    pub fn next_for_classifier(&self, unsolicited: impl Fn(&[u8]) -> bool) -> Option<Bytes> {
        let mut queue = self.queue.lock();
        if self.waiting.load(Ordering::SeqCst) {
            let index = queue.iter().position(|t| unsolicited(&t[..]))?;
            queue.remove(index)
        } else {
            queue.pop_front()
        }
    }

    /// Remove the oldest token matching `pred`
    pub fn take_first(&self, pred: impl Fn(&[u8]) -> bool) -> Option<Bytes> {
        let mut queue = self.queue.lock();
        let index = queue.iter().position(|t| pred(&t[..]))?;
        queue.remove(index)
    }

    /// Run `f` on the queue under a single lock
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut VecDeque<Bytes>) -> R) -> R {
        f(&mut self.queue.lock())
    }

    /// Copy of the queued tokens, oldest first
    pub fn snapshot(&self) -> Vec<Bytes> {
        self.queue.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_push_signals_prompt_when_idle() {
        let sink = ResponseSink::new();
        sink.push(Bytes::from_static(b"+CREG: 1"));
        assert!(sink.wait_prompt(Duration::from_millis(1)));
        assert!(!sink.wait_response(Duration::from_millis(1)));
    }

    #[test]
    fn test_sink_push_signals_response_when_waiting() {
        let sink = ResponseSink::new();
        let guard = sink.begin_wait();
        sink.push(Bytes::from_static(b"OK"));
        assert!(sink.wait_response(Duration::from_millis(1)));
        assert!(!sink.wait_prompt(Duration::from_millis(1)));
        drop(guard);
        assert!(!sink.is_waiting());
    }

    #[test]
    fn test_sink_wait_guard_hands_leftovers_to_classifier() {
        let sink = ResponseSink::new();
        {
            let _guard = sink.begin_wait();
            sink.push(Bytes::from_static(b"+CMTI: \"SM\",3"));
        }
        assert!(sink.wait_prompt(Duration::from_millis(1)));
    }

    #[test]
    fn test_sink_take_first_keeps_order_of_others() {
        let sink = ResponseSink::new();
        sink.push(Bytes::from_static(b"a"));
        sink.push(Bytes::from_static(b"OK"));
        sink.push(Bytes::from_static(b"b"));

        let taken = sink.take_first(|t| t == b"OK");
        assert_eq!(taken.as_deref(), Some(&b"OK"[..]));
        assert_eq!(
            sink.snapshot(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
        );
        assert!(sink.take_first(|t| t == b"OK").is_none());
    }

    #[test]
    fn test_sink_next_for_classifier_respects_waiter() {
        let sink = ResponseSink::new();
        let guard = sink.begin_wait();
        sink.push(Bytes::from_static(b"OK"));
        sink.push(Bytes::from_static(b"+CMTI: \"SM\",1"));

        let is_cmti = |t: &[u8]| t.starts_with(b"+CMTI");
        assert_eq!(
            sink.next_for_classifier(is_cmti).as_deref(),
            Some(&b"+CMTI: \"SM\",1"[..])
        );
        assert!(sink.next_for_classifier(is_cmti).is_none());

        drop(guard);
        assert_eq!(sink.next_for_classifier(is_cmti).as_deref(), Some(&b"OK"[..]));
    }

    #[test]
    fn test_sink_classifier_never_steals_reply() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let sink = Arc::new(ResponseSink::new());
        let stop = Arc::new(AtomicBool::new(false));
        let stolen = Arc::new(AtomicUsize::new(0));
        let classifier = {
            let sink = sink.clone();
            let stop = stop.clone();
            let stolen = stolen.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if let Some(t) = sink.next_for_classifier(|t| t.starts_with(b"+CREG")) {
                        if &t[..] == b"OK" {
                            stolen.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        };

        for _ in 0..500 {
            let _guard = sink.begin_wait();
            sink.push(Bytes::from_static(b"+CREG: 1"));
            sink.push(Bytes::from_static(b"OK"));
            assert!(sink.take_first(|t| t == b"OK").is_some());
        }
        stop.store(true, Ordering::SeqCst);
        classifier.join().unwrap();
        assert_eq!(stolen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sink_pop_front_is_fifo() {
        let sink = ResponseSink::new();
        sink.push(Bytes::from_static(b"first"));
        sink.push(Bytes::from_static(b"second"));
        assert_eq!(sink.pop_front().as_deref(), Some(&b"first"[..]));
        assert_eq!(sink.len(), 1);
        sink.clear();
        assert!(sink.is_empty());
    }
}
