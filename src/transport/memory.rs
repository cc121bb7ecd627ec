//! In-memory link for tests and demos
//!
//! Inbound bytes are queued as bursts, exactly as a UART read would hand
//! them over. An optional responder sees every write and may answer with
//! bursts of its own, which makes it easy to script a modem:
//!
//! ```ignore
//! let link = MemoryLink::new();
//! link.respond_with(|written| match written {
//!     b"AT+CSQ\r" => vec![b"\r\n+CSQ: 20,0\r\n\r\nOK\r\n".to_vec()],
//!     _ => vec![b"\r\nOK\r\n".to_vec()],
//! });
//! ```

use super::Link;
use crate::constants::READ_TIMEOUT_MS;
use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
pub struct MemoryLink {
    inbound: Mutex<VecDeque<Bytes>>,
    arrived: Condvar,
    written: Mutex<Vec<Bytes>>,
    responder: Mutex<Option<Responder>>,
    disconnected: AtomicBool,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one inbound burst
    pub fn inject(&self, burst: impl AsRef<[u8]>) {
        let burst = burst.as_ref();
        if burst.is_empty() {
            return;
        }
        self.inbound.lock().push_back(Bytes::copy_from_slice(burst));
        self.arrived.notify_all();
    }

    /// Answer every write with the bursts `f` returns
    pub fn respond_with(&self, f: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) {
        *self.responder.lock() = Some(Box::new(f));
    }

    /// Make reads return zero bytes from now on, like an unplugged port
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.arrived.notify_all();
    }

    /// Every write so far, one entry per write call
    pub fn writes(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// Every written byte so far
    pub fn written(&self) -> Bytes {
        let written = self.written.lock();
        let mut all = BytesMut::new();
        for chunk in written.iter() {
            all.extend_from_slice(chunk);
        }
        all.freeze()
    }

    /// Every written byte so far as text
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }
}

impl Link for MemoryLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut inbound = self.inbound.lock();
        if inbound.is_empty() {
            self.arrived
                .wait_for(&mut inbound, Duration::from_millis(READ_TIMEOUT_MS));
        }
        let Some(mut burst) = inbound.pop_front() else {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        };
        let count = burst.len().min(buf.len());
        buf[..count].copy_from_slice(&burst.split_to(count));
        if !burst.is_empty() {
            inbound.push_front(burst);
        }
        Ok(count)
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.written.lock().push(Bytes::copy_from_slice(data));
        let replies = match self.responder.lock().as_mut() {
            Some(respond) => respond(data),
            None => Vec::new(),
        };
        for burst in replies {
            self.inject(burst);
        }
        Ok(())
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        Ok(self.inbound.lock().iter().map(Bytes::len).sum())
    }

    fn clear_input(&self) -> io::Result<()> {
        self.inbound.lock().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
