//! TCP client socket over the modem's multiplexed IP stack

use super::{ConnectionStatus, SocketEntry};
use crate::constants::{
    CIPCLOSE_TIMEOUT_MS, CIPSEND_TIMEOUT_MS, CIPSTART_TIMEOUT_MS, SOCKET_ACCEPT_POLL_MS,
    SOCKET_RECEIVE_POLL_MS, SOCKET_STATUS_POLL_MS,
};
use crate::error::{ModemError, Result};
use crate::modem::ModemCore;
use crate::protocol::{prompts, Command};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One TCP connection
///
/// Dropping the socket disposes it: a quick close goes out without waiting
/// for the modem, and the handle returns to the pool.
///
/// ```ignore
/// let socket = modem.new_socket(false)?;
/// socket.connect("example.com", 80)?;
/// socket.send(b"GET / HTTP/1.0\r\n\r\n")?;
/// let mut buf = [0u8; 512];
/// let n = socket.receive(&mut buf)?;
/// ```
pub struct GprsSocket {
    entry: Arc<SocketEntry>,
    core: Arc<ModemCore>,
    disposed: AtomicBool,
}

impl GprsSocket {
    pub fn new(core: Arc<ModemCore>, protocol: Protocol, ssl: bool) -> Result<Self> {
        if protocol == Protocol::Udp {
            return Err(ModemError::ProtocolNotSupported { protocol: "UDP" });
        }
        let entry = core.sockets().allocate(ssl)?;
        Ok(Self {
            entry,
            core,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> usize {
        self.entry.handle()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.entry.status()
    }

    /// Bytes received and not read yet
    pub fn available(&self) -> usize {
        self.entry.buffer().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.entry.is_disposed()
    }

    /// Ask the modem to open the connection
    ///
    /// Returns once the modem accepted the command; the connection counts as
    /// up only when the modem reports `CONNECT OK` for this handle.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.ensure_live()?;
        let engine = self.core.engine();
        let _channel = engine.channel();

        let ssl = u8::from(self.entry.ssl());
        engine
            .execute(&format!("AT+CIPSSL={}", ssl))
            .into_result()?;

        let start = Command::new(format!(
            "AT+CIPSTART={},\"TCP\",\"{}\",{}",
            self.handle(),
            host,
            port
        ))
        .timeout_ms(CIPSTART_TIMEOUT_MS);
        engine.send(&start).into_result()?;
        debug!(handle = self.handle(), host, port, "connect requested");
        Ok(())
    }

    /// Send `data` and wait for the modem to accept it
    ///
    /// Returns the byte count the modem confirmed.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_live()?;
        if data.is_empty() {
            return Ok(0);
        }
        let handle = self.handle();
        let budget = self.core.config().timeouts.socket();
        let deadline = Instant::now() + budget;

        if !self.entry.wait_for_status(
            ConnectionStatus::Connected,
            Duration::from_millis(SOCKET_STATUS_POLL_MS),
            budget,
        ) {
            return Err(ModemError::NotConnected { handle });
        }

        let engine = self.core.engine();
        let _channel = engine.channel();

        let announce = Command::new(format!("AT+CIPSEND={},{}", handle, data.len()))
            .timeout_ms(CIPSEND_TIMEOUT_MS);
        let prompt = engine.send(&announce);
        if !prompt.is_ok() || !prompt.response.starts_with(prompts::SEND_PROMPT_BARE.as_bytes()) {
            warn!(handle, state = ?prompt.state, "no send prompt");
            return Err(ModemError::SendFailed { handle });
        }

        let _waiting = engine.sink().begin_wait();
        engine
            .write_chunked(data)
            .map_err(|source| ModemError::Link { source })?;

        let accepted = engine.wait_for(
            deadline,
            Duration::from_millis(SOCKET_ACCEPT_POLL_MS),
            |queue| match_send_outcome(queue, handle),
        );
        match accepted {
            Some(Some(count)) => {
                debug!(handle, count, "data accepted");
                Ok(count)
            }
            Some(None) => {
                warn!(handle, "send failed");
                Err(ModemError::SendFailed { handle })
            }
            None => {
                warn!(handle, ?budget, "no data accept");
                Err(ModemError::SendFailed { handle })
            }
        }
    }

    /// Copy received bytes into `buf`
    ///
    /// Waits until `buf.len()` bytes are buffered or the socket budget
    /// elapses, then hands over whatever is there.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        self.entry.buffer().wait_for(
            buf.len(),
            Duration::from_millis(SOCKET_RECEIVE_POLL_MS),
            self.core.config().timeouts.socket(),
        );
        self.ensure_live()?;
        Ok(self.entry.buffer().read_into(buf))
    }

    /// Ask the modem to close the connection
    ///
    /// The handle is freed when the modem reports `CLOSE OK`.
    pub fn close(&self) -> Result<()> {
        self.ensure_live()?;
        let close = Command::new(format!("AT+CIPCLOSE={}", self.handle()))
            .timeout_ms(CIPCLOSE_TIMEOUT_MS);
        self.core.engine().send(&close).into_result()?;
        Ok(())
    }

    /// Quick-close and free the handle; safe to call more than once
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.entry.is_disposed() {
            let reply = self
                .core
                .engine()
                .send_quick(&format!("AT+CIPCLOSE={},0", self.handle()));
            debug!(handle = self.handle(), state = ?reply.state, "quick close");
        }
        self.core.sockets().release(&self.entry);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ModemError::SocketDisposed {
                handle: self.handle(),
            });
        }
        Ok(())
    }
}

impl Drop for GprsSocket {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// `Some(Some(n))` on `DATA ACCEPT:<handle>,<n>`, `Some(None)` on `ERROR`
/// or `<handle>, SEND FAIL`
fn match_send_outcome(queue: &mut VecDeque<Bytes>, handle: usize) -> Option<Option<usize>> {
    let accept = format!("{}{},", prompts::DATA_ACCEPT, handle);
    let failed = format!("{}, {}", handle, prompts::SEND_FAIL);
    let index = queue.iter().position(|t| {
        t.starts_with(accept.as_bytes())
            || &t[..] == prompts::ERROR.as_bytes()
            || &t[..] == failed.as_bytes()
    })?;
    let token = queue.remove(index)?;
    let count = token
        .strip_prefix(accept.as_bytes())
        .and_then(|rest| std::str::from_utf8(rest).ok())
        .and_then(|rest| rest.trim().parse().ok());
    Some(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(tokens: &[&'static str]) -> VecDeque<Bytes> {
        tokens.iter().map(|t| Bytes::from_static(t.as_bytes())).collect()
    }

    #[test]
    fn test_send_outcome_accept() {
        let mut q = queue(&["+CREG: 1", "DATA ACCEPT:2,5"]);
        assert_eq!(match_send_outcome(&mut q, 2), Some(Some(5)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_send_outcome_other_handle_ignored() {
        let mut q = queue(&["DATA ACCEPT:1,5"]);
        assert_eq!(match_send_outcome(&mut q, 2), None);
    }

    #[test]
    fn test_send_outcome_other_handle_failure_ignored() {
        let mut q = queue(&["1, SEND FAIL", "DATA ACCEPT:2,5"]);
        assert_eq!(match_send_outcome(&mut q, 2), Some(Some(5)));
        assert_eq!(q.len(), 1);

        let mut q = queue(&["1, SEND FAIL"]);
        assert_eq!(match_send_outcome(&mut q, 2), None);
    }

    #[test]
    fn test_send_outcome_failures() {
        let mut q = queue(&["2, SEND FAIL"]);
        assert_eq!(match_send_outcome(&mut q, 2), Some(None));
        let mut q = queue(&["ERROR"]);
        assert_eq!(match_send_outcome(&mut q, 2), Some(None));
    }
}
