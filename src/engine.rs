//! Transaction engine: one AT command in, one terminal token out
//!
//! A transaction owns the command channel from the first written byte until
//! its terminal token is matched or its budget runs out. Only the tokens it
//! matches leave the response sink; anything else stays for the classifier.
//!
//! Transactions never fail with an error. They report a [`ReturnedState`],
//! and a stuck command degrades to `NoReply` after its budget.

use crate::channel_lock::{ChannelGuard, ChannelLock};
use crate::constants::{RESPONSE_POLL_MS, WRITE_CHUNK_SIZE};
use crate::protocol::{prompts, AtResponse, Command, ReturnedState};
use crate::sink::ResponseSink;
use crate::state::{DeviceState, PowerStatus};
use crate::transport::Link;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Engine {
    link: Arc<dyn Link>,
    sink: Arc<ResponseSink>,
    lock: Arc<ChannelLock>,
    state: Arc<DeviceState>,
    default_timeout: Duration,
}

impl Engine {
    pub fn new(
        link: Arc<dyn Link>,
        sink: Arc<ResponseSink>,
        lock: Arc<ChannelLock>,
        state: Arc<DeviceState>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            link,
            sink,
            lock,
            state,
            default_timeout,
        }
    }

    /// Run one transaction
    pub fn send(&self, command: &Command) -> AtResponse {
        if self.state.power() == PowerStatus::Off && !command.is_power_command() {
            debug!(command = command.text(), "refused, device is off");
            return AtResponse::from_state(ReturnedState::DeviceIsOff);
        }

        let _channel = self.lock.grab();
        let waiting = command.expects_reply().then(|| self.sink.begin_wait());

        debug!(command = command.text(), "tx");
        if let Err(e) = self.write_chunked(command.wire().as_bytes()) {
            warn!(command = command.text(), error = %e, "write failed");
            return AtResponse::from_state(ReturnedState::Error);
        }
        if waiting.is_none() {
            return AtResponse::from_state(ReturnedState::Ok);
        }

        let budget = command.timeout().unwrap_or(self.default_timeout);
        let deadline = Instant::now() + budget;
        let cadence = Duration::from_millis(RESPONSE_POLL_MS);
        match self.wait_for(deadline, cadence, |queue| match_terminal(queue, command)) {
            Some(reply) => {
                debug!(command = command.text(), state = ?reply.state, "reply");
                reply
            }
            None => {
                debug!(command = command.text(), ?budget, "no reply");
                AtResponse::from_state(ReturnedState::NoReply)
            }
        }
    }

    /// Send `text` and wait for a terminal token with the default budget
    pub fn execute(&self, text: &str) -> AtResponse {
        self.send(&Command::new(text))
    }

    /// Send `text` and capture the data line preceding `OK`
    pub fn query(&self, text: &str, timeout_ms: u64) -> AtResponse {
        self.send(&Command::new(text).raw().timeout_ms(timeout_ms))
    }

    /// Send `text` without waiting for anything
    pub fn send_quick(&self, text: &str) -> AtResponse {
        self.send(&Command::new(text).no_reply())
    }

    /// Poll the sink under one lock per check until `matcher` finds something
    ///
    /// The caller must hold a [`WaitGuard`](crate::sink::WaitGuard) so pushes
    /// wake this wait instead of the classifier. The sink is checked before
    /// the first wait and then at least every `cadence`.
    pub fn wait_for<T>(
        &self,
        deadline: Instant,
        cadence: Duration,
        mut matcher: impl FnMut(&mut VecDeque<Bytes>) -> Option<T>,
    ) -> Option<T> {
        loop {
            if let Some(found) = self.sink.with_queue(&mut matcher) {
                return Some(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.sink.wait_response(cadence.min(deadline - now));
        }
    }

    /// Write raw bytes in chunks the modem UART accepts
    pub fn write_chunked(&self, data: &[u8]) -> io::Result<()> {
        for chunk in data.chunks(WRITE_CHUNK_SIZE) {
            self.link.write_all(chunk)?;
        }
        Ok(())
    }

    /// Hold the channel across several transactions
    pub fn channel(&self) -> ChannelGuard<'_> {
        self.lock.grab()
    }

    pub fn sink(&self) -> &ResponseSink {
        &self.sink
    }

    pub fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// Find and remove the terminal token for `command`
///
/// First match wins, in this order: `OK` (taking the line before it for raw
/// commands), `CONNECT`, `ERROR`, the send prompts, `DOWNLOAD`, an address
/// for the address query, `+CME ERROR`.
fn match_terminal(queue: &mut VecDeque<Bytes>, command: &Command) -> Option<AtResponse> {
    if let Some(index) = find(queue, |t| t == prompts::OK.as_bytes()) {
        queue.remove(index);
        if command.captures_response() && index >= 1 {
            let data = queue.remove(index - 1).unwrap_or_default();
            return Some(AtResponse::new(ReturnedState::Ok, data));
        }
        return Some(AtResponse::from_state(ReturnedState::Ok));
    }

    if let Some(token) = take(queue, |t| t == prompts::CONNECT.as_bytes()) {
        return Some(AtResponse::new(ReturnedState::Ok, token));
    }
    if take(queue, |t| t == prompts::ERROR.as_bytes()).is_some() {
        return Some(AtResponse::from_state(ReturnedState::Error));
    }
    for prompt in [
        prompts::SEND_PROMPT,
        prompts::SEND_PROMPT_BARE,
        prompts::DOWNLOAD,
    ] {
        if let Some(token) = take(queue, |t| t == prompt.as_bytes()) {
            return Some(AtResponse::new(ReturnedState::Ok, token));
        }
    }

    if command.is_address_query() {
        let is_address =
            |t: &[u8]| std::str::from_utf8(t).is_ok_and(prompts::looks_like_ip_address);
        if let Some(token) = take(queue, is_address) {
            return Some(AtResponse::new(ReturnedState::Ok, token));
        }
    }

    let cme = prompts::CME_ERROR.as_bytes();
    if let Some(token) = take(queue, |t| t.starts_with(cme)) {
        return Some(AtResponse::new(
            ReturnedState::Error,
            token.slice(cme.len()..),
        ));
    }

    None
}

fn find(queue: &VecDeque<Bytes>, pred: impl Fn(&[u8]) -> bool) -> Option<usize> {
    queue.iter().position(|t| pred(&t[..]))
}

fn take(queue: &mut VecDeque<Bytes>, pred: impl Fn(&[u8]) -> bool) -> Option<Bytes> {
    let index = find(queue, pred)?;
    queue.remove(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::transport::MemoryLink;

    struct Fixture {
        link: Arc<MemoryLink>,
        sink: Arc<ResponseSink>,
        state: Arc<DeviceState>,
        engine: Engine,
    }

    /// Engine whose link answers writes straight into the sink
    fn fixture(reply: impl Fn(&str) -> Vec<&'static str> + Send + Sync + 'static) -> Fixture {
        let link = Arc::new(MemoryLink::new());
        let sink = Arc::new(ResponseSink::new());
        let state = Arc::new(DeviceState::new(Arc::new(EventBus::new())));
        let lock = Arc::new(ChannelLock::new());

        let pusher = sink.clone();
        link.respond_with(move |written| {
            for token in reply(&String::from_utf8_lossy(written)) {
                pusher.push(Bytes::from_static(token.as_bytes()));
            }
            Vec::new()
        });

        let engine = Engine::new(
            link.clone(),
            sink.clone(),
            lock,
            state.clone(),
            Duration::from_millis(300),
        );
        Fixture {
            link,
            sink,
            state,
            engine,
        }
    }

    fn queue(tokens: &[&'static str]) -> VecDeque<Bytes> {
        tokens.iter().map(|t| Bytes::from_static(t.as_bytes())).collect()
    }

    #[test]
    fn test_engine_ok_reply() {
        let f = fixture(|_| vec!["OK"]);
        let reply = f.engine.execute("AT");
        assert_eq!(reply.state, ReturnedState::Ok);
        assert!(reply.response.is_empty());
        assert_eq!(f.link.written_text(), "AT\r");
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_engine_raw_captures_line_before_ok() {
        let f = fixture(|_| vec!["foo", "OK"]);
        let reply = f.engine.query("AT+GSN", 500);
        assert_eq!(reply.state, ReturnedState::Ok);
        assert_eq!(reply.text(), "foo");
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_engine_raw_without_data_line() {
        let f = fixture(|_| vec!["OK"]);
        let reply = f.engine.query("AT+CSQ", 500);
        assert_eq!(reply.state, ReturnedState::Ok);
        assert!(reply.response.is_empty());
    }

    #[test]
    fn test_engine_error_and_cme_error() {
        let f = fixture(|_| vec!["ERROR"]);
        assert_eq!(f.engine.execute("AT+BAD").state, ReturnedState::Error);

        let f = fixture(|_| vec!["+CME ERROR: SIM not inserted"]);
        let reply = f.engine.execute("AT+CPIN?");
        assert_eq!(reply.state, ReturnedState::Error);
        assert_eq!(reply.text(), "SIM not inserted");
    }

    #[test]
    fn test_engine_no_reply_after_budget() {
        let f = fixture(|_| Vec::new());
        let start = Instant::now();
        let reply = f.engine.send(&Command::new("AT").timeout_ms(150));
        assert_eq!(reply.state, ReturnedState::NoReply);
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(!f.sink.is_waiting());
    }

    #[test]
    fn test_engine_quick_send_does_not_wait() {
        let f = fixture(|_| Vec::new());
        let reply = f.engine.send_quick("AT+CIPCLOSE=0,0");
        assert_eq!(reply.state, ReturnedState::Ok);
        assert_eq!(f.link.written_text(), "AT+CIPCLOSE=0,0\r");
    }

    #[test]
    fn test_engine_refuses_when_off() {
        let f = fixture(|_| vec!["OK"]);
        f.state.set_power(PowerStatus::Off);
        assert_eq!(f.engine.execute("AT+CSQ").state, ReturnedState::DeviceIsOff);
        assert!(f.link.writes().is_empty());

        assert_eq!(f.engine.execute("AT+CFUN=1").state, ReturnedState::Ok);
    }

    #[test]
    fn test_engine_long_command_written_in_chunks() {
        let f = fixture(|_| Vec::new());
        let long = format!("AT+HTTPPARA=\"URL\",\"http://example.com/{}\"", "x".repeat(100));
        f.engine.send_quick(&long);
        let writes = f.link.writes();
        assert!(writes.len() >= 3);
        assert!(writes.iter().all(|w| w.len() <= WRITE_CHUNK_SIZE));
        assert_eq!(f.link.written_text(), format!("{}\r", long));
    }

    #[test]
    fn test_engine_leaves_unrelated_tokens() {
        let f = fixture(|_| vec!["+CMTI: \"SM\",2", "OK"]);
        let reply = f.engine.execute("AT");
        assert!(reply.is_ok());
        assert_eq!(f.sink.snapshot(), vec![Bytes::from_static(b"+CMTI: \"SM\",2")]);
    }

    #[test]
    fn test_engine_wait_for_custom_matcher() {
        let f = fixture(|_| Vec::new());
        let _waiting = f.sink.begin_wait();
        let pusher = f.sink.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            pusher.push(Bytes::from_static(b"DATA ACCEPT:0,5"));
        });
        let found = f.engine.wait_for(
            Instant::now() + Duration::from_secs(2),
            Duration::from_millis(100),
            |q| take(q, |t| t.starts_with(b"DATA ACCEPT:")),
        );
        assert_eq!(found.as_deref(), Some(&b"DATA ACCEPT:0,5"[..]));
        handle.join().unwrap();
    }

    #[test]
    fn test_match_terminal_order() {
        let cmd = Command::new("AT");
        let mut q = queue(&["ERROR", "OK"]);
        assert_eq!(match_terminal(&mut q, &cmd).unwrap().state, ReturnedState::Ok);
        assert_eq!(q, queue(&["ERROR"]));

        let mut q = queue(&["> "]);
        assert_eq!(match_terminal(&mut q, &cmd).unwrap().text(), "> ");

        let mut q = queue(&["DOWNLOAD"]);
        assert!(match_terminal(&mut q, &cmd).unwrap().is_ok());

        let mut q = queue(&["+CREG: 1"]);
        assert!(match_terminal(&mut q, &cmd).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_match_terminal_address_only_for_address_query() {
        let mut q = queue(&["10.64.12.7"]);
        assert!(match_terminal(&mut q, &Command::new("AT+CSQ")).is_none());

        let reply = match_terminal(&mut q, &Command::new("AT+CIFSR").timeout_ms(5000)).unwrap();
        assert_eq!(reply.state, ReturnedState::Ok);
        assert_eq!(reply.text(), "10.64.12.7");
        assert!(q.is_empty());
    }

    #[test]
    fn test_engine_serializes_concurrent_transactions() {
        let f = fixture(|written| {
            if written.starts_with("AT+A") {
                vec!["A", "OK"]
            } else {
                vec!["B", "OK"]
            }
        });
        let engine = Arc::new(f.engine);
        let mut handles = Vec::new();
        for text in ["AT+A", "AT+B"] {
            let engine = engine.clone();
            handles.push(std::thread::spawn(move || {
                (0..10)
                    .map(|_| engine.query(text, 500).text().into_owned())
                    .collect::<Vec<_>>()
            }));
        }
        let a = handles.remove(0).join().unwrap();
        let b = handles.remove(0).join().unwrap();
        assert!(a.iter().all(|r| r == "A"));
        assert!(b.iter().all(|r| r == "B"));
    }
}
