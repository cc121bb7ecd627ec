//! Serial stream demultiplexer
//!
//! The modem interleaves three kinds of traffic on one UART:
//! - CR LF delimited text lines (replies and unsolicited events)
//! - prompts that are not line terminated (`> `, `CONNECT`, power-down notices)
//! - binary payloads announced by a header line (`+RECEIVE`, `+HTTPREAD`)
//!
//! `StreamDemux` is a small lexer over an owned byte buffer. It is fed whole
//! bursts as they arrive and returns what it recognized; it never touches
//! the socket table or the response sink itself.
//!
//! A text unit is only considered a line once its leading CR LF has been
//! seen. Bytes before that (command echo, noise) are discarded, except for
//! the two power-down notices, which the modem sends bare.

mod header;

pub use header::Header;

use crate::protocol::prompts;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Something the demultiplexer recognized in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxOutput {
    /// A line, prompt or payload for the response sink
    Token(Bytes),
    /// A slice of socket payload, in arrival order
    SocketData { handle: usize, data: Bytes },
    /// A socket payload ended; `complete` is false after a stall
    SocketDataEnd { handle: usize, complete: bool },
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Lines,
    Socket {
        handle: usize,
        remaining: usize,
        last_progress: Instant,
    },
    Payload {
        remaining: usize,
        last_progress: Instant,
    },
}

enum Step {
    Continue,
    Emit(Bytes),
    /// Emit and ignore the rest of the burst
    Prompt(Bytes),
    Enter(Header),
}

pub struct StreamDemux {
    unit: Vec<u8>,
    line_open: bool,
    inline_text: bool,
    mode: Mode,
    payload_stall: Duration,
    socket_stall: Duration,
}

impl StreamDemux {
    pub fn new(payload_stall: Duration, socket_stall: Duration) -> Self {
        Self {
            unit: Vec::with_capacity(256),
            line_open: false,
            inline_text: false,
            mode: Mode::Lines,
            payload_stall,
            socket_stall,
        }
    }

    /// Feed one burst
    ///
    /// `idle_after` tells whether the link had no further bytes pending once
    /// this burst was read; only then is a bare `>` taken as a prompt.
    pub fn feed(&mut self, data: &[u8], now: Instant, idle_after: bool) -> Vec<DemuxOutput> {
        trace!(len = data.len(), "burst");
        let mut out = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            if !matches!(self.mode, Mode::Lines) {
                pos += self.consume_payload(&data[pos..], now, &mut out);
                continue;
            }

            let byte = data[pos];
            pos += 1;
            let burst_end = idle_after && pos == data.len();

            match self.scan(byte, burst_end) {
                Step::Continue => {}
                Step::Emit(token) => out.push(DemuxOutput::Token(token)),
                Step::Prompt(token) => {
                    out.push(DemuxOutput::Token(token));
                    if pos < data.len() {
                        trace!(ignored = data.len() - pos, "bytes after prompt");
                    }
                    break;
                }
                Step::Enter(header) => self.enter(header, now, &mut out),
            }
        }

        out
    }

    /// Give up on a payload whose bytes stopped arriving
    ///
    /// Call whenever a read comes back empty.
    pub fn poll_stall(&mut self, now: Instant) -> Vec<DemuxOutput> {
        let (last_progress, limit) = match self.mode {
            Mode::Lines => return Vec::new(),
            Mode::Socket { last_progress, .. } => (last_progress, self.socket_stall),
            Mode::Payload { last_progress, .. } => (last_progress, self.payload_stall),
        };
        if now.saturating_duration_since(last_progress) < limit {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.finish_payload(false, &mut out);
        out
    }

    /// True while a length-prefixed payload is being collected
    pub fn in_payload(&self) -> bool {
        !matches!(self.mode, Mode::Lines)
    }

    /// Drop any partial unit or payload
    pub fn reset(&mut self) {
        self.mode = Mode::Lines;
        self.reset_unit();
    }

    fn scan(&mut self, byte: u8, burst_end: bool) -> Step {
        if byte == 0 && self.unit.is_empty() {
            return Step::Continue;
        }
        self.unit.push(byte);

        if !self.line_open && is_power_down_notice(&self.unit) {
            return Step::Prompt(self.take_unit());
        }

        if byte == b'\n' && self.unit.ends_with(b"\r\n") {
            return self.end_of_line();
        }

        let unit = self.unit.as_slice();
        // A bare '>' counts only at the end of an idle burst. This can
        // misfire if the rest of the burst is still on the wire.
        if unit == prompts::SEND_PROMPT.as_bytes()
            || (burst_end && unit == prompts::SEND_PROMPT_BARE.as_bytes())
            || (self.line_open && unit == prompts::CONNECT.as_bytes())
        {
            return Step::Prompt(self.take_unit());
        }

        Step::Continue
    }

    fn end_of_line(&mut self) -> Step {
        if !self.line_open {
            self.line_open = true;
            self.unit.clear();
            return Step::Continue;
        }

        let body = &self.unit[..self.unit.len() - 2];
        if !self.inline_text && header::introduces_inline_text(body) {
            // the SMS text on the next line belongs to this unit
            self.inline_text = true;
            return Step::Continue;
        }

        let line = trim_crlf(&self.unit);
        if line.is_empty() {
            self.unit.clear();
            return Step::Continue;
        }
        if !self.inline_text {
            if let Some(header) = header::parse(line) {
                self.reset_unit();
                return Step::Enter(header);
            }
        }

        let token = Bytes::copy_from_slice(line);
        self.reset_unit();
        Step::Emit(token)
    }

    fn enter(&mut self, header: Header, now: Instant, out: &mut Vec<DemuxOutput>) {
        let len = match header {
            Header::SocketData { handle, len } => {
                self.mode = Mode::Socket {
                    handle,
                    remaining: len,
                    last_progress: now,
                };
                len
            }
            Header::Payload { len } => {
                self.mode = Mode::Payload {
                    remaining: len,
                    last_progress: now,
                };
                len
            }
        };
        if len == 0 {
            self.finish_payload(true, out);
        }
    }

    /// Consume payload bytes from the front of `data`, returning how many
    fn consume_payload(&mut self, data: &[u8], now: Instant, out: &mut Vec<DemuxOutput>) -> usize {
        let (take, left) = match &mut self.mode {
            Mode::Lines => return 0,
            Mode::Socket {
                handle,
                remaining,
                last_progress,
            } => {
                let take = (*remaining).min(data.len());
                out.push(DemuxOutput::SocketData {
                    handle: *handle,
                    data: Bytes::copy_from_slice(&data[..take]),
                });
                *remaining -= take;
                *last_progress = now;
                (take, *remaining)
            }
            Mode::Payload {
                remaining,
                last_progress,
            } => {
                let take = (*remaining).min(data.len());
                self.unit.extend_from_slice(&data[..take]);
                *remaining -= take;
                *last_progress = now;
                (take, *remaining)
            }
        };
        if left == 0 {
            self.finish_payload(true, out);
        }
        take
    }

    fn finish_payload(&mut self, complete: bool, out: &mut Vec<DemuxOutput>) {
        match std::mem::replace(&mut self.mode, Mode::Lines) {
            Mode::Lines => {}
            Mode::Socket {
                handle, remaining, ..
            } => {
                if !complete {
                    warn!(handle, missing = remaining, "socket data stalled, keeping partial payload");
                }
                out.push(DemuxOutput::SocketDataEnd { handle, complete });
            }
            Mode::Payload { remaining, .. } => {
                if !complete {
                    warn!(missing = remaining, "payload stalled, delivering partial body");
                }
                out.push(DemuxOutput::Token(Bytes::copy_from_slice(trim_crlf(
                    &self.unit,
                ))));
            }
        }
        self.reset_unit();
    }

    fn take_unit(&mut self) -> Bytes {
        let token = Bytes::copy_from_slice(trim_crlf(&self.unit));
        self.reset_unit();
        token
    }

    fn reset_unit(&mut self) {
        self.unit.clear();
        self.line_open = false;
        self.inline_text = false;
    }
}

fn is_power_down_notice(unit: &[u8]) -> bool {
    unit == prompts::UNDER_VOLTAGE_POWER_DOWN.as_bytes()
        || unit == prompts::OVER_VOLTAGE_POWER_DOWN.as_bytes()
}

fn trim_crlf(bytes: &[u8]) -> &[u8] {
    let is_crlf = |b: &u8| *b == b'\r' || *b == b'\n';
    let start = bytes.iter().position(|b| !is_crlf(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_crlf(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}
