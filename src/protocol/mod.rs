//! Command and reply types shared by the transaction engine and its callers
//!
//! - [`Command`]: one outbound AT line, its reply budget and reply mode
//! - [`AtResponse`]: what a transaction ended with
//! - [`prompts`]: the literal vocabulary the modem speaks

pub mod prompts;

use crate::error::{ModemError, Result};
use bytes::Bytes;
use chrono::NaiveDateTime;
use std::borrow::Cow;
use std::time::Duration;

// =============================================================================
// Transaction outcome
// =============================================================================

/// Outcome of one transaction on the command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnedState {
    /// A success terminal token was seen (`OK`, `CONNECT`, a prompt, an address)
    Ok,
    /// The modem answered `ERROR` or `+CME ERROR`
    Error,
    /// The modem is powered down and the command was not sent
    DeviceIsOff,
    /// The command was rejected before transmission
    InvalidCommand,
    /// The modem reported it cannot take the command now
    DeviceIsBusy,
    /// No terminal token arrived within the reply budget
    NoReply,
}

/// Result of one transaction: its state plus the captured response text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub state: ReturnedState,
    /// Captured payload: the data line preceding `OK` for raw commands,
    /// the matched prompt, the address, or the `+CME ERROR` detail
    pub response: Bytes,
}

impl AtResponse {
    pub fn new(state: ReturnedState, response: impl Into<Bytes>) -> Self {
        Self {
            state,
            response: response.into(),
        }
    }

    /// Outcome with no captured text
    pub fn from_state(state: ReturnedState) -> Self {
        Self::new(state, Bytes::new())
    }

    pub fn is_ok(&self) -> bool {
        self.state == ReturnedState::Ok
    }

    /// Response decoded as text (lossy for binary payloads)
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response)
    }

    /// Turn a non-`Ok` outcome into [`ModemError::Command`]
    pub fn into_result(self) -> Result<Bytes> {
        match self.state {
            ReturnedState::Ok => Ok(self.response),
            state => Err(ModemError::command(
                state,
                String::from_utf8_lossy(&self.response),
            )),
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// How a transaction waits for the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Write and return `Ok` at once
    NoReply,
    /// Block until a terminal token
    Terminal,
    /// Block until a terminal token and capture the data line before `OK`
    Raw,
}

/// An outbound AT command
///
/// ```ignore
/// let cmd = Command::new("AT+CSQ").raw().timeout_ms(2000);
/// let reply = engine.send(&cmd);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    timeout: Option<Duration>,
    mode: ReplyMode,
    terminate: bool,
}

impl Command {
    /// A command expecting a terminal token, CR appended, default budget
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timeout: None,
            mode: ReplyMode::Terminal,
            terminate: true,
        }
    }

    /// Override the reply budget
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(Duration::from_millis(ms));
        self
    }

    /// Capture the data line preceding `OK` as the response
    pub fn raw(mut self) -> Self {
        self.mode = ReplyMode::Raw;
        self
    }

    /// Do not wait for any reply
    pub fn no_reply(mut self) -> Self {
        self.mode = ReplyMode::NoReply;
        self
    }

    /// Do not append the CR terminator
    pub fn unterminated(mut self) -> Self {
        self.terminate = false;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> ReplyMode {
        self.mode
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn expects_reply(&self) -> bool {
        self.mode != ReplyMode::NoReply
    }

    pub fn captures_response(&self) -> bool {
        self.mode == ReplyMode::Raw
    }

    /// Bytes that go on the wire
    pub fn wire(&self) -> Cow<'_, str> {
        if self.terminate && !self.text.ends_with('\r') {
            Cow::Owned(format!("{}\r", self.text))
        } else {
            Cow::Borrowed(&self.text)
        }
    }

    /// Commands that change the power state are accepted while the modem is off
    pub fn is_power_command(&self) -> bool {
        self.text.contains(prompts::CFUN_COMMAND) || self.text.contains(prompts::CPOWD_COMMAND)
    }

    /// The local address query, whose reply is a bare address instead of `OK`
    pub fn is_address_query(&self) -> bool {
        self.text.trim_end_matches('\r') == prompts::CIFSR
    }
}

// =============================================================================
// Field helpers
// =============================================================================

/// Parse a modem clock stamp: `yy/MM/dd,hh:mm:ss±zz`, quotes optional
///
/// The quarter-hour zone suffix is dropped; the result is modem local time.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_matches('"');
    let local = text.get(..17)?;
    NaiveDateTime::parse_from_str(local, "%y/%m/%d,%H:%M:%S").ok()
}

/// Comma-separated fields of a reply after its `+XXX:` prefix, trimmed
pub fn fields(rest: &str) -> Vec<&str> {
    rest.split(',').map(str::trim).collect()
}

/// Strip surrounding double quotes
pub fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_appends_cr() {
        assert_eq!(Command::new("AT").wire(), "AT\r");
        assert_eq!(Command::new("AT\r").wire(), "AT\r");
        assert_eq!(Command::new("ATE0").unterminated().wire(), "ATE0");
    }

    #[test]
    fn test_command_modes() {
        let cmd = Command::new("AT+CSQ").raw();
        assert!(cmd.expects_reply());
        assert!(cmd.captures_response());

        let cmd = Command::new("AT+CIPCLOSE=0,0").no_reply();
        assert!(!cmd.expects_reply());
        assert_eq!(cmd.timeout(), None);
    }

    #[test]
    fn test_command_power_classification() {
        assert!(Command::new("AT+CFUN=1").is_power_command());
        assert!(Command::new("AT+CPOWD=1").is_power_command());
        assert!(!Command::new("AT+CSQ").is_power_command());
    }

    #[test]
    fn test_command_address_query() {
        assert!(Command::new("AT+CIFSR").is_address_query());
        assert!(Command::new("AT+CIFSR\r").is_address_query());
        assert!(!Command::new("AT+CIFSR=1").is_address_query());
    }

    #[test]
    fn test_at_response_into_result() {
        let ok = AtResponse::new(ReturnedState::Ok, "+CSQ: 20,0");
        assert_eq!(ok.text(), "+CSQ: 20,0");
        assert!(ok.into_result().is_ok());

        let err = AtResponse::new(ReturnedState::Error, "10");
        match err.into_result() {
            Err(ModemError::Command { state, detail }) => {
                assert_eq!(state, ReturnedState::Error);
                assert_eq!(detail, "10");
            }
            other => panic!("Expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_timestamp() {
        let stamp = parse_timestamp("\"24/03/09,14:05:59+04\"").unwrap();
        assert_eq!(stamp.to_string(), "2024-03-09 14:05:59");
        assert!(parse_timestamp("24/03/09").is_none());
        assert!(parse_timestamp("\"24/13/09,14:05:59+04\"").is_none());
    }

    #[test]
    fn test_fields_and_unquote() {
        assert_eq!(fields(" 0,\"Orange\", 2"), vec!["0", "\"Orange\"", "2"]);
        assert_eq!(unquote(" \"Orange\" "), "Orange");
    }
}
