//! Device information queries
//!
//! Each query is a single raw transaction: the data line preceding `OK` is
//! parsed into a typed value.

use crate::error::{ModemError, Result};
use crate::modem::Modem;
use crate::protocol::{fields, parse_timestamp, unquote, ReturnedState};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Reply budget of the information queries
const QUERY_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalStrength {
    Error,
    VeryWeak,
    Weak,
    Strong,
    VeryStrong,
    Unknown,
}

impl SignalStrength {
    /// Map the `<rssi>` field of `+CSQ`
    pub fn from_rssi(rssi: u8) -> Self {
        match rssi {
            0 => Self::VeryWeak,
            1 => Self::Weak,
            2..=30 => Self::Strong,
            31 => Self::VeryStrong,
            99 => Self::Unknown,
            _ => Self::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PinState {
    Ready,
    Pin,
    Puk,
    PhPin,
    PhPuk,
    Pin2,
    Puk2,
    NotPresent,
}

impl PinState {
    /// Map the code of `+CPIN: <code>`
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "READY" => Self::Ready,
            "SIM PIN" => Self::Pin,
            "SIM PUK" => Self::Puk,
            "PH_SIM PIN" => Self::PhPin,
            "PH_SIM PUK" => Self::PhPuk,
            "SIM PIN2" => Self::Pin2,
            "SIM PUK2" => Self::Puk2,
            _ => Self::NotPresent,
        }
    }
}

/// Everything `sim800ctl info` prints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: String,
    pub firmware: String,
    pub imei: String,
    pub operator: String,
    pub signal: SignalStrength,
    pub pin: PinState,
    pub supply_voltage_mv: u16,
    pub clock: Option<String>,
}

impl Modem {
    pub fn signal_strength(&self) -> Result<SignalStrength> {
        let reply = self.engine().query("AT+CSQ", QUERY_TIMEOUT_MS);
        if reply.state == ReturnedState::NoReply {
            return Ok(SignalStrength::Unknown);
        }
        let line = reply.into_result()?;
        let line = String::from_utf8_lossy(&line);
        parse_signal_strength(&line).ok_or_else(|| unexpected("AT+CSQ", &line))
    }

    /// Name of the network the modem is registered on
    pub fn operator(&self) -> Result<String> {
        let line = self.data_line("AT+COPS?")?;
        parse_operator(&line).ok_or_else(|| unexpected("AT+COPS?", &line))
    }

    pub fn imei(&self) -> Result<String> {
        self.data_line("AT+GSN")
    }

    pub fn model(&self) -> Result<String> {
        self.data_line("AT+CGMM")
    }

    pub fn firmware_release(&self) -> Result<String> {
        let line = self.data_line("AT+CGMR")?;
        Ok(line
            .strip_prefix("Revision:")
            .map_or(line.as_str(), str::trim)
            .to_string())
    }

    pub fn pin_state(&self) -> Result<PinState> {
        let line = self.data_line("AT+CPIN?")?;
        let code = line
            .strip_prefix("+CPIN:")
            .ok_or_else(|| unexpected("AT+CPIN?", &line))?;
        Ok(PinState::from_code(code))
    }

    /// Modem real-time clock, in its local time
    pub fn date_time(&self) -> Result<NaiveDateTime> {
        let line = self.data_line("AT+CCLK?")?;
        line.strip_prefix("+CCLK:")
            .and_then(parse_timestamp)
            .ok_or_else(|| unexpected("AT+CCLK?", &line))
    }

    /// Supply voltage in millivolts
    pub fn supply_voltage(&self) -> Result<u16> {
        let line = self.data_line("AT+CBC")?;
        parse_supply_voltage(&line).ok_or_else(|| unexpected("AT+CBC", &line))
    }

    /// Collect every query in one report
    pub fn device_info(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            model: self.model()?,
            firmware: self.firmware_release()?,
            imei: self.imei()?,
            operator: self.operator().unwrap_or_default(),
            signal: self.signal_strength()?,
            pin: self.pin_state()?,
            supply_voltage_mv: self.supply_voltage()?,
            clock: self
                .date_time()
                .ok()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        })
    }

    fn data_line(&self, command: &str) -> Result<String> {
        let line = self
            .engine()
            .query(command, QUERY_TIMEOUT_MS)
            .into_result()?;
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }
}

fn unexpected(command: &'static str, response: &str) -> ModemError {
    ModemError::UnexpectedResponse {
        command,
        response: response.to_string(),
    }
}

/// `+CSQ: <rssi>,<ber>`
fn parse_signal_strength(line: &str) -> Option<SignalStrength> {
    let rest = line.trim().strip_prefix("+CSQ:")?;
    let f = fields(rest);
    if f.len() != 2 {
        return None;
    }
    Some(SignalStrength::from_rssi(f[0].parse().ok()?))
}

/// `+COPS: <mode>[,<format>,<oper>]`
fn parse_operator(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("+COPS:")?;
    match fields(rest).as_slice() {
        [_, _, name] => Some(unquote(name).to_string()),
        [_] => Some(String::new()),
        _ => None,
    }
}

/// `+CBC: <bcs>,<bcl>,<voltage>`
fn parse_supply_voltage(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix("+CBC:")?;
    fields(rest).get(2)?.parse().ok()
}
