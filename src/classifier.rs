//! Background line classifier
//!
//! Drains response tokens nobody is waiting for and turns the unsolicited
//! ones into state updates and events. While a transaction is waiting, it
//! only takes tokens that can never be a command reply, so a raw query's
//! data line is never stolen.

use crate::constants::CLASSIFIER_IDLE_MS;
use crate::events::{Event, HttpMethod, SmsStatusReport, SyncResult, WarningCondition};
use crate::modem::ModemCore;
use crate::protocol::{fields, parse_timestamp, prompts, unquote};
use crate::socket::ConnectionStatus;
use crate::state::{BearerProfile, NetworkRegistrationState, PowerStatus, SimCardStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// What an unsolicited line means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsolicited {
    GsmRegistration(NetworkRegistrationState),
    GprsRegistration(NetworkRegistrationState),
    SmsReceived { index: u32 },
    SmsSent { reference: u32 },
    SmsStatusReport(SmsStatusReport),
    HttpAction {
        method: HttpMethod,
        status: u16,
        length: usize,
    },
    PowerDown,
    CallReady,
    SmsReady,
    PdpDeactivated,
    BearerDeactivated,
    SimStatus(SimCardStatus),
    Warning(WarningCondition),
    SocketStatus {
        handle: usize,
        status: ConnectionStatus,
    },
    NetworkTime(SyncResult),
    /// Recognized and deliberately dropped
    Ignored,
}

const SOCKET_LINES: [(&str, ConnectionStatus); 4] = [
    (prompts::CONNECT_OK_MUX, ConnectionStatus::Connected),
    (prompts::CONNECT_FAIL_MUX, ConnectionStatus::Initial),
    (prompts::CLOSE_OK_MUX, ConnectionStatus::Closed),
    (prompts::CLOSED_MUX, ConnectionStatus::Closed),
];

/// Classify one line; `None` for lines outside the unsolicited vocabulary
pub fn classify(line: &str) -> Option<Unsolicited> {
    let line = line.trim();

    if let Some(event) = classify_exact(line) {
        return Some(event);
    }
    if let Some(event) = classify_socket_line(line) {
        return Some(event);
    }

    let (prefix, rest) = split_prefix(line)?;
    let parsed = match prefix {
        prompts::CREG => registration(rest).map(Unsolicited::GsmRegistration),
        prompts::CGREG => registration(rest).map(Unsolicited::GprsRegistration),
        prompts::CMTI => fields(rest)
            .get(1)
            .and_then(|f| f.parse().ok())
            .map(|index| Unsolicited::SmsReceived { index }),
        prompts::CMGS => rest
            .trim()
            .parse()
            .ok()
            .map(|reference| Unsolicited::SmsSent { reference }),
        prompts::CDS => status_report(rest).map(Unsolicited::SmsStatusReport),
        prompts::HTTPACTION => http_action(rest),
        prompts::CSMINS => match fields(rest).get(1).copied() {
            Some("0") => Some(Unsolicited::SimStatus(SimCardStatus::Removed)),
            Some("1") => Some(Unsolicited::SimStatus(SimCardStatus::Inserted)),
            _ => None,
        },
        prompts::CMTE => rest.trim().parse::<i32>().ok().map(|t| match t {
            1 | -1 | -2 => Unsolicited::Warning(WarningCondition::TemperatureWarning),
            _ => Unsolicited::Ignored,
        }),
        prompts::CNTP => rest
            .trim()
            .parse()
            .ok()
            .map(|code| Unsolicited::NetworkTime(SyncResult::from_code(code))),
        prompts::CFUN | prompts::CPMS => Some(Unsolicited::Ignored),
        _ => return None,
    };

    if parsed.is_none() {
        warn!(line, "malformed unsolicited line");
        return Some(Unsolicited::Ignored);
    }
    parsed
}

/// Tokens that can never be the reply to a command
pub fn is_unsolicited_only(token: &[u8]) -> bool {
    let Ok(line) = std::str::from_utf8(token) else {
        return false;
    };
    if classify_socket_line(line).is_some() {
        return true;
    }
    if [prompts::CMTI, prompts::HTTPACTION, prompts::CDS, prompts::CMTE]
        .iter()
        .any(|p| line.starts_with(p))
    {
        return true;
    }
    [
        prompts::UNDER_VOLTAGE_WARNING,
        prompts::OVER_VOLTAGE_WARNING,
        prompts::UNDER_VOLTAGE_POWER_DOWN,
        prompts::OVER_VOLTAGE_POWER_DOWN,
        prompts::NORMAL_POWER_DOWN,
        prompts::PDP_DEACT,
        prompts::SAPBR_DEACT,
        prompts::CALL_READY,
        prompts::SMS_READY,
    ]
    .contains(&line)
}

/// Apply a classified line to the device context
pub fn apply(core: &ModemCore, event: Unsolicited) {
    let state = core.state();
    let bus = core.bus();
    match event {
        Unsolicited::GsmRegistration(s) => state.set_gsm_registration(s),
        Unsolicited::GprsRegistration(s) => {
            state.set_gprs_registration(s);
            if !s.is_registered() {
                state.close_all_bearers();
            }
            state.set_ip_address(None);
        }
        Unsolicited::SmsReceived { index } => bus.publish(Event::SmsReceived { index }),
        Unsolicited::SmsSent { reference } => bus.publish(Event::SmsSentReference { reference }),
        Unsolicited::SmsStatusReport(report) => bus.publish(Event::SmsStatusReport(report)),
        Unsolicited::HttpAction {
            method,
            status,
            length,
        } => bus.publish(Event::HttpActionReceived {
            method,
            status,
            length,
        }),
        Unsolicited::PowerDown => state.set_power(PowerStatus::Off),
        Unsolicited::CallReady => bus.publish(Event::CallReady),
        Unsolicited::SmsReady => bus.publish(Event::SmsReady),
        Unsolicited::PdpDeactivated => state.set_bearer(BearerProfile::Sockets, false),
        Unsolicited::BearerDeactivated => {
            state.close_all_bearers();
            state.set_ip_address(None);
        }
        Unsolicited::SimStatus(status) => state.set_sim_status(status),
        Unsolicited::Warning(condition) => {
            warn!(?condition, "modem warning");
            bus.publish(Event::Warning(condition));
        }
        Unsolicited::SocketStatus { handle, status } => {
            core.sockets().set_status(handle, status, bus)
        }
        Unsolicited::NetworkTime(result) => bus.publish(Event::NetworkTimeSync(result)),
        Unsolicited::Ignored => {}
    }
}

/// Classifier thread body; returns once `shutdown` is set
pub fn run(core: &ModemCore, shutdown: &AtomicBool) {
    let idle = Duration::from_millis(CLASSIFIER_IDLE_MS);
    let sink = core.sink();
    while !shutdown.load(Ordering::Relaxed) {
        match sink.next_for_classifier(is_unsolicited_only) {
            Some(token) => {
                let line = String::from_utf8_lossy(&token);
                match classify(&line) {
                    Some(event) => apply(core, event),
                    None => debug!(line = %line, "unhandled line"),
                }
            }
            None => {
                sink.wait_prompt(idle);
            }
        }
    }
}

fn classify_exact(line: &str) -> Option<Unsolicited> {
    let event = match line {
        prompts::NORMAL_POWER_DOWN => Unsolicited::PowerDown,
        prompts::CALL_READY => Unsolicited::CallReady,
        prompts::SMS_READY => Unsolicited::SmsReady,
        prompts::PDP_DEACT => Unsolicited::PdpDeactivated,
        prompts::SAPBR_DEACT => Unsolicited::BearerDeactivated,
        prompts::UNDER_VOLTAGE_WARNING => {
            Unsolicited::Warning(WarningCondition::UnderVoltageWarning)
        }
        prompts::UNDER_VOLTAGE_POWER_DOWN => {
            Unsolicited::Warning(WarningCondition::UnderVoltagePowerDown)
        }
        prompts::OVER_VOLTAGE_WARNING => Unsolicited::Warning(WarningCondition::OverVoltageWarning),
        prompts::OVER_VOLTAGE_POWER_DOWN => {
            Unsolicited::Warning(WarningCondition::OverVoltagePowerDown)
        }
        prompts::CPIN_NOT_INSERTED => Unsolicited::SimStatus(SimCardStatus::Removed),
        prompts::OK | prompts::CPIN_READY | prompts::RDY => Unsolicited::Ignored,
        _ => return None,
    };
    Some(event)
}

/// `<handle>, CONNECT OK` and friends
fn classify_socket_line(line: &str) -> Option<Unsolicited> {
    SOCKET_LINES.iter().find_map(|(suffix, status)| {
        let handle = line.strip_suffix(suffix)?.trim().parse().ok()?;
        Some(Unsolicited::SocketStatus {
            handle,
            status: *status,
        })
    })
}

/// Split `+XXX: rest` into (`+XXX:`, `rest`)
fn split_prefix(line: &str) -> Option<(&str, &str)> {
    if !line.starts_with('+') {
        return None;
    }
    let colon = line.find(':')?;
    Some(line.split_at(colon + 1))
}

/// `[n,]stat`: the status is the last field
fn registration(rest: &str) -> Option<NetworkRegistrationState> {
    let stat = fields(rest).last()?.parse().ok()?;
    Some(NetworkRegistrationState::from_code(stat))
}

fn http_action(rest: &str) -> Option<Unsolicited> {
    let f = fields(rest);
    if f.len() < 3 {
        return None;
    }
    Some(Unsolicited::HttpAction {
        method: HttpMethod::from_code(f[0].parse().ok()?)?,
        status: f[1].parse().ok()?,
        length: f[2].parse().ok()?,
    })
}

/// `fo,mr,"ra",tora,"scts","dt",st`, where each stamp holds one comma
fn status_report(rest: &str) -> Option<SmsStatusReport> {
    let f = fields(rest);
    if f.len() != 9 {
        return None;
    }
    Some(SmsStatusReport {
        reference: f[1].parse().ok()?,
        recipient: unquote(f[2]).to_string(),
        service_center_time: parse_timestamp(&format!("{},{}", f[4], f[5])),
        delivered_time: parse_timestamp(&format!("{},{}", f[6], f[7])),
        status: f[8].parse().ok()?,
    })
}
