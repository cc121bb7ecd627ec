//! GPRS provider: IP stack setup, bearers and sockets
//!
//! Two independent data paths exist on the modem:
//! - the multiplexed TCP stack (`CIPxxx`), used by [`GprsSocket`]
//! - the bearer profiles (`SAPBR`), used by HTTP, SNTP, MMS and location
//!
//! Bringing either up takes several slow transactions, so those calls are
//! queued on the scheduler and return a [`Pending`].

use crate::config::AccessPointConfig;
use crate::constants::{
    BEARER_COMMAND_TIMEOUT_MS, BEARER_OPEN_BUDGET_MS, BEARER_POLL_MS, BEARER_QUERY_TIMEOUT_MS,
    CIFSR_TIMEOUT_MS, CIICR_TIMEOUT_MS, RETRY_PAUSE_MS, SETUP_TIMEOUT_MS,
};
use crate::engine::Engine;
use crate::error::{ModemError, Result};
use crate::modem::{Modem, ModemCore};
use crate::protocol::{fields, prompts, unquote, AtResponse, Command, ReturnedState};
use crate::scheduler::Pending;
use crate::socket::{ConnectionStatus, GprsSocket, Protocol};
use crate::state::BearerProfile;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectGprsResult {
    Open,
    AlreadyOpen,
    Failed,
    DeviceIsOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBearerResult {
    Open,
    AlreadyOpen,
    Failed,
    DeviceIsOff,
}

/// What `AT+SAPBR=2,<p>` reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerStatus {
    pub profile: BearerProfile,
    pub open: bool,
    pub address: Option<String>,
}

pub struct GprsProvider {
    core: Arc<ModemCore>,
}

impl GprsProvider {
    /// Prepare the IP stack
    ///
    /// Shuts down any previous IP session, enables multiplexed connections
    /// with quick-send mode and writes the configured access points. The
    /// access point writes are not confirmed: without them the modem simply
    /// gets no connectivity.
    pub fn new(modem: &Modem) -> Result<Self> {
        let core = modem.core().clone();
        {
            let engine = core.engine();
            let _channel = engine.channel();

            engine.send_quick("AT+CIPSHUT");
            let mux = Command::new("AT+CIPMUX=1;+CIPQSEND=1").timeout_ms(SETUP_TIMEOUT_MS);
            send_with_retry(engine, &mux).into_result()?;

            match &core.config().apn {
                Some(apn) => {
                    let cstt = Command::new(cstt_command(apn)).timeout_ms(SETUP_TIMEOUT_MS);
                    let reply = send_with_retry(engine, &cstt);
                    if !reply.is_ok() {
                        warn!(state = ?reply.state, "access point not accepted");
                    }
                    engine.send_quick(&bearer_parameters(BearerProfile::IpApps, apn));
                }
                None => warn!("no access point configured"),
            }
            if let Some(mms) = &core.config().mms_apn {
                engine.send_quick(&bearer_parameters(BearerProfile::Mms, mms));
            }
        }
        debug!("IP stack ready");
        Ok(Self { core })
    }

    /// Bring up the wireless connection and fetch the local address
    pub fn open_gprs_connection(&self) -> Pending<ConnectGprsResult> {
        self.core.scheduler().submit_fn(|core: &ModemCore| {
            let state = core.state();
            if state.bearer_open(BearerProfile::Sockets) {
                return Ok(ConnectGprsResult::AlreadyOpen);
            }
            let engine = core.engine();

            let bring_up = engine.send(&Command::new("AT+CIICR").timeout_ms(CIICR_TIMEOUT_MS));
            match bring_up.state {
                ReturnedState::Ok => {}
                ReturnedState::DeviceIsOff => return Ok(ConnectGprsResult::DeviceIsOff),
                other => {
                    warn!(state = ?other, "wireless connection failed");
                    return Ok(ConnectGprsResult::Failed);
                }
            }

            let address = engine.send(&Command::new(prompts::CIFSR).timeout_ms(CIFSR_TIMEOUT_MS));
            if !address.is_ok() {
                warn!(state = ?address.state, "no local address");
                return Ok(ConnectGprsResult::Failed);
            }
            let address = address.text().into_owned();
            info!(%address, "GPRS connection open");
            state.set_ip_address(Some(address));
            state.set_bearer(BearerProfile::Sockets, true);
            Ok(ConnectGprsResult::Open)
        })
    }

    /// Open a bearer profile and wait for the modem to report it open
    pub fn open_bearer(&self, profile: BearerProfile) -> Pending<OpenBearerResult> {
        self.core
            .scheduler()
            .submit_fn(move |core: &ModemCore| open_bearer(core, profile))
    }

    /// Close a bearer profile
    ///
    /// Returns `Error` without sending anything if it is not open.
    pub fn close_bearer(&self, profile: BearerProfile) -> AtResponse {
        let state = self.core.state();
        if !state.bearer_open(profile) {
            return AtResponse::from_state(ReturnedState::Error);
        }
        let command = Command::new(format!("AT+SAPBR=0,{}", profile.index()))
            .timeout_ms(BEARER_COMMAND_TIMEOUT_MS);
        let reply = self.core.engine().send(&command);
        if reply.is_ok() {
            state.set_bearer(profile, false);
        }
        reply
    }

    /// Query a bearer profile and update the device context
    pub fn check_bearer_status(&self, profile: BearerProfile) -> Result<BearerStatus> {
        check_bearer_status(&self.core, profile)
    }

    /// Detach from the GPRS service
    pub fn detach_gprs(&self) -> AtResponse {
        self.core
            .engine()
            .send(&Command::new("AT+CGATT=0").timeout_ms(BEARER_COMMAND_TIMEOUT_MS))
    }

    /// Connection state of one multiplexed connection as the modem sees it
    pub fn check_connection_status(&self, handle: usize) -> ConnectionStatus {
        let reply = self
            .core
            .engine()
            .query(&format!("AT+CIPSTATUS={}", handle), SETUP_TIMEOUT_MS);
        if !reply.is_ok() {
            debug!(handle, state = ?reply.state, "no connection status");
            return ConnectionStatus::Unknown;
        }
        parse_connection_status(&reply.text())
    }

    pub fn new_socket(&self, protocol: Protocol, ssl: bool) -> Result<GprsSocket> {
        GprsSocket::new(self.core.clone(), protocol, ssl)
    }
}

fn open_bearer(core: &ModemCore, profile: BearerProfile) -> Result<OpenBearerResult> {
    if core.state().bearer_open(profile) {
        return Ok(OpenBearerResult::AlreadyOpen);
    }

    let command = Command::new(format!("AT+SAPBR=1,{}", profile.index()))
        .timeout_ms(BEARER_COMMAND_TIMEOUT_MS);
    let reply = core.engine().send(&command);
    match reply.state {
        ReturnedState::Ok => {}
        ReturnedState::DeviceIsOff => return Ok(OpenBearerResult::DeviceIsOff),
        other => {
            debug!(?profile, state = ?other, "bearer open refused");
            return Ok(OpenBearerResult::Failed);
        }
    }

    let poll = Duration::from_millis(BEARER_POLL_MS);
    let deadline = Instant::now() + Duration::from_millis(BEARER_OPEN_BUDGET_MS);
    while Instant::now() < deadline {
        match check_bearer_status(core, profile) {
            Ok(status) if status.open => return Ok(OpenBearerResult::Open),
            Err(ModemError::Command {
                state: ReturnedState::DeviceIsOff,
                ..
            }) => return Ok(OpenBearerResult::DeviceIsOff),
            _ => {}
        }
        thread::sleep(poll);
    }
    warn!(?profile, "bearer did not open in time");
    Ok(OpenBearerResult::Failed)
}

fn check_bearer_status(core: &ModemCore, profile: BearerProfile) -> Result<BearerStatus> {
    let reply = core.engine().query(
        &format!("AT+SAPBR=2,{}", profile.index()),
        BEARER_QUERY_TIMEOUT_MS,
    );
    let text = reply.into_result()?;
    let text = String::from_utf8_lossy(&text);
    let status = parse_bearer_status(&text).ok_or_else(|| ModemError::UnexpectedResponse {
        command: "AT+SAPBR=2",
        response: text.to_string(),
    })?;

    let state = core.state();
    state.set_bearer(profile, status.open);
    state.set_ip_address(status.address.clone());
    Ok(status)
}

/// Send `command`, retrying once after a pause unless the modem is off
fn send_with_retry(engine: &Engine, command: &Command) -> AtResponse {
    let reply = engine.send(command);
    if matches!(reply.state, ReturnedState::Ok | ReturnedState::DeviceIsOff) {
        return reply;
    }
    debug!(command = command.text(), state = ?reply.state, "retrying");
    thread::sleep(Duration::from_millis(RETRY_PAUSE_MS));
    engine.send(command)
}

fn cstt_command(apn: &AccessPointConfig) -> String {
    if apn.has_credentials() {
        format!(
            "AT+CSTT=\"{}\",\"{}\",\"{}\"",
            apn.name, apn.user, apn.password
        )
    } else {
        format!("AT+CSTT=\"{}\"", apn.name)
    }
}

/// Connection type, APN and credentials of one profile, as one command line
fn bearer_parameters(profile: BearerProfile, apn: &AccessPointConfig) -> String {
    let id = profile.index();
    format!(
        "AT+SAPBR=3,{id},\"Contype\",\"GPRS\";+SAPBR=3,{id},\"APN\",\"{}\";+SAPBR=3,{id},\"USER\",\"{}\";+SAPBR=3,{id},\"PWD\",\"{}\"",
        apn.name, apn.user, apn.password
    )
}

/// `+SAPBR: <p>,<status>,"<ip>"`; status 1 means open
fn parse_bearer_status(line: &str) -> Option<BearerStatus> {
    let rest = line.trim().strip_prefix("+SAPBR:")?;
    let f = fields(rest);
    if f.len() != 3 {
        return None;
    }
    let profile = BearerProfile::from_index(f[0].parse().ok()?)?;
    let open = f[1].parse::<u8>().ok()? == 1;
    let address = open.then(|| unquote(f[2]).to_string());
    Some(BearerStatus {
        profile,
        open,
        address,
    })
}

/// `+CIPSTATUS: <n>,<bearer>,"<proto>","<ip>","<port>","<state>"`
fn parse_connection_status(line: &str) -> ConnectionStatus {
    let Some(rest) = line.trim().strip_prefix("+CIPSTATUS:") else {
        return ConnectionStatus::Unknown;
    };
    let f = fields(rest);
    if f.len() != 6 {
        return ConnectionStatus::Unknown;
    }
    ConnectionStatus::from_cipstatus(f[5])
}
