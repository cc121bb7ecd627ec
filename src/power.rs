//! Power-on sequence and power-down
//!
//! Powering on means waking the modem's UART (it answers `AT` with `OK`,
//! or `RDY` once auto-bauding locks) and then writing the driver's
//! configuration to its profile. Power-key GPIO handling is up to the
//! board; call `power_on` once the modem has been switched on.

use crate::config::SerialConfig;
use crate::constants::{
    CFUN_TIMEOUT_MS, CONFIGURATION_TIMEOUT_MS, POWER_ON_ATTEMPTS, POWER_ON_POLL_MS,
    POWER_ON_WINDOW_MS,
};
use crate::engine::Engine;
use crate::error::{ModemError, Result};
use crate::modem::{Modem, ModemCore};
use crate::protocol::{prompts, Command};
use crate::scheduler::{AsyncOperation, Pending};
use crate::state::{NetworkRegistrationState, PowerStatus};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Operating level set with `AT+CFUN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneFunctionality {
    Minimum = 0,
    Full = 1,
    FlightMode = 4,
}

impl PhoneFunctionality {
    fn power_status(self) -> PowerStatus {
        match self {
            Self::Minimum => PowerStatus::Minimum,
            Self::Full => PowerStatus::On,
            Self::FlightMode => PowerStatus::FlightMode,
        }
    }
}

/// Wake the modem and write the driver configuration
pub struct PowerOn {
    attempts: u32,
}

impl Default for PowerOn {
    fn default() -> Self {
        Self {
            attempts: POWER_ON_ATTEMPTS,
        }
    }
}

impl AsyncOperation<ModemCore> for PowerOn {
    type Output = PowerStatus;

    fn name(&self) -> &'static str {
        "power-on"
    }

    fn process(&mut self, core: &ModemCore) -> Result<PowerStatus> {
        let state = core.state();
        let previous = state.power();
        if previous == PowerStatus::On {
            return Ok(PowerStatus::On);
        }

        state.set_power(PowerStatus::PowerOnSequenceIsRunning);
        let engine = core.engine();
        let _channel = engine.channel();
        engine.sink().clear();
        if let Err(e) = engine.link().clear_input() {
            debug!(error = %e, "could not discard pending input");
        }

        if !wake(engine, self.attempts) {
            warn!(attempts = self.attempts, "modem did not wake up");
            state.set_power(previous);
            return Err(ModemError::NotReady {
                reason: "modem did not answer AT",
            });
        }

        let echo = engine.execute("ATE0");
        if !echo.is_ok() {
            debug!(state = ?echo.state, "echo off not confirmed");
        }
        let configure = Command::new(configuration_command(&core.config().serial))
            .timeout_ms(CONFIGURATION_TIMEOUT_MS);
        let reply = engine.send(&configure);
        if !reply.is_ok() {
            warn!(state = ?reply.state, "configuration command failed");
        }

        state.set_power(PowerStatus::On);
        Ok(PowerStatus::On)
    }
}

/// Send `AT` until the modem answers, one window per attempt
fn wake(engine: &Engine, attempts: u32) -> bool {
    let window = Duration::from_millis(POWER_ON_WINDOW_MS);
    let poll = Duration::from_millis(POWER_ON_POLL_MS);
    let _waiting = engine.sink().begin_wait();

    for attempt in 1..=attempts {
        if let Err(e) = engine.write_chunked(b"AT\r") {
            warn!(error = %e, "cannot write to modem");
            return false;
        }
        if engine
            .wait_for(Instant::now() + window, poll, take_wake_reply)
            .is_some()
        {
            debug!(attempt, "modem awake");
            return true;
        }
        debug!(attempt, "no answer to AT");
    }
    false
}

fn take_wake_reply(queue: &mut VecDeque<Bytes>) -> Option<Bytes> {
    let index = queue
        .iter()
        .position(|t| &t[..] == prompts::OK.as_bytes() || &t[..] == prompts::RDY.as_bytes())?;
    queue.remove(index)
}

/// Echo off, SIM and registration reports, sleep mode, flow control and
/// baud rate, saved to the user profile
pub fn configuration_command(serial: &SerialConfig) -> String {
    let flow = if serial.rts_cts { "2,2" } else { "0,0" };
    format!(
        "ATE0;+CSMINS=1;+CREG=1;+CGREG=1;+CSCLK=2;+IFC={};+IPR={};&W0",
        flow, serial.baud_rate
    )
}

impl Modem {
    /// Queue the power-on sequence
    pub fn power_on(&self) -> Pending<PowerStatus> {
        self.submit(PowerOn::default())
    }

    /// Send the normal power-down command
    ///
    /// The modem does not answer before switching off, so nothing is
    /// awaited; the device context is reset at once.
    pub fn power_off(&self) -> Result<()> {
        self.send(&Command::new("AT+CPOWD=1").no_reply())
            .into_result()?;

        let state = self.core().state();
        state.set_power(PowerStatus::Off);
        state.set_gsm_registration(NetworkRegistrationState::Unknown);
        state.set_gprs_registration(NetworkRegistrationState::Unknown);
        state.close_all_bearers();
        state.set_ip_address(None);
        info!("modem powered off");
        Ok(())
    }

    /// Set the operating level, optionally resetting the modem
    pub fn set_phone_functionality(&self, mode: PhoneFunctionality, reset: bool) -> Result<()> {
        let text = if reset {
            format!("AT+CFUN={},1", mode as u8)
        } else {
            format!("AT+CFUN={}", mode as u8)
        };
        self.send(&Command::new(text).timeout_ms(CFUN_TIMEOUT_MS))
            .into_result()?;
        self.core().state().set_power(mode.power_status());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfig;
    use crate::state::BearerProfile;
    use crate::transport::MemoryLink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_configuration_command() {
        let serial = SerialConfig::default();
        assert_eq!(
            configuration_command(&serial),
            "ATE0;+CSMINS=1;+CREG=1;+CGREG=1;+CSCLK=2;+IFC=2,2;+IPR=115200;&W0"
        );
        let serial = SerialConfig {
            rts_cts: false,
            baud_rate: 9600,
            ..SerialConfig::default()
        };
        assert!(configuration_command(&serial).contains("+IFC=0,0;+IPR=9600;"));
    }

    #[test]
    fn test_take_wake_reply() {
        let mut q: VecDeque<Bytes> = [&b"+CREG: 0"[..], b"RDY"]
            .iter()
            .map(|t| Bytes::copy_from_slice(t))
            .collect();
        assert_eq!(take_wake_reply(&mut q).as_deref(), Some(&b"RDY"[..]));
        assert_eq!(q.len(), 1);
        assert!(take_wake_reply(&mut q).is_none());
    }

    #[test]
    fn test_power_on_sequence() {
        let link = Arc::new(MemoryLink::new());
        link.respond_with(|_| vec![b"\r\nOK\r\n".to_vec()]);
        let modem = Modem::with_link(link.clone(), ModemConfig::default()).unwrap();

        assert_eq!(modem.power_on().end().unwrap(), PowerStatus::On);
        assert_eq!(modem.state().power, PowerStatus::On);
        let written = link.written_text();
        assert!(written.starts_with("AT\rATE0\rATE0;+CSMINS=1"));
    }

    #[test]
    fn test_power_on_retries_then_gives_up() {
        let link = Arc::new(MemoryLink::new());
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        link.respond_with(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });
        let modem = Modem::with_link(link, ModemConfig::default()).unwrap();

        let outcome = modem.submit(PowerOn { attempts: 2 }).end();
        assert!(matches!(outcome, Err(ModemError::NotReady { .. })));
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        assert_eq!(modem.state().power, PowerStatus::Unknown);
    }

    #[test]
    fn test_power_off_resets_context() {
        let link = Arc::new(MemoryLink::new());
        let modem = Modem::with_link(link.clone(), ModemConfig::default()).unwrap();
        let state = modem.core().state();
        state.set_power(PowerStatus::On);
        state.set_bearer(BearerProfile::IpApps, true);
        state.set_ip_address(Some("10.0.0.2".into()));

        modem.power_off().unwrap();
        let snapshot = modem.state();
        assert_eq!(snapshot.power, PowerStatus::Off);
        assert_eq!(snapshot.bearers, [false; 3]);
        assert!(snapshot.ip_address.is_none());
        assert_eq!(link.written_text(), "AT+CPOWD=1\r");

        // refused while off
        assert_eq!(
            modem.execute("AT+CSQ").state,
            crate::protocol::ReturnedState::DeviceIsOff
        );
    }

    #[test]
    fn test_set_phone_functionality() {
        let link = Arc::new(MemoryLink::new());
        link.respond_with(|_| vec![b"\r\nOK\r\n".to_vec()]);
        let modem = Modem::with_link(link.clone(), ModemConfig::default()).unwrap();
        modem
            .set_phone_functionality(PhoneFunctionality::FlightMode, false)
            .unwrap();
        assert_eq!(modem.state().power, PowerStatus::FlightMode);
        assert_eq!(link.written_text(), "AT+CFUN=4\r");
    }
}
