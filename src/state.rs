//! Device context: power, registration, SIM, bearers and address
//!
//! One `DeviceState` lives in each modem core and is shared by the engine,
//! the classifier and the facility operations. Every setter publishes an
//! event, but only when the value actually changes.

use crate::events::{Event, EventBus};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerStatus {
    #[default]
    Unknown,
    On,
    Off,
    FlightMode,
    Minimum,
    PowerOnSequenceIsRunning,
}

/// Registration status as reported by `+CREG` / `+CGREG`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkRegistrationState {
    NotSearching,
    Registered,
    Searching,
    RegistrationDenied,
    #[default]
    Unknown,
    Roaming,
    Error,
}

impl NetworkRegistrationState {
    /// Map the `<stat>` field
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::NotSearching,
            1 => Self::Registered,
            2 => Self::Searching,
            3 => Self::RegistrationDenied,
            4 => Self::Unknown,
            5 => Self::Roaming,
            _ => Self::Error,
        }
    }

    /// Home network or roaming
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered | Self::Roaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimCardStatus {
    #[default]
    Unknown,
    Inserted,
    Removed,
}

/// Bearer (PDP context) profiles used by the facilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BearerProfile {
    Sockets = 0,
    IpApps = 1,
    Mms = 2,
}

impl BearerProfile {
    pub const ALL: [BearerProfile; 3] = [Self::Sockets, Self::IpApps, Self::Mms];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Point-in-time copy of the device context
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSnapshot {
    pub power: PowerStatus,
    pub gsm_registration: NetworkRegistrationState,
    pub gprs_registration: NetworkRegistrationState,
    pub sim: SimCardStatus,
    pub bearers: [bool; 3],
    pub ip_address: Option<String>,
}

impl DeviceSnapshot {
    pub fn bearer_open(&self, profile: BearerProfile) -> bool {
        self.bearers[profile.index()]
    }
}

pub struct DeviceState {
    inner: RwLock<DeviceSnapshot>,
    bus: Arc<EventBus>,
}

impl DeviceState {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(DeviceSnapshot::default()),
            bus,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.inner.read().clone()
    }

    pub fn power(&self) -> PowerStatus {
        self.inner.read().power
    }

    pub fn bearer_open(&self, profile: BearerProfile) -> bool {
        self.inner.read().bearer_open(profile)
    }

    pub fn ip_address(&self) -> Option<String> {
        self.inner.read().ip_address.clone()
    }

    pub fn set_power(&self, status: PowerStatus) {
        if replace(&mut self.inner.write().power, status) {
            info!(?status, "power status");
            self.bus.publish(Event::PowerStatusChanged(status));
        }
    }

    pub fn set_gsm_registration(&self, state: NetworkRegistrationState) {
        if replace(&mut self.inner.write().gsm_registration, state) {
            info!(?state, "gsm registration");
            self.bus.publish(Event::GsmRegistrationChanged(state));
        }
    }

    pub fn set_gprs_registration(&self, state: NetworkRegistrationState) {
        if replace(&mut self.inner.write().gprs_registration, state) {
            info!(?state, "gprs registration");
            self.bus.publish(Event::GprsRegistrationChanged(state));
        }
    }

    pub fn set_sim_status(&self, status: SimCardStatus) {
        if replace(&mut self.inner.write().sim, status) {
            info!(?status, "sim card");
            self.bus.publish(Event::SimCardStatusChanged(status));
        }
    }

    pub fn set_bearer(&self, profile: BearerProfile, open: bool) {
        if replace(&mut self.inner.write().bearers[profile.index()], open) {
            info!(?profile, open, "bearer");
            self.bus
                .publish(Event::BearerStateChanged { profile, open });
        }
    }

    pub fn close_all_bearers(&self) {
        for profile in BearerProfile::ALL {
            self.set_bearer(profile, false);
        }
    }

    pub fn set_ip_address(&self, address: Option<String>) {
        self.inner.write().ip_address = address;
    }
}

/// Store `value`, returning whether it differed
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
