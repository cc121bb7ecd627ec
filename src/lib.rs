//! SIM800 modem driver core
//!
//! One serial link carries both AT-command replies and multiplexed socket
//! payloads. This crate splits that stream apart and serializes access to
//! it:
//!
//! - **demux**: turns the byte stream into response tokens and per-socket
//!   payload chunks
//! - **engine**: runs one command/response transaction at a time
//! - **classifier**: turns unsolicited lines into state changes and events
//! - **scheduler**: runs queued operations with exclusive use of the channel
//! - **socket**: up to six TCP/UDP connections over GPRS
//!
//! ```no_run
//! use sim800_link::{Modem, ModemConfig};
//!
//! let mut config = ModemConfig::default();
//! config.serial.port = "/dev/ttyS1".into();
//! let modem = Modem::open(config)?;
//! modem.power_on().end()?;
//! println!("{:?}", modem.signal_strength()?);
//! # Ok::<(), sim800_link::ModemError>(())
//! ```

pub mod channel_lock;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod demux;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod gprs;
pub mod logging;
pub mod modem;
pub mod power;
pub mod protocol;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod socket;
pub mod state;
pub mod transport;

pub use config::ModemConfig;
pub use device::{DeviceInfo, PinState, SignalStrength};
pub use error::{ModemError, Result};
pub use events::Event;
pub use gprs::{BearerStatus, ConnectGprsResult, GprsProvider, OpenBearerResult};
pub use modem::{Modem, ModemCore};
pub use power::PhoneFunctionality;
pub use protocol::{AtResponse, Command, ReturnedState};
pub use scheduler::{AsyncOperation, Pending};
pub use socket::{ConnectionStatus, GprsSocket, Protocol};
pub use state::{BearerProfile, DeviceSnapshot, NetworkRegistrationState, PowerStatus};
