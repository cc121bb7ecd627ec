//! UART link to the modem
//!
//! The port is opened once and cloned: the reader thread keeps one handle
//! busy in short timed reads while writers use the other.

use super::Link;
use crate::config::SerialConfig;
use crate::constants::READ_TIMEOUT_MS;
use crate::error::{ModemError, Result};
use parking_lot::Mutex;
use serialport::{ClearBuffer, FlowControl, SerialPort, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Serial port link
///
/// # Example
///
/// ```ignore
/// let link = SerialLink::open(&config.serial)?;
/// let modem = Modem::with_link(Arc::new(link), config)?;
/// ```
pub struct SerialLink {
    port_name: String,
    reader: Mutex<Box<dyn SerialPort>>,
    writer: Mutex<Box<dyn SerialPort>>,
}

impl SerialLink {
    /// Open the configured port
    ///
    /// Hardware flow control follows `rts_cts`; the modem side is set to
    /// match by the power-on configuration command.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port_name = config.port.clone();
        let map_err = |e: serialport::Error| ModemError::SerialOpen {
            port: port_name.clone(),
            source: io::Error::other(e.to_string()),
        };

        let flow = if config.rts_cts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let reader = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .flow_control(flow)
            .open()
            .map_err(map_err)?;
        let writer = reader.try_clone().map_err(map_err)?;

        debug!(port = %config.port, baud = config.baud_rate, ?flow, "serial link open");
        Ok(Self {
            port_name: config.port.clone(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }
}

impl Link for SerialLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().read(buf)
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut port = self.writer.lock();
        port.write_all(data)?;
        port.flush()
    }

    fn bytes_to_read(&self) -> io::Result<usize> {
        let pending = self.writer.lock().bytes_to_read()?;
        Ok(pending as usize)
    }

    fn clear_input(&self) -> io::Result<()> {
        self.writer.lock().clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

/// A serial port found on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListing {
    pub name: String,
    pub description: String,
}

/// List serial ports for the `ports` command
pub fn available_ports() -> Vec<PortListing> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(describe_port)
        .collect()
}

fn describe_port(info: SerialPortInfo) -> PortListing {
    let description = match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{} ({:04x}:{:04x})", product, usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    };
    PortListing {
        name: info.port_name,
        description,
    }
}
