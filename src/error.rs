//! Centralized error types for the driver
//!
//! All driver errors are represented by the `ModemError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, ModemError>`.
//!
//! Transactions themselves never fail with an error: they report a
//! [`ReturnedState`](crate::protocol::ReturnedState). Facility calls that
//! need a value turn a non-`Ok` transaction into [`ModemError::Command`].

use crate::protocol::ReturnedState;
use std::fmt;
use std::path::PathBuf;

/// All driver errors
#[derive(Debug)]
pub enum ModemError {
    // === Transport ===
    /// Failed to open serial port
    SerialOpen {
        port: String,
        source: std::io::Error,
    },
    /// Read or write on the physical link failed
    Link { source: std::io::Error },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Protocol ===
    /// A transaction ended with something other than `Ok`
    Command { state: ReturnedState, detail: String },
    /// The modem answered, but not in the expected shape
    UnexpectedResponse {
        command: &'static str,
        response: String,
    },

    // === Sockets ===
    /// Every handle in the socket table is in use
    TooManyOpenSockets,
    /// The requested transport protocol is not available on the modem
    ProtocolNotSupported { protocol: &'static str },
    /// The socket was disposed (closed by the peer or by the caller)
    SocketDisposed { handle: usize },
    /// The connection never reached the connected state
    NotConnected { handle: usize },
    /// The modem did not confirm the payload
    SendFailed { handle: usize },

    // === Runtime ===
    /// The modem is not in a state that allows the operation
    NotReady { reason: &'static str },
    /// An asynchronous operation panicked while processing
    OperationPanicked { message: String },
    /// A worker thread could not be started
    ThreadSpawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl ModemError {
    /// Build a `Command` error from a transaction outcome
    pub fn command(state: ReturnedState, detail: impl Into<String>) -> Self {
        Self::Command {
            state,
            detail: detail.into(),
        }
    }
}

impl std::error::Error for ModemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SerialOpen { source, .. }
            | Self::Link { source }
            | Self::Io { source, .. }
            | Self::ThreadSpawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialOpen { port, .. } => write!(f, "Cannot open serial port: {}", port),
            Self::Link { source } => write!(f, "Serial link failure: {}", source),
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Command { state, detail } if detail.is_empty() => {
                write!(f, "Command failed: {:?}", state)
            }
            Self::Command { state, detail } => {
                write!(f, "Command failed: {:?} ({})", state, detail)
            }
            Self::UnexpectedResponse { command, response } => {
                write!(f, "Unexpected response to {}: {:?}", command, response)
            }
            Self::TooManyOpenSockets => write!(f, "Too many open sockets"),
            Self::ProtocolNotSupported { protocol } => {
                write!(f, "{} sockets are not supported", protocol)
            }
            Self::SocketDisposed { handle } => write!(f, "Socket {} is disposed", handle),
            Self::NotConnected { handle } => write!(f, "Socket {} is not connected", handle),
            Self::SendFailed { handle } => write!(f, "Send failed on socket {}", handle),
            Self::NotReady { reason } => write!(f, "Modem not ready: {}", reason),
            Self::OperationPanicked { message } => {
                write!(f, "Async operation panicked: {}", message)
            }
            Self::ThreadSpawn { name, .. } => write!(f, "Cannot start {} thread", name),
        }
    }
}

/// Alias for Result with ModemError
pub type Result<T> = std::result::Result<T, ModemError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_command_error_display_with_detail() {
        let err = ModemError::command(ReturnedState::Error, "SIM not inserted");
        assert_eq!(err.to_string(), "Command failed: Error (SIM not inserted)");
    }

    #[test]
    fn test_command_error_display_without_detail() {
        let err = ModemError::command(ReturnedState::NoReply, "");
        assert_eq!(err.to_string(), "Command failed: NoReply");
    }

    #[test]
    fn test_serial_open_exposes_source() {
        let err = ModemError::SerialOpen {
            port: "/dev/ttyS0".into(),
            source: std::io::Error::other("busy"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/dev/ttyS0"));
    }

    #[test]
    fn test_socket_errors_have_no_source() {
        assert!(ModemError::TooManyOpenSockets.source().is_none());
        assert!(ModemError::SendFailed { handle: 3 }.source().is_none());
    }
}
