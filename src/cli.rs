//! Command line of `sim800ctl`
//!
//! Global options pick the port and config file; each subcommand opens the
//! modem, does one thing, and shuts the driver down.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Drive a SIM800 modem over its serial port
#[derive(Parser, Debug, Default)]
#[command(name = "sim800ctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: sim800.toml if present)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Serial port to use (overrides config)
    #[arg(long, value_name = "PORT", global = true)]
    pub port: Option<String>,

    /// Baud rate (overrides config)
    #[arg(long, value_name = "BAUD", global = true)]
    pub baud: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List serial ports
    Ports,

    /// Wake the modem and write the driver configuration
    PowerOn,

    /// Send one AT command and print the reply
    At {
        /// Command text, e.g. "AT+CSQ"
        command: String,

        /// Reply budget in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        timeout_ms: u64,

        /// Print the data line preceding OK
        #[arg(short, long)]
        raw: bool,
    },

    /// Print model, firmware, IMEI, operator, signal and supply voltage
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print modem events as they arrive
    Monitor {
        /// Stop after this many seconds (default: run until killed)
        #[arg(short, long, value_name = "SECS")]
        seconds: Option<u64>,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["sim800ctl"]);
        assert!(!cli.verbose);
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_global_options_after_subcommand() {
        let cli = Cli::parse_from(["sim800ctl", "info", "--port", "/dev/ttyS1", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.port, Some("/dev/ttyS1".to_string()));
        assert_eq!(cli.command, Some(Command::Info { json: false }));
    }

    #[test]
    fn test_cli_parse_at() {
        let cli = Cli::parse_from(["sim800ctl", "at", "AT+CSQ", "--raw", "-t", "2000"]);
        match cli.command {
            Some(Command::At {
                command,
                timeout_ms,
                raw,
            }) => {
                assert_eq!(command, "AT+CSQ");
                assert_eq!(timeout_ms, 2000);
                assert!(raw);
            }
            _ => panic!("Expected At command"),
        }
    }

    #[test]
    fn test_cli_parse_power_on_and_monitor() {
        let cli = Cli::parse_from(["sim800ctl", "power-on", "--baud", "9600"]);
        assert_eq!(cli.command, Some(Command::PowerOn));
        assert_eq!(cli.baud, Some(9600));

        let cli = Cli::parse_from(["sim800ctl", "monitor", "-s", "30"]);
        assert_eq!(cli.command, Some(Command::Monitor { seconds: Some(30) }));
    }
}
