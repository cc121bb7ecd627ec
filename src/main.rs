//! sim800ctl - drive a SIM800 modem from the command line
//!
//! Usage:
//!   sim800ctl ports                   List serial ports
//!   sim800ctl --port /dev/ttyS1 info  Print device information
//!   sim800ctl at "AT+CSQ" --raw       Send one command
//!   sim800ctl power-on                Wake and configure the modem
//!   sim800ctl monitor -s 60           Print events for a minute

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use sim800_link::config::{self, ModemConfig, DEFAULT_CONFIG_FILE};
use sim800_link::logging::init_tracing;
use sim800_link::protocol;
use sim800_link::transport::serial::available_ports;
use sim800_link::Modem;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command.as_ref() else {
        bail!("no command given, see --help");
    };

    if *command == Command::Ports {
        return list_ports();
    }

    let config = resolve_config(&cli);
    let mut modem = Modem::open(config).context("cannot open modem")?;

    let outcome = match command {
        Command::Ports => Ok(()),
        Command::PowerOn => power_on(&modem),
        Command::At {
            command,
            timeout_ms,
            raw,
        } => send_at(&modem, command, *timeout_ms, *raw),
        Command::Info { json } => print_info(&modem, *json),
        Command::Monitor { seconds } => monitor(&modem, *seconds),
    };

    modem.shutdown();
    outcome
}

/// Config file plus command-line overrides
fn resolve_config(cli: &Cli) -> ModemConfig {
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    let path = cli
        .config
        .as_deref()
        .or_else(|| default_path.exists().then_some(default_path));

    let mut config = config::load_or_default(path);
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    config
}

fn list_ports() -> Result<()> {
    let ports = available_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

fn power_on(modem: &Modem) -> Result<()> {
    let status = modem.power_on().end().context("power-on failed")?;
    println!("power: {:?}", status);
    Ok(())
}

fn send_at(modem: &Modem, text: &str, timeout_ms: u64, raw: bool) -> Result<()> {
    let mut command = protocol::Command::new(text).timeout_ms(timeout_ms);
    if raw {
        command = command.raw();
    }
    let reply = modem.send(&command);
    if !reply.response.is_empty() {
        println!("{}", reply.text());
    }
    println!("{:?}", reply.state);
    Ok(())
}

fn print_info(modem: &Modem, json: bool) -> Result<()> {
    let info = modem.device_info().context("device query failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    println!("model:     {}", info.model);
    println!("firmware:  {}", info.firmware);
    println!("imei:      {}", info.imei);
    println!("operator:  {}", info.operator);
    println!("signal:    {:?}", info.signal);
    println!("sim:       {:?}", info.pin);
    println!("supply:    {} mV", info.supply_voltage_mv);
    if let Some(clock) = info.clock {
        println!("clock:     {}", clock);
    }
    Ok(())
}

fn monitor(modem: &Modem, seconds: Option<u64>) -> Result<()> {
    modem.subscribe(|event| println!("{:?}", event));
    match seconds {
        Some(s) => std::thread::sleep(Duration::from_secs(s)),
        None => loop {
            std::thread::park();
        },
    }
    Ok(())
}
