//! Diagnostic output
//!
//! The driver logs through `tracing` and never installs a subscriber itself.
//! Binaries call [`init_tracing`] once; library users bring their own.
//!
//! Levels used by the driver:
//! - `trace`: raw bursts from the link
//! - `debug`: every command sent and token received
//! - `info`: power, registration and bearer transitions
//! - `warn`: partial payloads, dropped socket data, malformed lines

/// Initialize tracing output for the command-line tool
///
/// Call early in main() before any logging occurs.
/// `RUST_LOG` overrides the level picked by `verbose`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}
