//! Driver-wide constants
//!
//! Timing values here are part of the modem's observable protocol contract:
//! poll cadences and budgets match what the firmware expects.

// =============================================================================
// Serial
// =============================================================================

/// Default UART speed the modem is configured for
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout on the physical link (milliseconds)
pub const READ_TIMEOUT_MS: u64 = 10;

/// Reader scratch size for one burst
pub const READ_BUFFER_SIZE: usize = 1024;

/// Largest single write the modem UART accepts
pub const WRITE_CHUNK_SIZE: usize = 64;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

// =============================================================================
// Timing - Transaction Engine
// =============================================================================

/// Default reply budget for a command (milliseconds)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1000;

/// Cadence at which a waiting transaction re-examines the response sink
pub const RESPONSE_POLL_MS: u64 = 100;

/// Cadence at which a blocked caller retries the exclusive channel lock
pub const LOCK_POLL_MS: u64 = 10;

/// Idle sleep of the scheduler worker when nothing can run
pub const SCHEDULER_IDLE_MS: u64 = 10;

/// Idle wait of the line classifier between sink checks
pub const CLASSIFIER_IDLE_MS: u64 = 100;

// =============================================================================
// Timing - Demultiplexer
// =============================================================================

/// Stall limit for HTTP read/head payloads (milliseconds)
pub const PAYLOAD_STALL_MS: u64 = 3000;

/// Stall limit for socket data payloads (milliseconds)
pub const SOCKET_STALL_MS: u64 = 2000;

// =============================================================================
// Sockets
// =============================================================================

/// Hard limit of multiplexed connections on the modem
pub const MAX_SOCKETS_LIMIT: usize = 6;

/// Default size of the socket table
pub const DEFAULT_MAX_SOCKETS: usize = 6;

/// Budget for a socket to connect or for its buffer to fill (milliseconds)
pub const SOCKET_WAIT_BUDGET_MS: u64 = 15_000;

/// Cadence while waiting for a socket to reach `Connected`
pub const SOCKET_STATUS_POLL_MS: u64 = 100;

/// Cadence while waiting for inbound socket bytes
pub const SOCKET_RECEIVE_POLL_MS: u64 = 100;

/// Cadence while waiting for `DATA ACCEPT`
pub const SOCKET_ACCEPT_POLL_MS: u64 = 250;

/// Reply budget of `AT+CIPSEND`
pub const CIPSEND_TIMEOUT_MS: u64 = 1000;

/// Reply budget of `AT+CIPSTART`
pub const CIPSTART_TIMEOUT_MS: u64 = 500;

/// Reply budget of `AT+CIPCLOSE`
pub const CIPCLOSE_TIMEOUT_MS: u64 = 500;

// =============================================================================
// Power
// =============================================================================

/// Window to wait for the wake-up prompt after each `AT`
pub const POWER_ON_WINDOW_MS: u64 = 3000;

/// Cadence while waiting for the wake-up prompt
pub const POWER_ON_POLL_MS: u64 = 500;

/// Wake-up windows before giving up
pub const POWER_ON_ATTEMPTS: u32 = 5;

/// Reply budget of the combined configuration command
pub const CONFIGURATION_TIMEOUT_MS: u64 = 4000;

/// Reply budget of `AT+CFUN`
pub const CFUN_TIMEOUT_MS: u64 = 3000;

// =============================================================================
// GPRS
// =============================================================================

/// Reply budget of `AT+CIICR` (bring up wireless connection)
pub const CIICR_TIMEOUT_MS: u64 = 85_000;

/// Reply budget of `AT+CIFSR` (local address)
pub const CIFSR_TIMEOUT_MS: u64 = 5000;

/// Reply budget of setup commands (`CIPMUX`, `CSTT`, `CIPSTATUS`)
pub const SETUP_TIMEOUT_MS: u64 = 5000;

/// Pause before the single retry of a setup command
pub const RETRY_PAUSE_MS: u64 = 2000;

/// Reply budget of `AT+SAPBR=0|1`
pub const BEARER_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Reply budget of `AT+SAPBR=2` (bearer query)
pub const BEARER_QUERY_TIMEOUT_MS: u64 = 3000;

/// Budget for a bearer to report open
pub const BEARER_OPEN_BUDGET_MS: u64 = 10_000;

/// Cadence while polling bearer status
pub const BEARER_POLL_MS: u64 = 500;
