//! Literal vocabulary of the modem's AT dialect

// =============================================================================
// Terminal tokens
// =============================================================================

pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";
pub const CONNECT: &str = "CONNECT";
pub const SEND_PROMPT: &str = "> ";
pub const SEND_PROMPT_BARE: &str = ">";
pub const DOWNLOAD: &str = "DOWNLOAD";
pub const CME_ERROR: &str = "+CME ERROR: ";

// =============================================================================
// Socket data path
// =============================================================================

pub const RECEIVE: &str = "+RECEIVE,";
pub const DATA_ACCEPT: &str = "DATA ACCEPT:";
pub const SEND_FAIL: &str = "SEND FAIL";
pub const CONNECT_OK_MUX: &str = ", CONNECT OK";
pub const CONNECT_FAIL_MUX: &str = ", CONNECT FAIL";
pub const CLOSE_OK_MUX: &str = ", CLOSE OK";
pub const CLOSED_MUX: &str = ", CLOSED";

// =============================================================================
// Length-prefixed payload headers
// =============================================================================

pub const HTTPREAD: &str = "+HTTPREAD:";
pub const HTTPHEAD: &str = "+HTTPHEAD:";
/// Introduces an SMS whose text follows on the next line
pub const CMGR: &str = "+CMGR:";

// =============================================================================
// Unsolicited lines
// =============================================================================

pub const RDY: &str = "RDY";
pub const CREG: &str = "+CREG:";
pub const CGREG: &str = "+CGREG:";
pub const CMTI: &str = "+CMTI:";
pub const CMGS: &str = "+CMGS:";
pub const CDS: &str = "+CDS:";
pub const HTTPACTION: &str = "+HTTPACTION:";
pub const CSMINS: &str = "+CSMINS:";
pub const CMTE: &str = "+CMTE:";
pub const CNTP: &str = "+CNTP:";
pub const CFUN: &str = "+CFUN:";
pub const CPMS: &str = "+CPMS:";
pub const CPIN_READY: &str = "+CPIN: READY";
pub const CPIN_NOT_INSERTED: &str = "+CPIN: NOT INSERTED";
pub const NORMAL_POWER_DOWN: &str = "NORMAL POWER DOWN";
pub const CALL_READY: &str = "Call Ready";
pub const SMS_READY: &str = "SMS Ready";
pub const PDP_DEACT: &str = "+PDP: DEACT";
pub const SAPBR_DEACT: &str = "+SAPBR 1: DEACT";
// The firmware really spells it WARNNING.
pub const UNDER_VOLTAGE_WARNING: &str = "UNDER-VOLTAGE WARNNING";
pub const OVER_VOLTAGE_WARNING: &str = "OVER-VOLTAGE WARNNING";
/// Arrives without a leading CR LF
pub const UNDER_VOLTAGE_POWER_DOWN: &str = "UNDER-VOLTAGE POWER DOWN";
/// Arrives without a leading CR LF
pub const OVER_VOLTAGE_POWER_DOWN: &str = "OVER-VOLTAGE POWER DOWN";

// =============================================================================
// Command stems
// =============================================================================

pub const CIFSR: &str = "AT+CIFSR";
pub const CFUN_COMMAND: &str = "+CFUN";
pub const CPOWD_COMMAND: &str = "+CPOWD";

/// True when `text` has the shape of a dotted IPv4 address
///
/// Only the shape is checked (four non-empty dot-separated groups), which is
/// how the modem's address reply is told apart from other lines.
pub fn looks_like_ip_address(text: &str) -> bool {
    let groups: Vec<&str> = text.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit()))
}
