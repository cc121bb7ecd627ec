//! Configuration management
//!
//! The driver is configured from a TOML file (`sim800.toml` by default).
//! Every section is optional; missing fields take the defaults below.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [sockets]
//! max_sockets = 6
//!
//! [apn]
//! name = "internet"
//! ```

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_MAX_SOCKETS, MAX_SOCKETS_LIMIT,
    PAYLOAD_STALL_MS, SOCKET_STALL_MS, SOCKET_WAIT_BUDGET_MS,
};
use crate::error::{ModemError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "sim800.toml";

// =============================================================================
// Modem Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModemConfig {
    pub serial: SerialConfig,
    pub sockets: SocketsConfig,
    pub timeouts: TimeoutsConfig,
    /// Access point for sockets and IP applications
    pub apn: Option<AccessPointConfig>,
    /// Access point for MMS
    pub mms_apn: Option<AccessPointConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port name (empty = none configured)
    pub port: String,
    pub baud_rate: u32,
    /// RTS/CTS hardware flow control on both ends
    pub rts_cts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketsConfig {
    /// Size of the socket table (1 to 6)
    pub max_sockets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Default reply budget of a command
    pub command_ms: u64,
    /// Budget for socket connect, receive and send confirmation
    pub socket_ms: u64,
    /// Stall limit inside an HTTP payload
    pub payload_stall_ms: u64,
    /// Stall limit inside socket data
    pub socket_stall_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccessPointConfig {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            rts_cts: true,
        }
    }
}

impl Default for SocketsConfig {
    fn default() -> Self {
        Self {
            max_sockets: DEFAULT_MAX_SOCKETS,
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            command_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            socket_ms: SOCKET_WAIT_BUDGET_MS,
            payload_stall_ms: PAYLOAD_STALL_MS,
            socket_stall_ms: SOCKET_STALL_MS,
        }
    }
}

impl TimeoutsConfig {
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    pub fn socket(&self) -> Duration {
        Duration::from_millis(self.socket_ms)
    }

    pub fn payload_stall(&self) -> Duration {
        Duration::from_millis(self.payload_stall_ms)
    }

    pub fn socket_stall(&self) -> Duration {
        Duration::from_millis(self.socket_stall_ms)
    }
}

impl AccessPointConfig {
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() || !self.password.is_empty()
    }
}

impl ModemConfig {
    /// Reject values the modem or the driver cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SOCKETS_LIMIT).contains(&self.sockets.max_sockets) {
            return Err(ModemError::ConfigValidation {
                field: "sockets.max_sockets",
                reason: format!(
                    "{} is outside 1..={}",
                    self.sockets.max_sockets, MAX_SOCKETS_LIMIT
                ),
            });
        }
        if self.serial.baud_rate == 0 {
            return Err(ModemError::ConfigValidation {
                field: "serial.baud_rate",
                reason: "must not be 0".into(),
            });
        }
        if self.timeouts.payload_stall_ms == 0 || self.timeouts.socket_stall_ms == 0 {
            return Err(ModemError::ConfigValidation {
                field: "timeouts",
                reason: "stall timeouts must not be 0".into(),
            });
        }
        for (field, apn) in [("apn.name", &self.apn), ("mms_apn.name", &self.mms_apn)] {
            if apn.as_ref().is_some_and(|a| a.name.is_empty()) {
                return Err(ModemError::ConfigValidation {
                    field,
                    reason: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Load / Save
// =============================================================================

/// Load and validate config from `path`
pub fn load(path: &Path) -> Result<ModemConfig> {
    let content = fs::read_to_string(path).map_err(|e| ModemError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: ModemConfig =
        toml::from_str(&content).map_err(|e| ModemError::ConfigValidation {
            field: "config",
            reason: format!("{}: {}", path.display(), e),
        })?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path` (or the default file), falling back to defaults
///
/// A missing default file is normal; a missing explicit file or a broken
/// one is reported with `warn!` and replaced by defaults.
pub fn load_or_default(path: Option<&Path>) -> ModemConfig {
    let explicit = path.is_some();
    let path: PathBuf = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

    if !explicit && !path.exists() {
        return ModemConfig::default();
    }
    match load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Config error in {:?}: {}, using defaults", path, e);
            ModemConfig::default()
        }
    }
}

/// Save config to `path`
pub fn save(path: &Path, config: &ModemConfig) -> Result<()> {
    let content =
        toml::to_string_pretty(config).map_err(|e| ModemError::ConfigValidation {
            field: "config",
            reason: e.to_string(),
        })?;
    fs::write(path, content).map_err(|e| ModemError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sim800-link-{}-{}.toml", name, std::process::id()))
    }

    #[test]
    fn test_default_config_values() {
        let config = ModemConfig::default();
        assert_eq!(config.serial.port, "");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert!(config.serial.rts_cts);
        assert_eq!(config.sockets.max_sockets, 6);
        assert_eq!(config.timeouts.command_ms, 1000);
        assert_eq!(config.timeouts.socket_ms, 15_000);
        assert_eq!(config.timeouts.payload_stall(), Duration::from_secs(3));
        assert_eq!(config.timeouts.socket_stall(), Duration::from_secs(2));
        assert!(config.apn.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_empty_file() {
        let config: ModemConfig = toml::from_str("").unwrap();
        assert_eq!(config, ModemConfig::default());
    }

    #[test]
    fn test_config_partial_sections() {
        let toml_str = r#"
            [serial]
            port = "/dev/ttyUSB0"

            [apn]
            name = "internet"
        "#;
        let config: ModemConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, DEFAULT_BAUD_RATE);
        let apn = config.apn.unwrap();
        assert_eq!(apn.name, "internet");
        assert!(!apn.has_credentials());
    }

    #[test]
    fn test_config_validate_rejects_bad_values() {
        let mut config = ModemConfig::default();
        config.sockets.max_sockets = 7;
        assert!(matches!(
            config.validate(),
            Err(ModemError::ConfigValidation {
                field: "sockets.max_sockets",
                ..
            })
        ));

        let mut config = ModemConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = ModemConfig::default();
        config.timeouts.socket_stall_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ModemConfig::default();
        config.apn = Some(AccessPointConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load_roundtrip() {
        let path = temp_path("roundtrip");
        let mut config = ModemConfig::default();
        config.serial.port = "COM4".into();
        config.sockets.max_sockets = 3;
        config.mms_apn = Some(AccessPointConfig {
            name: "mms".into(),
            user: "u".into(),
            password: "p".into(),
        });

        save(&path, &config).unwrap();
        let loaded = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_invalid_file() {
        let path = temp_path("invalid");
        fs::write(&path, "[sockets]\nmax_sockets = 0\n").unwrap();
        let result = load(&path);
        let fallback = load_or_default(Some(&path));
        let _ = fs::remove_file(&path);
        assert!(result.is_err());
        assert_eq!(fallback, ModemConfig::default());
    }

    #[test]
    fn test_config_load_missing_file() {
        let path = temp_path("missing");
        assert!(matches!(load(&path), Err(ModemError::Io { .. })));
    }
}
