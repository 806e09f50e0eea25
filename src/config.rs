//! Configuration for the gateway.
//!
//! Two layers, both immutable after startup:
//! - Process settings from environment variables (with optional `.env`
//!   support provided by the caller): database, retry policy, paths.
//! - The gateway file (`GATEWAY_CONFIG`, TOML): the devices to poll,
//!   each with its register map and alarm rules. The register map must
//!   match the firmware's advertised block layout; the acquisition loop
//!   treats a length mismatch at poll time as fatal.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::models::Direction;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Path of the TOML gateway file (devices, registers, alarms).
    pub gateway_config: String,

    /// Poll attempts per cycle before the cycle is abandoned.
    pub poll_retry_max: u32,

    /// Base of the linear backoff between poll attempts.
    pub poll_retry_backoff: Duration,
}

/// Load process settings from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `GATEWAY_CONFIG` – gateway file path (default: `gateway.toml`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `POLL_RETRY_MAX` – poll attempts per cycle (default: 3)
/// - `POLL_RETRY_BACKOFF_MS` – linear backoff base (default: 250)
pub fn load_from_env() -> Result<Settings> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let gateway_config =
        env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let poll_retry_max = parse_env_u32!("POLL_RETRY_MAX", 3);
    let backoff_ms = parse_env_u32!("POLL_RETRY_BACKOFF_MS", 250);

    if poll_retry_max == 0 {
        bail!("POLL_RETRY_MAX must be at least 1");
    }

    Ok(Settings {
        db_url,
        db_pool_max,
        gateway_config,
        poll_retry_max,
        poll_retry_backoff: Duration::from_millis(u64::from(backoff_ms)),
    })
}

impl Settings {
    /// Log the loaded settings, masking the database password.
    pub fn log_config(&self) {
        // ---
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", masked_db_url);
        tracing::info!("  GATEWAY_CONFIG        : {}", self.gateway_config);
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  POLL_RETRY_MAX        : {}", self.poll_retry_max);
        tracing::info!("  POLL_RETRY_BACKOFF_MS : {}", self.poll_retry_backoff.as_millis());
    }
}

// ---

/// The full gateway file: every device this process polls.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub devices: Vec<DeviceConfig>,
}

/// One polled device and its static register/alarm configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    // ---
    pub id: String,
    pub port: String,
    pub baud_rate: u32,
    pub slave: u8,
    #[serde(default)]
    pub start_offset: u16,
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub registers: Vec<RegisterDef>,
    #[serde(default)]
    pub alarms: Vec<AlarmRuleDef>,
}

/// Register index → semantic name and unit.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDef {
    pub index: u16,
    pub name: String,
    pub unit: String,
}

/// Threshold rule for one register.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmRuleDef {
    // ---
    pub register: u16,
    pub threshold: f64,
    pub direction: Direction,
    #[serde(default = "default_debounce")]
    pub debounce: u32,
    pub label: String,
}

fn default_poll_period_secs() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_debounce() -> u32 {
    3
}

impl GatewayConfig {
    /// Load and validate the gateway file.
    pub fn load(path: &str) -> Result<GatewayConfig> {
        // ---
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read gateway config '{path}'"))?;
        let config: GatewayConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse gateway config '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn validate(&self) -> Result<()> {
        // ---
        if self.devices.is_empty() {
            bail!("gateway config declares no devices");
        }

        for device in &self.devices {
            if device.registers.is_empty() {
                bail!("device '{}' declares no registers", device.id);
            }
            if device.poll_period_secs == 0 {
                bail!("device '{}': poll_period_secs must be at least 1", device.id);
            }

            // The block is read as one contiguous transaction, so the
            // map must be contiguous from start_offset.
            for (i, reg) in device.registers.iter().enumerate() {
                let expected = device.start_offset + i as u16;
                if reg.index != expected {
                    bail!(
                        "device '{}': register map must be contiguous from offset {}; \
                         entry {} has index {} (expected {})",
                        device.id,
                        device.start_offset,
                        i,
                        reg.index,
                        expected
                    );
                }
            }

            for rule in &device.alarms {
                if !device.registers.iter().any(|r| r.index == rule.register) {
                    bail!(
                        "device '{}': alarm '{}' references unmapped register {}",
                        device.id,
                        rule.label,
                        rule.register
                    );
                }
                if rule.debounce == 0 {
                    bail!(
                        "device '{}': alarm '{}' must have debounce >= 1",
                        device.id,
                        rule.label
                    );
                }
            }
        }

        Ok(())
    }
}

impl DeviceConfig {
    pub fn register(&self, index: u16) -> Option<&RegisterDef> {
        self.registers.iter().find(|r| r.index == index)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const SAMPLE: &str = r#"
        [[devices]]
        id = "motor-a"
        port = "/dev/ttyUSB0"
        baud_rate = 9600
        slave = 1

          [[devices.registers]]
          index = 0
          name = "motor_temperature"
          unit = "celsius"

          [[devices.registers]]
          index = 1
          name = "noise_level"
          unit = "decibel"

          [[devices.alarms]]
          register = 0
          threshold = 75.0
          direction = "above"
          label = "Motor overtemperature"
    "#;

    fn parse(toml_text: &str) -> Result<GatewayConfig> {
        // ---
        let config: GatewayConfig = toml::from_str(toml_text)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn parses_reference_shape_with_defaults() {
        // ---
        let config = parse(SAMPLE).unwrap();
        let device = config.device("motor-a").unwrap();

        assert_eq!(device.slave, 1);
        assert_eq!(device.start_offset, 0);
        assert_eq!(device.poll_period_secs, 5);
        assert_eq!(device.request_timeout_ms, 1000);
        assert_eq!(device.registers.len(), 2);
        assert_eq!(device.alarms[0].debounce, 3);
        assert_eq!(device.alarms[0].direction, Direction::Above);
        assert!(config.device("no-such-device").is_none());
    }

    #[test]
    fn rejects_alarm_on_unmapped_register() {
        // ---
        let bad = SAMPLE.replace("register = 0", "register = 9");
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("unmapped register 9"), "got: {err}");
    }

    #[test]
    fn rejects_gaps_in_register_map() {
        // ---
        let bad = SAMPLE.replace("index = 1", "index = 4");
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("contiguous"), "got: {err}");
    }

    #[test]
    fn rejects_zero_debounce() {
        // ---
        let bad = SAMPLE.replace("label = \"Motor overtemperature\"",
                                 "label = \"Motor overtemperature\"\n          debounce = 0");
        let err = parse(&bad).unwrap_err().to_string();
        assert!(err.contains("debounce"), "got: {err}");
    }
}
