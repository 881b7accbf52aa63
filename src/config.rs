//! Bridge configuration: defaults, optional JSON file, environment-variable
//! overrides (in that precedence order), then validation. Mirrors the
//! load order this codebase's lineage uses for every standalone binary's
//! config: `create_default()` -> `from_file`/`from_json` -> `load`, with
//! the environment always winning.

use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::protocol::{CANBaud, CANMode, SerialBaud};

const DEFAULT_SOCKETCAN_INTERFACE: &str = "vcan0";
const DEFAULT_USB_DEVICE_PATH: &str = "/dev/ttyUSB0";
const DEFAULT_SERIAL_BAUD: u32 = 2_000_000;
const DEFAULT_TIMEOUT_MS: u32 = 100;
const MIN_TIMEOUT_MS: u32 = 1;
const MAX_TIMEOUT_MS: u32 = 60_000;
const MAX_FILTER_MASK: u32 = 0x1FFF_FFFF;

const ENV_SOCKETCAN_INTERFACE: &str = "WAVESHARE_SOCKETCAN_INTERFACE";
const ENV_USB_DEVICE: &str = "WAVESHARE_USB_DEVICE";
const ENV_SERIAL_BAUD: &str = "WAVESHARE_SERIAL_BAUD";
const ENV_CAN_BAUD: &str = "WAVESHARE_CAN_BAUD";
const ENV_CAN_MODE: &str = "WAVESHARE_CAN_MODE";
const ENV_AUTO_RETRANSMIT: &str = "WAVESHARE_AUTO_RETRANSMIT";
const ENV_FILTER_ID: &str = "WAVESHARE_FILTER_ID";
const ENV_FILTER_MASK: &str = "WAVESHARE_FILTER_MASK";
const ENV_USB_READ_TIMEOUT: &str = "WAVESHARE_USB_READ_TIMEOUT";
const ENV_SOCKETCAN_READ_TIMEOUT: &str = "WAVESHARE_SOCKETCAN_READ_TIMEOUT";

/// Bridge startup configuration. Validated before any device is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub socketcan_interface: String,
    pub usb_device_path: String,
    pub serial_baud_rate: u32,
    pub can_baud_rate: CANBaud,
    pub can_mode: CANMode,
    pub auto_retransmit: bool,
    pub filter_id: u32,
    pub filter_mask: u32,
    pub usb_read_timeout_ms: u32,
    pub socketcan_read_timeout_ms: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            socketcan_interface: DEFAULT_SOCKETCAN_INTERFACE.to_string(),
            usb_device_path: DEFAULT_USB_DEVICE_PATH.to_string(),
            serial_baud_rate: DEFAULT_SERIAL_BAUD,
            can_baud_rate: CANBaud::Baud1M,
            can_mode: CANMode::Normal,
            auto_retransmit: true,
            filter_id: 0,
            filter_mask: 0,
            usb_read_timeout_ms: DEFAULT_TIMEOUT_MS,
            socketcan_read_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// JSON shape. Every field optional so a file only needs to mention what it
/// overrides; fields absent here keep whatever the caller's starting config
/// already had (normally `BridgeConfig::default()`).
#[derive(Debug, Default, Deserialize)]
struct RawFile {
    socketcan_interface: Option<String>,
    usb_device_path: Option<String>,
    serial_baud_rate: Option<u32>,
    can_baud_rate: Option<u32>,
    can_mode: Option<String>,
    auto_retransmit: Option<bool>,
    filter_id: Option<serde_json::Value>,
    filter_mask: Option<serde_json::Value>,
    usb_read_timeout_ms: Option<u32>,
    socketcan_read_timeout_ms: Option<u32>,
}

/// Accepts `0x...` hex or plain decimal, the same radix-0 convention used
/// for `filter_id`/`filter_mask` in both JSON and environment form.
fn parse_u32_str(s: &str) -> Result<u32, Error> {
    let trimmed = s.trim();
    let (digits, radix) = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };
    u32::from_str_radix(digits, radix)
        .map_err(|_| Error::ConfigError(format!("invalid integer: {}", s)))
}

fn parse_u32_value(value: &serde_json::Value) -> Result<u32, Error> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| Error::ConfigError(format!("invalid integer: {}", n))),
        serde_json::Value::String(s) => parse_u32_str(s),
        other => Err(Error::ConfigError(format!(
            "expected integer or string, got {}",
            other
        ))),
    }
}

fn parse_bool_truthy(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

impl BridgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Defaults overridden by a JSON document. Validates before returning.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_file(serde_json::from_str(json)?)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, raw: RawFile) -> Result<(), Error> {
        if let Some(v) = raw.socketcan_interface {
            self.socketcan_interface = v;
        }
        if let Some(v) = raw.usb_device_path {
            self.usb_device_path = v;
        }
        if let Some(v) = raw.serial_baud_rate {
            self.serial_baud_rate = v;
        }
        if let Some(v) = raw.can_baud_rate {
            self.can_baud_rate = CANBaud::from_int(v)?;
        }
        if let Some(v) = raw.can_mode {
            self.can_mode = CANMode::from_str_normalized(&v)?;
        }
        if let Some(v) = raw.auto_retransmit {
            self.auto_retransmit = v;
        }
        if let Some(v) = raw.filter_id {
            self.filter_id = parse_u32_value(&v)?;
        }
        if let Some(v) = raw.filter_mask {
            self.filter_mask = parse_u32_value(&v)?;
        }
        if let Some(v) = raw.usb_read_timeout_ms {
            self.usb_read_timeout_ms = v;
        }
        if let Some(v) = raw.socketcan_read_timeout_ms {
            self.socketcan_read_timeout_ms = v;
        }
        Ok(())
    }

    /// Applies any of the ten `WAVESHARE_*` variables that are set. Unset
    /// variables leave the current value untouched.
    fn apply_env_overrides(&mut self) -> Result<(), Error> {
        if let Ok(v) = std::env::var(ENV_SOCKETCAN_INTERFACE) {
            self.socketcan_interface = v;
        }
        if let Ok(v) = std::env::var(ENV_USB_DEVICE) {
            self.usb_device_path = v;
        }
        if let Ok(v) = std::env::var(ENV_SERIAL_BAUD) {
            self.serial_baud_rate = v
                .parse()
                .map_err(|_| Error::ConfigError(format!("invalid {}: {}", ENV_SERIAL_BAUD, v)))?;
        }
        if let Ok(v) = std::env::var(ENV_CAN_BAUD) {
            self.can_baud_rate = CANBaud::from_int(parse_u32_str(&v)?)?;
        }
        if let Ok(v) = std::env::var(ENV_CAN_MODE) {
            self.can_mode = CANMode::from_str_normalized(&v)?;
        }
        if let Ok(v) = std::env::var(ENV_AUTO_RETRANSMIT) {
            self.auto_retransmit = parse_bool_truthy(&v);
        }
        if let Ok(v) = std::env::var(ENV_FILTER_ID) {
            self.filter_id = parse_u32_str(&v)?;
        }
        if let Ok(v) = std::env::var(ENV_FILTER_MASK) {
            self.filter_mask = parse_u32_str(&v)?;
        }
        if let Ok(v) = std::env::var(ENV_USB_READ_TIMEOUT) {
            self.usb_read_timeout_ms = v.parse().map_err(|_| {
                Error::ConfigError(format!("invalid {}: {}", ENV_USB_READ_TIMEOUT, v))
            })?;
        }
        if let Ok(v) = std::env::var(ENV_SOCKETCAN_READ_TIMEOUT) {
            self.socketcan_read_timeout_ms = v.parse().map_err(|_| {
                Error::ConfigError(format!("invalid {}: {}", ENV_SOCKETCAN_READ_TIMEOUT, v))
            })?;
        }
        Ok(())
    }

    /// Full load order: defaults, then `config_path`'s JSON if given, then
    /// the environment, then validation.
    pub fn load(config_path: Option<&Path>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)?;
            let raw: RawFile = serde_json::from_str(&contents)?;
            config.apply_file(raw)?;
        }
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.socketcan_interface.trim().is_empty() {
            return Err(Error::ConfigError(
                "socketcan_interface must not be empty".to_string(),
            ));
        }
        if self.usb_device_path.trim().is_empty() {
            return Err(Error::ConfigError(
                "usb_device_path must not be empty".to_string(),
            ));
        }
        SerialBaud::new(self.serial_baud_rate)?;
        if self.usb_read_timeout_ms < MIN_TIMEOUT_MS || self.usb_read_timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::ConfigError(format!(
                "usb_read_timeout_ms out of range (1..=60000): {}",
                self.usb_read_timeout_ms
            )));
        }
        if self.socketcan_read_timeout_ms < MIN_TIMEOUT_MS
            || self.socketcan_read_timeout_ms > MAX_TIMEOUT_MS
        {
            return Err(Error::ConfigError(format!(
                "socketcan_read_timeout_ms out of range (1..=60000): {}",
                self.socketcan_read_timeout_ms
            )));
        }
        if self.filter_id > MAX_FILTER_MASK {
            return Err(Error::BadFilter(self.filter_id));
        }
        if self.filter_mask > MAX_FILTER_MASK {
            return Err(Error::BadMask(self.filter_mask));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.socketcan_interface, "vcan0");
        assert_eq!(config.can_baud_rate, CANBaud::Baud1M);
        config.validate().unwrap();
    }

    #[test]
    fn json_overrides_defaults() {
        let json = r#"{
            "socketcan_interface": "can1",
            "can_baud_rate": 3,
            "can_mode": "Loopback-Silent",
            "filter_id": "0x100",
            "filter_mask": 2047
        }"#;
        let config = BridgeConfig::from_json(json).unwrap();
        assert_eq!(config.socketcan_interface, "can1");
        assert_eq!(config.can_baud_rate, CANBaud::Baud500K);
        assert_eq!(config.can_mode, CANMode::LoopbackSilent);
        assert_eq!(config.filter_id, 0x100);
        assert_eq!(config.filter_mask, 2047);
    }

    #[test]
    fn empty_interface_fails_validation() {
        let err = BridgeConfig::from_json(r#"{"socketcan_interface": ""}"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn unsupported_serial_baud_fails_validation() {
        let err = BridgeConfig::from_json(r#"{"serial_baud_rate": 1234}"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn timeout_out_of_range_fails_validation() {
        let err = BridgeConfig::from_json(r#"{"usb_read_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file() {
        std::env::set_var(ENV_SOCKETCAN_INTERFACE, "can7");
        std::env::set_var(ENV_FILTER_ID, "0x42");
        std::env::set_var(ENV_AUTO_RETRANSMIT, "no");

        let dir = std::env::temp_dir().join(format!("bridge-config-test-{}", std::process::id()));
        std::fs::write(&dir, r#"{"socketcan_interface": "can1"}"#).unwrap();
        let config = BridgeConfig::load(Some(&dir)).unwrap();
        std::fs::remove_file(&dir).ok();

        assert_eq!(config.socketcan_interface, "can7");
        assert_eq!(config.filter_id, 0x42);
        assert!(!config.auto_retransmit);

        std::env::remove_var(ENV_SOCKETCAN_INTERFACE);
        std::env::remove_var(ENV_FILTER_ID);
        std::env::remove_var(ENV_AUTO_RETRANSMIT);
    }
}
