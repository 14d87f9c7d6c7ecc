//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/fixture_switch.toml`)
//! 2. environment variables prefixed with `FIXTURE_SWITCH_`, nested keys
//!    separated by `__` (e.g. `FIXTURE_SWITCH_SWITCH__PIN_COUNT=64`)
//!
//! # Example
//! ```no_run
//! use fixture_switch::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Switch at {}", config.switch.address);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::SwitchError;
use crate::matrix::MAX_PINS;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/fixture_switch.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "FIXTURE_SWITCH_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Switch mainframe settings
    pub switch: SwitchConfig,
    /// Source/measure unit settings, absent when none is attached
    #[serde(default)]
    pub smu: Option<InstrumentConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Switch mainframe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Instrument address (VISA TCPIP resource or `host:port`)
    pub address: String,
    /// Fixture columns per row
    pub pin_count: u32,
    /// I/O timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Generic LAN instrument configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Instrument address (VISA TCPIP resource or `host:port`)
    pub address: String,
    /// I/O timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl SwitchConfig {
    /// I/O timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl InstrumentConfig {
    /// I/O timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), SwitchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SwitchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(SwitchError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.switch.pin_count == 0 || self.switch.pin_count > MAX_PINS {
            return Err(SwitchError::Configuration(format!(
                "Invalid pin_count {}. Must be 1-{}",
                self.switch.pin_count, MAX_PINS
            )));
        }

        let timeouts = std::iter::once(("switch", self.switch.timeout_ms))
            .chain(self.smu.iter().map(|smu| ("smu", smu.timeout_ms)));
        for (name, timeout_ms) in timeouts {
            if timeout_ms == 0 {
                return Err(SwitchError::Configuration(format!(
                    "Invalid {name} timeout_ms 0. Must be positive"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn config() -> AppConfig {
        AppConfig {
            application: ApplicationConfig::default(),
            switch: SwitchConfig {
                address: "TCPIP0::192.168.1.50::INSTR".to_string(),
                pin_count: 64,
                timeout_ms: 5000,
            },
            smu: None,
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn loads_file_with_defaults() {
        let file = write_config(
            r#"
            [switch]
            address = "10.0.0.2:5025"
            pin_count = 40

            [smu]
            address = "10.0.0.3"
            timeout_ms = 2000
            "#,
        );

        let loaded = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(loaded.application, ApplicationConfig::default());
        assert_eq!(loaded.switch.pin_count, 40);
        assert_eq!(loaded.switch.timeout(), Duration::from_secs(5));
        assert_eq!(loaded.smu.unwrap().timeout(), Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config(
            r#"
            [switch]
            address = "10.0.0.2"
            pin_count = 40
            "#,
        );

        std::env::set_var("FIXTURE_SWITCH_SWITCH__PIN_COUNT", "96");
        let loaded = AppConfig::load_from(file.path());
        std::env::remove_var("FIXTURE_SWITCH_SWITCH__PIN_COUNT");

        assert_eq!(loaded.unwrap().switch.pin_count, 96);
    }

    #[test]
    #[serial]
    fn missing_switch_section_fails() {
        let file = write_config("[application]\nlog_level = \"debug\"\n");
        assert!(AppConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_invalid_values() {
        let mut bad_level = config();
        bad_level.application.log_level = "verbose".to_string();
        assert!(bad_level.validate().is_err());

        let mut bad_format = config();
        bad_format.application.log_format = "xml".to_string();
        assert!(bad_format.validate().is_err());

        let mut no_pins = config();
        no_pins.switch.pin_count = 0;
        assert!(no_pins.validate().is_err());

        let mut too_many = config();
        too_many.switch.pin_count = MAX_PINS + 1;
        assert!(too_many.validate().is_err());

        let mut zero_timeout = config();
        zero_timeout.smu = Some(InstrumentConfig {
            address: "10.0.0.3".to_string(),
            timeout_ms: 0,
        });
        assert!(matches!(
            zero_timeout.validate(),
            Err(SwitchError::Configuration(msg)) if msg.contains("smu")
        ));
    }

    #[test]
    fn serializes_to_toml() {
        let text = toml::to_string(&config()).unwrap();
        assert!(text.contains("pin_count = 64"));
    }
}
