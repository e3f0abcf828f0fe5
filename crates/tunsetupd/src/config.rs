//! Daemon configuration
//!
//! The daemon reads a TOML file describing the adapter to open, optional
//! platform capability overrides, legacy-path timing and logging. The pulled
//! VPN configuration is a separate JSON document.
//!
//! Default location: [`DEFAULT_CONFIG_PATH`]

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tunsetup_common::{SetupError, SetupResult};

use crate::types::{AdapterIdentity, LegacyTiming, PlatformCapabilities, PulledConfig};

/// Config file read when `--config` is not given
#[cfg(windows)]
pub const DEFAULT_CONFIG_PATH: &str = r"C:\ProgramData\tunsetupd\tunsetupd.toml";
#[cfg(not(windows))]
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tunsetupd/tunsetupd.toml";

/// Adapter to open
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Device path; derived from `guid` when empty
    #[serde(default)]
    pub device_path: String,

    /// Host interface index of the adapter
    #[serde(default)]
    pub index: u32,

    /// Friendly connection name
    #[serde(default)]
    pub name: String,

    /// Adapter instance GUID, including braces
    #[serde(default)]
    pub guid: String,
}

impl AdapterConfig {
    /// The path passed to the device open call.
    pub fn device_path(&self) -> String {
        if self.device_path.is_empty() && !self.guid.is_empty() {
            format!(r"\\.\Global\{}.tap", self.guid)
        } else {
            self.device_path.clone()
        }
    }

    pub fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            index: self.index,
            name: self.name.clone(),
            guid: self.guid.clone(),
        }
    }
}

/// Capability detection and overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Query the host; when false, start from current-host capabilities
    #[serde(default = "default_detect")]
    pub detect: bool,

    #[serde(default)]
    pub dns_policy_table: Option<bool>,

    #[serde(default)]
    pub leak_protection: Option<bool>,

    #[serde(default)]
    pub legacy_dns_syntax: Option<bool>,

    #[serde(default)]
    pub legacy_adapter_setup: Option<bool>,
}

impl PlatformConfig {
    /// Applies the overrides on top of `detected`.
    pub fn resolve(&self, detected: PlatformCapabilities) -> PlatformCapabilities {
        let base = if self.detect {
            detected
        } else {
            PlatformCapabilities::current()
        };
        PlatformCapabilities {
            dns_policy_table: self.dns_policy_table.unwrap_or(base.dns_policy_table),
            leak_protection: self.leak_protection.unwrap_or(base.leak_protection),
            legacy_dns_syntax: self.legacy_dns_syntax.unwrap_or(base.legacy_dns_syntax),
            legacy_adapter_setup: self
                .legacy_adapter_setup
                .unwrap_or(base.legacy_adapter_setup),
        }
    }
}

/// Legacy path readiness wait
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl LegacyConfig {
    pub fn timing(&self) -> LegacyTiming {
        LegacyTiming {
            poll_attempts: self.poll_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Complete tunsetupd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub legacy: LegacyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_detect() -> bool {
    true
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            detect: default_detect(),
            dns_policy_table: None,
            leak_protection: None,
            legacy_dns_syntax: None,
            legacy_adapter_setup: None,
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DaemonConfig {
    /// Parses and validates a configuration document.
    pub fn from_toml_str(content: &str) -> SetupResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| SetupError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> SetupResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SetupError::invalid_config(
                "config",
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration
    pub fn validate(&self) -> SetupResult<()> {
        if self.adapter.device_path().is_empty() {
            return Err(SetupError::invalid_config(
                "adapter.device_path",
                "device_path or guid must be set",
            ));
        }

        if self.adapter.index == 0 {
            return Err(SetupError::invalid_config(
                "adapter.index",
                "interface index must be > 0",
            ));
        }

        if self.legacy.poll_attempts == 0 {
            return Err(SetupError::invalid_config(
                "legacy.poll_attempts",
                "poll_attempts must be > 0",
            ));
        }

        Ok(())
    }
}

/// Loads and validates a pulled VPN configuration (JSON).
pub fn load_pulled(path: impl AsRef<Path>) -> SetupResult<PulledConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        SetupError::invalid_config(
            "pulled",
            format!("Failed to read {}: {}", path.display(), e),
        )
    })?;
    let pulled: PulledConfig = serde_json::from_str(&content).map_err(|e| {
        SetupError::invalid_config("pulled", format!("{}: {}", path.display(), e))
    })?;
    pulled.validate()?;
    Ok(pulled)
}
