//! `[device]` section configuration.
//!
//! The device-side process ships with a packaged copy of this section and
//! reads it exactly once at startup to learn where the development host is.
//!
//! ```toml
//! [device]
//! host = "192.168.1.20"
//! port = 5290
//! reconnect_attempts = 10   # 0 disables reconnecting
//! reconnect_delay_ms = 1000
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, HotConfig};

pub(super) const DEFAULT_PORT: u16 = 5290;

/// Packaged development-host endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Development-host address; required on the device side.
    pub host: Option<String>,

    /// Development-host port.
    pub port: u16,

    /// Attempts to re-establish a lost connection before giving up.
    pub reconnect_attempts: u32,

    /// Pause before each reconnect attempt.
    pub reconnect_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            reconnect_attempts: 10,
            reconnect_delay_ms: 1000,
        }
    }
}

/// How a device re-establishes a lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Resolved endpoint a device connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
}

impl DeviceConfig {
    /// Resolve the configured endpoint, failing when no host is packaged.
    pub fn endpoint(&self) -> Result<DeviceEndpoint, ConfigError> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::Validation("[device] host is not set".into()))?;

        Ok(DeviceEndpoint {
            host: host.to_string(),
            port: self.port,
        })
    }

    pub fn reconnect(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}

impl DeviceEndpoint {
    /// Read the endpoint from a packaged configuration file.
    pub fn from_package(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let config: HotConfig = toml::from_str(&content)?;
        config.device.endpoint()
    }
}
