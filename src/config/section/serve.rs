//! `[serve]` section configuration.
//!
//! Contains development-host listener settings.
//!
//! # Example
//!
//! ```toml
//! [serve]
//! interface = "0.0.0.0"     # Devices connect from the LAN
//! port = 5290               # First port tried, retried upward if busy
//! handshake_timeout_ms = 5000
//! ```

use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Development-host listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Network interface to bind.
    /// - `0.0.0.0` (default): all interfaces, reachable by devices
    /// - `127.0.0.1`: emulators/simulators on this machine only
    pub interface: IpAddr,

    /// Port number devices connect to.
    pub port: u16,

    /// Time a connecting device gets to finish the WebSocket upgrade.
    pub handshake_timeout_ms: u64,
}

const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

impl ServeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: super::device::DEFAULT_PORT,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        time::Duration,
    };

    use crate::config::test_parse_config;

    #[test]
    fn test_serve_config() {
        let config = test_parse_config("[serve]\ninterface = \"127.0.0.1\"\nport = 8080");

        assert_eq!(config.serve.interface, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.serve.port, 8080);
    }

    #[test]
    fn test_serve_handshake_timeout() {
        let config = test_parse_config("[serve]\nhandshake_timeout_ms = 250");
        assert_eq!(config.serve.handshake_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_serve_config_defaults() {
        let config = test_parse_config("");

        assert_eq!(config.serve.interface, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.serve.port, 5290);
        assert_eq!(config.serve.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_serve_config_partial_override() {
        let config = test_parse_config("[serve]\nport = 3000");

        assert_eq!(config.serve.port, 3000);
        assert_eq!(config.serve.interface, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
