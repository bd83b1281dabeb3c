//! Tunnel configuration

use crate::capacity::{CapacityPlanner, MAX_MESSAGE_SIZE};
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main tunnel configuration, shared by both endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Domain suffix every frame name ends in (may be empty)
    #[serde(default)]
    pub domain: String,

    /// Ceiling on encoded DNS message size
    #[serde(default = "default_message_size")]
    pub message_size: usize,

    /// Server endpoint settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client endpoint settings
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            message_size: MAX_MESSAGE_SIZE,
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Server endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address to answer queries on
    pub listen_addr: SocketAddr,

    /// Sessions idle longer than this are dropped
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// How often idle sessions are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5353)),
            session_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Client endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Tunnel server (or resolver forwarding to it)
    pub server_addr: SocketAddr,

    /// Wait for each response before resending
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Resends per query after the first attempt
    pub max_retries: u32,

    /// Delay between retrieve polls while the server has nothing queued
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Empty retrieve answers tolerated before giving up
    pub poll_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 5353)),
            query_timeout: Duration::from_secs(2),
            max_retries: 3,
            poll_interval: Duration::from_millis(100),
            poll_limit: 50,
        }
    }
}

impl TunnelConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Capacity planner for this domain and message size
    pub fn planner(&self) -> Result<CapacityPlanner> {
        CapacityPlanner::new(&self.domain, self.message_size)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.message_size > MAX_MESSAGE_SIZE {
            return Err(TunnelError::Config(format!(
                "message_size {} exceeds {}",
                self.message_size, MAX_MESSAGE_SIZE
            )));
        }

        // domain must leave room for payload in both directions
        self.planner()?;

        if self.server.session_timeout.is_zero() {
            return Err(TunnelError::Config("session_timeout must be non-zero".into()));
        }
        if self.server.cleanup_interval.is_zero() {
            return Err(TunnelError::Config("cleanup_interval must be non-zero".into()));
        }
        if self.client.query_timeout.is_zero() {
            return Err(TunnelError::Config("query_timeout must be non-zero".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TunnelConfig::default();
        assert_eq!(config.message_size, 512);
        assert_eq!(config.server.session_timeout, Duration::from_secs(60));
        assert_eq!(config.server.cleanup_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TunnelConfig::default();

        config.message_size = 1024;
        assert!(matches!(config.validate(), Err(TunnelError::Config(_))));

        config.message_size = 40;
        assert!(matches!(config.validate(), Err(TunnelError::Config(_))));

        config.message_size = 512;
        config.server.session_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(TunnelError::Config(_))));
    }

    #[test]
    fn test_parse_toml() {
        let config: TunnelConfig = toml::from_str(
            r#"
            domain = "t.example.com"

            [server]
            listen_addr = "0.0.0.0:53"
            session_timeout = "2m"

            [client]
            server_addr = "10.0.0.1:53"
            query_timeout = "500ms"
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.domain, "t.example.com");
        assert_eq!(config.message_size, 512);
        assert_eq!(config.server.listen_addr.port(), 53);
        assert_eq!(config.server.session_timeout, Duration::from_secs(120));
        assert_eq!(config.server.cleanup_interval, Duration::from_secs(30));
        assert_eq!(config.client.query_timeout, Duration::from_millis(500));
        assert_eq!(config.client.max_retries, 5);
        assert_eq!(config.client.poll_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("tunnel-config-{}.toml", std::process::id()));
        let mut config = TunnelConfig::default();
        config.domain = "tunnel.example.com".into();

        config.to_file(&path).unwrap();
        let loaded = TunnelConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
    }
}
