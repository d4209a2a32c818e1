//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DEFAULT_HOST, DEFAULT_PORT, Target};

/// Default size of a single socket read, which bounds one reply.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Configuration for one controller connection.
///
/// Can be built in code or loaded from TOML:
///
/// ```
/// use dobot_link::connection::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::from_toml_str(r#"
///     host = "10.0.0.20"
///     auto_connect = true
///     command_timeout = "2s"
/// "#).unwrap();
///
/// assert_eq!(config.port, 29999);
/// assert_eq!(config.command_timeout, Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Controller host.
    pub host: String,
    /// Controller port.
    pub port: u16,
    /// Open the connection when the first consumer registers.
    pub auto_connect: bool,
    /// How long an open attempt may take before it fails.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for the in-flight command. `None` waits forever.
    ///
    /// The protocol carries no request ids, so a reply that arrives after its
    /// command timed out will be taken as the reply to the next command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
    /// Capacity reserved for each socket read.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            auto_connect: false,
            connect_timeout: Duration::from_secs(5),
            command_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for the given controller address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// The controller endpoint this configuration points at.
    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port)
    }

    /// Enable or disable auto-connect.
    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command deadline.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Disable the per-command deadline.
    pub fn without_command_timeout(mut self) -> Self {
        self.command_timeout = None;
        self
    }

    /// Set the read buffer size. Zero is raised to one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.target(), Target::new("192.168.1.6", 29999));
        assert!(!config.auto_connect);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::new("127.0.0.1", 1234)
            .with_auto_connect(true)
            .with_connect_timeout(Duration::from_secs(1))
            .with_command_timeout(Duration::from_millis(500))
            .with_read_buffer_size(0);

        assert_eq!(config.target().to_string(), "127.0.0.1:1234");
        assert!(config.auto_connect);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.command_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.read_buffer_size, 1);

        assert_eq!(config.without_command_timeout().command_timeout, None);
    }

    #[test]
    fn test_from_toml() {
        let config = ConnectionConfig::from_toml_str(
            r#"
            host = "10.1.1.5"
            port = 30000
            auto_connect = true
            connect_timeout = "750ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "10.1.1.5");
        assert_eq!(config.port, 30000);
        assert!(config.auto_connect);
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.command_timeout, None);
    }

    #[test]
    fn test_from_toml_empty_uses_defaults() {
        let config = ConnectionConfig::from_toml_str("").unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_duration() {
        assert!(ConnectionConfig::from_toml_str(r#"connect_timeout = "soon""#).is_err());
    }
}
