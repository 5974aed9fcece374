//! Configuration loading and management.
//!
//! meshircd reads a single TOML file: server identity, engine limits, and
//! the link blocks that authorize peer servers. Everything the engine
//! consults at runtime lives here; transport concerns (TLS, client
//! listeners) belong to the layers around the core.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use meshirc_proto::{Sid, Ts6IdError};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid server sid: {0}")]
    BadSid(#[from] Ts6IdError),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Who this server is.
    pub server: ServerConfig,
    /// Engine limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Link blocks for server peering.
    #[serde(default, rename = "link")]
    pub links: Vec<LinkBlock>,
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g. `hub.example.net`).
    pub name: String,
    /// TS6 SID, numeric form (`"001"`).
    pub sid: String,
    /// Free-form description sent on SERVER frames.
    #[serde(default)]
    pub description: String,
    /// Address the link listener binds to.
    #[serde(default = "default_link_listen")]
    pub link_listen: String,
}

impl ServerConfig {
    /// Parsed SID.
    pub fn sid(&self) -> Result<Sid, Ts6IdError> {
        Sid::from_ts6(&self.sid)
    }
}

/// Engine limits. The defaults follow common TS6 daemon practice.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Longest accepted parameter for non-list modes, in bytes.
    #[serde(default = "default_max_param_length")]
    pub max_param_length: usize,
    /// Longest accepted list-mode entry (ban mask), in bytes.
    #[serde(default = "default_max_ban_length")]
    pub max_ban_length: usize,
    /// Cap on entries per list mode per channel.
    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,
    /// Default retention beyond expiry for bans set without one, seconds.
    #[serde(default = "default_ban_lifetime")]
    pub ban_lifetime: i64,
    /// Seconds between ban expiry sweeps.
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_param_length: default_max_param_length(),
            max_ban_length: default_max_ban_length(),
            max_list_entries: default_max_list_entries(),
            ban_lifetime: default_ban_lifetime(),
            expiry_interval: default_expiry_interval(),
        }
    }
}

/// Link block authorizing one peer server.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name.
    pub name: String,
    /// Remote host to connect to (for autoconnect).
    #[serde(default)]
    pub hostname: String,
    /// Remote port.
    #[serde(default)]
    pub port: u16,
    /// Shared link password.
    pub password: String,
    /// Whether to initiate the connection ourselves.
    #[serde(default)]
    pub autoconnect: bool,
    /// Expected remote SID, validated when present.
    #[serde(default)]
    pub sid: Option<String>,
}

fn default_link_listen() -> String {
    "127.0.0.1:7000".to_string()
}

fn default_max_param_length() -> usize {
    100
}

fn default_max_ban_length() -> usize {
    195
}

fn default_max_list_entries() -> usize {
    100
}

fn default_ban_lifetime() -> i64 {
    24 * 3600
}

fn default_expiry_interval() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.server.sid()?;
        Ok(config)
    }

    /// Link block for a peer by server name.
    pub fn link_for(&self, name: &str) -> Option<&LinkBlock> {
        self.links.iter().find(|l| l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "hub.example.net"
            sid = "001"
            description = "Hub"

            [[link]]
            name = "leaf.example.net"
            password = "linkpass"
            sid = "002"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.sid().unwrap(), Sid(1));
        assert_eq!(config.limits.max_ban_length, 195);
        assert_eq!(config.links.len(), 1);
        assert!(config.link_for("leaf.example.net").is_some());
        assert!(config.link_for("other.example.net").is_none());
    }

    #[test]
    fn rejects_alphabetic_sid() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "hub.example.net"
            sid = "0AB"
            "#,
        )
        .unwrap();
        assert!(config.server.sid().is_err());
    }

    #[test]
    fn limit_overrides_apply() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "hub.example.net"
            sid = "001"

            [limits]
            max_ban_length = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_ban_length, 64);
        assert_eq!(config.limits.max_param_length, 100);
    }
}
