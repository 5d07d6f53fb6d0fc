//! Daemon configuration file
//!
//! ```toml
//! [server]
//! outbound_capacity = 256
//! connect_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//!
//! [[members]]
//! id = 1001
//! name = "Chair"
//! token = "chair-token"
//!
//! [[members.groups]]
//! group_id = "802.11"
//! access = "admin"
//! status = "voter"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::schema::{AccessLevel, GroupId, MemberId, MemberStatus};

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: SocketConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Development member directory
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

/// Socket server tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Broadcast frames queued per connection before new ones are dropped
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Seconds a client has to send `connect`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One member of the development directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: MemberId,
    pub name: String,
    /// Bearer token presented on `connect`
    pub token: String,
    #[serde(default)]
    pub groups: Vec<GroupGrant>,
}

/// Access and status of a member within one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupGrant {
    pub group_id: GroupId,
    #[serde(default)]
    pub access: AccessLevel,
    #[serde(default)]
    pub status: MemberStatus,
}

impl DaemonConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
outbound_capacity = 32

[[members]]
id = 1001
name = "Chair"
token = "chair-token"

[[members.groups]]
group_id = "802.11"
access = "admin"
status = "voter"

[[members.groups]]
group_id = "802.3"
access = "ro"
"#;

    #[test]
    fn test_parse_sample() {
        let config = DaemonConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.server.outbound_capacity, 32);
        assert_eq!(config.server.connect_timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.members.len(), 1);

        let grants = &config.members[0].groups;
        assert_eq!(grants[0].access, AccessLevel::Admin);
        assert_eq!(grants[0].status, MemberStatus::Voter);
        assert_eq!(grants[1].access, AccessLevel::ReadOnly);
        assert_eq!(grants[1].status, MemberStatus::NonVoter);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.members.is_empty());
        assert_eq!(config.server.outbound_capacity, 256);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = DaemonConfig::load_from(file.path()).unwrap();
        assert_eq!(config.members[0].token, "chair-token");
    }

    #[test]
    fn test_bad_access_level_rejected() {
        let bad = r#"
[[members]]
id = 1
name = "X"
token = "t"
[[members.groups]]
group_id = "g"
access = "superuser"
"#;
        assert!(matches!(DaemonConfig::parse(bad), Err(ConfigError::Parse(_))));
    }
}
