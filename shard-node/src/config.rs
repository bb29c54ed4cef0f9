//! Configuration loading for the eventshard node.
//!
//! Configuration is loaded from a TOML file (default: `node.toml`).

use serde::{Deserialize, Serialize};
use shard_child::{ChildConfig, EventRecord, MonitorConfig};
use shard_parent::ParentConfig;
use shard_types::{Identity, Privacy};
use std::path::PathBuf;

/// Root configuration for the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration.
    #[serde(default)]
    pub node: NodeConfig,
    /// Per-shard limits.
    #[serde(default)]
    pub child: ChildConfig,
    /// Registry configuration.
    #[serde(default)]
    pub parent: ParentConfig,
    /// Transfer monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Events known to the directory at startup.
    #[serde(default)]
    pub events: Vec<EventSeed>,
}

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name used in logs (default: "eventshard").
    #[serde(default = "default_node_name")]
    pub name: String,
    /// Child module uploaded to the registry at startup.
    /// A built-in module is used when unset.
    pub module_path: Option<PathBuf>,
}

/// One event seeded into the directory. Identities are URL-safe base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSeed {
    /// Event identity.
    pub event: String,
    /// Group the event belongs to.
    pub group: String,
    /// Event owner.
    pub owner: String,
    /// Event privacy (default: public).
    #[serde(default = "default_privacy")]
    pub privacy: Privacy,
}

fn default_node_name() -> String {
    "eventshard".to_string()
}

fn default_privacy() -> Privacy {
    Privacy::Public
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            module_path: None,
        }
    }
}

impl EventSeed {
    /// Parse the seed into a directory entry.
    pub fn resolve(&self) -> Result<(Identity, EventRecord), ConfigError> {
        let parse = |field: &'static str, value: &str| {
            value
                .parse::<Identity>()
                .map_err(|source| ConfigError::InvalidIdentity {
                    field,
                    value: value.to_string(),
                    source,
                })
        };
        Ok((
            parse("event", &self.event)?,
            EventRecord {
                group: parse("group", &self.group)?,
                owner: parse("owner", &self.owner)?,
                privacy: self.privacy,
            },
        ))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Directory entries for every configured event.
    pub fn event_records(&self) -> Result<Vec<(Identity, EventRecord)>, ConfigError> {
        self.events.iter().map(EventSeed::resolve).collect()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// An event seed carries an unparseable identity.
    #[error("invalid {field} identity {value:?}: {source}")]
    InvalidIdentity {
        /// Seed field holding the identity.
        field: &'static str,
        /// Text as configured.
        value: String,
        /// Why it did not parse.
        source: shard_types::IdentityParseError,
    },
}
