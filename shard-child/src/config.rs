//! Child shard configuration.
//!
//! Loaded as the `[child]` and `[monitor]` sections of the node config.

use serde::{Deserialize, Serialize};
use shard_core::DEFAULT_CHUNK_SIZE;

/// Per-shard limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Transfer chunk size in bytes (default: 2MB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Attendee records a shard holds before it reports capacity (default: 100_000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Transfer monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Check interval in seconds (default: 60).
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// Age in seconds after which an open transfer is reported (default: 900).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Enable the monitor task (default: true).
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_entries() -> usize {
    100_000
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    15 * 60 // 15 minutes
}

fn default_monitor_enabled() -> bool {
    true
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            stale_after_secs: default_stale_after(),
            enabled: default_monitor_enabled(),
        }
    }
}
