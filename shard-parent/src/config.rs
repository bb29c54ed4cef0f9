//! Registry configuration, loaded as the `[parent]` section of the node config.

use serde::{Deserialize, Serialize};
use shard_core::DEFAULT_CHUNK_SIZE;

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentConfig {
    /// Name of the scalable store, passed to every child (default: "attendees").
    #[serde(default = "default_name")]
    pub name: String,
    /// Chunk size requested from children during fan-out reads (default: 2MB).
    #[serde(default = "default_fanout_chunk_bytes")]
    pub fanout_chunk_bytes: usize,
    /// Label stored with uploaded child modules.
    #[serde(default = "default_module_label")]
    pub module_label: String,
}

fn default_name() -> String {
    "attendees".to_string()
}

fn default_fanout_chunk_bytes() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_module_label() -> String {
    "child_event_attendee".to_string()
}

impl Default for ParentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            fanout_chunk_bytes: default_fanout_chunk_bytes(),
            module_label: default_module_label(),
        }
    }
}
