//! Error types for the eventshard node.

use shard_types::ApiError;

/// Main error type for node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A shard or the registry rejected a call.
    #[error("shard error: {0}")]
    Api(#[from] ApiError),

    /// The registry holds no child module, so no shard can be deployed.
    #[error("no child module uploaded, cannot deploy the first shard")]
    NoChildModule,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
