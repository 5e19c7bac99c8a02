use thiserror::Error;
use titrate_policy::ConfigError;

/// Errors returned by a [`NodeHandle`](crate::NodeHandle).
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Node driver closed")]
    Closed,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
