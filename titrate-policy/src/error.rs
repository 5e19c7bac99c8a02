use thiserror::Error;

/// Why a packet was not admitted. Both reasons are terminal: admission is never retried.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    #[error("shared buffer capacity exceeded")]
    CapacityExceeded,
    #[error("queue threshold exceeded")]
    ThresholdExceeded,
}

/// Rejected setup configuration. Construction aborts on any of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown policy code: {0}")]
    UnknownPolicy(u32),
    #[error("Unknown policy name: {0:?}")]
    UnknownPolicyName(String),
    #[error("Missing alpha for priority {priority}")]
    MissingAlpha { priority: u32 },
    #[error("Buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("Queue layout has no queues")]
    EmptyLayout,
    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { name, reason: reason.into() }
    }
}
