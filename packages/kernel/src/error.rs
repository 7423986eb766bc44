//! Error types for the bus and the services it hosts.

use bus_core::{MessageId, PayloadError};

/// Result type for bus operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Error type for bus operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("Kernel is not running")]
    NotRunning,

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service is not running: {0}")]
    ServiceNotRunning(String),

    #[error("Mailbox full: {name} (capacity {capacity})")]
    MailboxFull { name: String, capacity: usize },

    #[error("Request timeout")]
    Timeout,

    #[error("Request already pending: {0}")]
    DuplicateRequest(MessageId),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Failed to start service {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error returned by a service handler.
///
/// The runtime logs it, counts it, and answers a waiting caller with an
/// `ERROR` message built from its description.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    /// Create a free-form handler failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        ServiceError::Failed(reason.into())
    }
}
