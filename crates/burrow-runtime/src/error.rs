//! Error types for burrow-runtime.

use thiserror::Error;

/// Errors that can occur during bridge dispatch.
#[derive(Debug, Error)]
pub enum HostError {
    /// No op with this name has been registered
    #[error("unknown op: {0}")]
    UnknownOp(String),

    /// An op with this name is already registered
    #[error("op already registered: {0}")]
    AlreadyRegistered(String),

    /// An op failed; the message is the op's structured error code
    #[error("{0}")]
    Op(String),
}

impl HostError {
    /// Create an op failure from a rendered error code.
    pub fn op(message: impl Into<String>) -> Self {
        Self::Op(message.into())
    }
}

/// Result type alias for bridge operations
pub type HostResult<T> = Result<T, HostError>;
