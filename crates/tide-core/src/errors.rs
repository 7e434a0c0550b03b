//! Failure taxonomy shared by every component.
//!
//! Each variant names where a failure happened. None of them is retried
//! automatically; callers log and surface them.

use thiserror::Error;

/// Error raised by the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The state store could not read or write. Nothing was committed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A stream could not subscribe to its update address.
    #[error("subscription failure: {0}")]
    Subscription(String),

    /// Pushing a payload to a client connection failed.
    #[error("push failure: {0}")]
    Push(String),

    /// Request parameters could not be interpreted. Rejected before any
    /// store access.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl SyncError {
    /// Stable `snake_case` label for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence",
            Self::Subscription(_) => "subscription",
            Self::Push(_) => "push",
            Self::MalformedInput(_) => "malformed_input",
        }
    }

    /// Whether the caller, not the server, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MalformedInput(_))
    }

    /// Convenience constructor for [`SyncError::MalformedInput`].
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
