//! Error types for chatsync.

use thiserror::Error;

/// Errors surfaced by chatsync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The transport is not reachable; the session moves to reconnecting
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Authentication was refused; terminal for the session
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Operation requires a server id but the message is still pending
    #[error("message not yet confirmed by the server: {0}")]
    Unresolved(String),

    /// The cursor's scope changed underneath it
    #[error("cursor invalidated")]
    Invalidated,

    /// The cursor already has a fetch in flight
    #[error("cursor busy")]
    Busy,

    /// The server rejected the operation due to a state mismatch
    #[error("conflict: {0}")]
    Conflict(String),

    /// Connecting did not complete within the configured timeout
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An inbound frame or value could not be interpreted
    #[error("malformed: {0}")]
    Malformed(String),

    /// Too many unconfirmed outgoing messages
    #[error("outbox full (max {max})")]
    OutboxFull {
        /// Configured bound.
        max: usize,
    },

    /// The server rejected the request for another reason
    #[error("rejected ({code}): {message}")]
    Rejected {
        /// Service error code.
        code: u16,
        /// Service error message.
        message: String,
    },

    /// The requested operation is not valid in the current state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl ChatError {
    /// Whether the failed operation may be retried.
    ///
    /// Only network-class failures are retried. Conflicts and auth failures
    /// are surfaced to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ChatError::OutboxFull { max: 8 };
        assert_eq!(err.to_string(), "outbox full (max 8)");
        assert_eq!(ChatError::Busy.to_string(), "cursor busy");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(ChatError::NetworkUnavailable("down".into()).is_retryable());
        assert!(!ChatError::Conflict("deleted".into()).is_retryable());
        assert!(!ChatError::AuthFailed("expired".into()).is_retryable());
        assert!(!ChatError::ConnectionTimeout.is_retryable());
    }
}
