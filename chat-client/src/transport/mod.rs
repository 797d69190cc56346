//! Transport abstraction for chatsync.
//!
//! The transport owns the wire: it connects, runs the two authentication
//! legs, answers commands with responses and hands over inbound [`Frame`]s
//! already decoded from the wire format.
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `authenticate()` runs one [`AuthPhase`]
//! - `request()` sends a [`Command`] and waits for its [`Response`]
//! - `recv()` waits for the next server-pushed frame
//! - `close()` gracefully terminates
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("wss://chat.example.com").await?;
//! transport.authenticate(AuthPhase::Http, "token").await?;
//! let response = transport.request(command).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use chatsync_core::AuthPhase;
use chatsync_types::{ChatError, Command, Frame, Response};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Credentials refused.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The service refused the request because of a state mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced entity does not exist on the service.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other service-side refusal.
    #[error("rejected ({code}): {message}")]
    Rejected {
        /// Service error code.
        code: u16,
        /// Service error message.
        message: String,
    },
}

impl From<TransportError> for ChatError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ConnectionFailed(reason) => ChatError::NetworkUnavailable(reason),
            TransportError::NotConnected
            | TransportError::ConnectionClosed
            | TransportError::Timeout => ChatError::NetworkUnavailable(error.to_string()),
            TransportError::Unauthorized(reason) => ChatError::AuthFailed(reason),
            TransportError::Conflict(reason) => ChatError::Conflict(reason),
            TransportError::NotFound(what) => ChatError::NotFound(what),
            TransportError::Rejected { code, message } => ChatError::Rejected { code, message },
        }
    }
}

/// Transport trait for talking to the chat service.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, HTTP long-poll, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the service at the given address.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Run one authentication phase with the current token.
    async fn authenticate(&self, phase: AuthPhase, token: &str) -> Result<(), TransportError>;

    /// Send a command and wait for its response.
    async fn request(&self, command: Command) -> Result<Response, TransportError>;

    /// Receive the next server-pushed frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
