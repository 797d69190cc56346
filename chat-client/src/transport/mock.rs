//! Mock transport for testing.
//!
//! Allows queueing responses per command, pushing server frames, and
//! capturing sent commands for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chatsync_core::lock::lock;
use chatsync_core::AuthPhase;
use chatsync_types::{Command, Frame, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Responses are queued per command name; a command with nothing queued is
/// answered with [`Response::Ack`]. `recv()` blocks until a frame is pushed
/// or the connection drops.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    frames_ready: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: usize,
    auth_log: Vec<(AuthPhase, String)>,
    sent_commands: Vec<Command>,
    responses: HashMap<&'static str, VecDeque<Result<Response, TransportError>>>,
    frames: VecDeque<Frame>,
    response_delay: Option<Duration>,
    hang_next_connect: bool,
    fail_next_connect: Option<String>,
    fail_next_auth: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next command with this name
    /// (see [`Command::name`]).
    pub fn queue_response(&self, command: &'static str, response: Response) {
        let mut inner = lock(&self.inner);
        inner
            .responses
            .entry(command)
            .or_default()
            .push_back(Ok(response));
    }

    /// Queue an error for the next command with this name.
    pub fn queue_error(&self, command: &'static str, error: TransportError) {
        let mut inner = lock(&self.inner);
        inner
            .responses
            .entry(command)
            .or_default()
            .push_back(Err(error));
    }

    /// Push a server frame for `recv()` to hand over.
    pub fn push_frame(&self, frame: Frame) {
        lock(&self.inner).frames.push_back(frame);
        self.frames_ready.notify_one();
    }

    /// Get all commands that were sent.
    pub fn sent_commands(&self) -> Vec<Command> {
        lock(&self.inner).sent_commands.clone()
    }

    /// Get the last command that was sent.
    pub fn last_sent(&self) -> Option<Command> {
        lock(&self.inner).sent_commands.last().cloned()
    }

    /// Sent commands with the given name.
    pub fn sent_named(&self, command: &str) -> Vec<Command> {
        lock(&self.inner)
            .sent_commands
            .iter()
            .filter(|c| c.name() == command)
            .cloned()
            .collect()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        lock(&self.inner).connected_address.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        lock(&self.inner).connect_count
    }

    /// Authentication phases run so far, with the token each used.
    pub fn auth_log(&self) -> Vec<(AuthPhase, String)> {
        lock(&self.inner).auth_log.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        lock(&self.inner).fail_next_connect = Some(error.to_string());
    }

    /// Cause the next connect() to never complete.
    pub fn hang_next_connect(&self) {
        lock(&self.inner).hang_next_connect = true;
    }

    /// Cause the next authenticate() to be refused.
    pub fn fail_next_auth(&self, error: &str) {
        lock(&self.inner).fail_next_auth = Some(error.to_string());
    }

    /// Delay every response by `delay`.
    pub fn delay_responses(&self, delay: Duration) {
        lock(&self.inner).response_delay = Some(delay);
    }

    /// Simulate the network going away. Pending and future `recv()` calls
    /// fail until the next connect.
    pub fn drop_connection(&self) {
        lock(&self.inner).connected = false;
        self.frames_ready.notify_one();
    }

    /// Clear all state (commands, queues, connection).
    pub fn reset(&self) {
        *lock(&self.inner) = MockTransportInner::default();
        self.frames_ready.notify_one();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            frames_ready: Arc::clone(&self.frames_ready),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let hang = {
            let mut inner = lock(&self.inner);

            // Check for forced failure
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
            std::mem::take(&mut inner.hang_next_connect)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = lock(&self.inner);
        inner.connected = true;
        inner.connect_count += 1;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn authenticate(&self, phase: AuthPhase, token: &str) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_auth.take() {
            return Err(TransportError::Unauthorized(error));
        }

        inner.auth_log.push((phase, token.to_string()));
        Ok(())
    }

    async fn request(&self, command: Command) -> Result<Response, TransportError> {
        let (name, delay) = {
            let mut inner = lock(&self.inner);
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            let name = command.name();
            inner.sent_commands.push(command);
            (name, inner.response_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(TransportError::ConnectionClosed);
        }
        inner
            .responses
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(Response::Ack))
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        loop {
            {
                let mut inner = lock(&self.inner);
                if !inner.connected {
                    return Err(TransportError::ConnectionClosed);
                }
                if let Some(frame) = inner.frames.pop_front() {
                    return Ok(frame);
                }
            }
            self.frames_ready.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        lock(&self.inner).connected = false;
        self.frames_ready.notify_one();
        Ok(())
    }
}
