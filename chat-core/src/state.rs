//! Connection state machine for chatsync.
//!
//! A pure, side-effect-free state machine for the session lifecycle. It takes
//! events (transport callbacks, timers, token notifications) and produces the
//! next state plus a list of actions for the client to execute.
//!
//! Every state change emits exactly one [`ConnectionEvent::StatusChanged`].
//! Events that leave the state unchanged emit nothing.

use std::fmt;
use std::time::Duration;

/// Which leg of authentication is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthPhase {
    /// Token exchange over HTTP.
    Http,
    /// Session authentication on the socket.
    Socket,
}

/// Why the session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Credentials refused or token expired without refresh.
    Auth(String),
    /// Unrecoverable transport or protocol error.
    Fatal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(reason) => write!(f, "auth: {}", reason),
            Self::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// Session states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Transport connection attempt in progress.
    Connecting,
    /// Authenticating.
    Authenticating(AuthPhase),
    /// Authenticated, session not yet ready for traffic.
    Authenticated,
    /// Fully connected.
    Connected,
    /// Connection lost, waiting to reconnect.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
    /// Terminal failure.
    Failed(FailureReason),
    /// Terminal: connecting did not finish in time.
    ConnectionTimeout,
}

impl ConnectionState {
    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Authenticating(_)
                | Self::Authenticated
                | Self::Reconnecting { .. }
        )
    }

    /// Terminal states only leave through an explicit disconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::ConnectionTimeout)
    }

    fn is_live(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Disconnected)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Authenticating(AuthPhase::Http) => f.write_str("Authenticating(Http)"),
            Self::Authenticating(AuthPhase::Socket) => f.write_str("Authenticating(Socket)"),
            Self::Authenticated => f.write_str("Authenticated"),
            Self::Connected => f.write_str("Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting({})", attempt),
            Self::Failed(reason) => write!(f, "Failed({})", reason),
            Self::ConnectionTimeout => f.write_str("ConnectionTimeout"),
        }
    }
}

/// Freshness of the access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenStatus {
    /// Usable.
    #[default]
    Valid,
    /// Will expire soon; a refresh is scheduled.
    Expiring,
    /// Expired; the grace window is running.
    Expired,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Application asked to connect.
    ConnectRequested,
    /// Transport connection established.
    TransportOpened,
    /// One authentication phase completed.
    AuthSucceeded(AuthPhase),
    /// Authentication was refused.
    AuthFailed {
        /// Server message.
        error: String,
    },
    /// Session set up; traffic may flow.
    SessionReady,
    /// Transport reported the network as unavailable.
    NetworkLost {
        /// Transport message.
        reason: String,
    },
    /// Reconnect timer fired.
    ReconnectTimer,
    /// Connect timeout elapsed before the session became ready.
    ConnectTimedOut,
    /// Application asked to disconnect.
    DisconnectRequested,
    /// The service announced token expiry.
    TokenWillExpire {
        /// Time left before expiry.
        remaining: Duration,
    },
    /// The token expired.
    TokenExpired,
    /// A fresh token was supplied.
    TokenRefreshed,
    /// The grace window after expiry elapsed.
    TokenGraceElapsed,
    /// Unrecoverable error.
    Fatal {
        /// Description.
        error: String,
    },
}

/// Actions to be executed by the client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport connection.
    OpenTransport,
    /// Run an authentication phase.
    Authenticate(AuthPhase),
    /// Run a resynchronization pass for time spent offline.
    StartResync,
    /// Start a timer for reconnection.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Close the transport.
    CloseTransport,
    /// Ask the token provider for a fresh token after a delay.
    ScheduleTokenRefresh {
        /// Delay before refreshing.
        delay: Duration,
    },
    /// Start the grace timer after token expiry.
    StartTokenGrace {
        /// Grace window.
        delay: Duration,
    },
    /// Stop the grace timer.
    CancelTokenGrace,
    /// Notify connection listeners.
    Emit(ConnectionEvent),
}

/// Notifications for connection listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The session state changed.
    StatusChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// The token will expire; a refresh is due.
    TokenWillExpire {
        /// Time left before expiry.
        remaining: Duration,
    },
    /// The token expired; the grace window started.
    TokenExpired,
}

/// Session lifecycle machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMachine {
    state: ConnectionState,
    token: TokenStatus,
    attempt: u32,
    resume_pending: bool,
    token_grace: Duration,
    refresh_lead: Duration,
}

impl ConnectionMachine {
    /// A disconnected machine.
    ///
    /// `token_grace` is how long an expired token may go without a refresh
    /// before the session fails; `refresh_lead` is how early a scheduled
    /// refresh fires before the announced expiry.
    pub fn new(token_grace: Duration, refresh_lead: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            token: TokenStatus::Valid,
            attempt: 0,
            resume_pending: false,
            token_grace,
            refresh_lead,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Current token freshness.
    pub fn token(&self) -> TokenStatus {
        self.token
    }

    /// Process an event and return the new machine plus actions to execute.
    pub fn on_event(mut self, event: Event) -> (Self, Vec<Action>) {
        let from = self.state.clone();
        let mut actions = Vec::new();
        let to = self.transition(event, &mut actions);
        if to != from {
            self.state = to.clone();
            actions.push(Action::Emit(ConnectionEvent::StatusChanged { from, to }));
        }
        (self, actions)
    }

    fn transition(&mut self, event: Event, actions: &mut Vec<Action>) -> ConnectionState {
        use ConnectionState as S;

        match (&self.state, event) {
            // Terminal and idle states only leave through these
            (S::Disconnected, Event::ConnectRequested) => {
                self.attempt = 0;
                self.resume_pending = false;
                self.token = TokenStatus::Valid;
                actions.push(Action::OpenTransport);
                S::Connecting
            }
            (S::Disconnected, _) => S::Disconnected,
            (state, Event::DisconnectRequested) => {
                if !state.is_terminal() {
                    actions.push(Action::CancelReconnect);
                    actions.push(Action::CancelTokenGrace);
                    actions.push(Action::CloseTransport);
                }
                self.resume_pending = false;
                S::Disconnected
            }
            (state, _) if state.is_terminal() => state.clone(),

            // Handshake
            (S::Connecting, Event::TransportOpened) => {
                actions.push(Action::Authenticate(AuthPhase::Http));
                S::Authenticating(AuthPhase::Http)
            }
            (S::Authenticating(AuthPhase::Http), Event::AuthSucceeded(AuthPhase::Http)) => {
                actions.push(Action::Authenticate(AuthPhase::Socket));
                S::Authenticating(AuthPhase::Socket)
            }
            (S::Authenticating(AuthPhase::Socket), Event::AuthSucceeded(AuthPhase::Socket)) => {
                S::Authenticated
            }
            (S::Authenticating(_), Event::AuthFailed { error }) => {
                actions.push(Action::CloseTransport);
                S::Failed(FailureReason::Auth(error))
            }
            (S::Authenticated, Event::SessionReady) => {
                self.attempt = 0;
                self.token = TokenStatus::Valid;
                actions.push(Action::CancelTokenGrace);
                if self.resume_pending {
                    self.resume_pending = false;
                    actions.push(Action::StartResync);
                }
                S::Connected
            }
            (S::Connecting | S::Authenticating(_) | S::Authenticated, Event::ConnectTimedOut) => {
                actions.push(Action::CloseTransport);
                S::ConnectionTimeout
            }
            (S::Reconnecting { .. }, Event::ConnectTimedOut) => {
                actions.push(Action::CancelReconnect);
                actions.push(Action::CloseTransport);
                S::ConnectionTimeout
            }

            // Network loss from any live state
            (S::Reconnecting { attempt }, Event::NetworkLost { .. }) => S::Reconnecting {
                attempt: *attempt,
            },
            (S::Connected | S::Authenticated, Event::NetworkLost { .. }) => {
                self.resume_pending = true;
                self.attempt = 1;
                // The link may still look open (e.g. a request timed out).
                actions.push(Action::CloseTransport);
                actions.push(Action::StartReconnectTimer {
                    delay: calculate_backoff(self.attempt),
                });
                S::Reconnecting { attempt: 1 }
            }
            (S::Connecting | S::Authenticating(_), Event::NetworkLost { .. }) => {
                self.attempt = self.attempt.saturating_add(1);
                actions.push(Action::StartReconnectTimer {
                    delay: calculate_backoff(self.attempt),
                });
                S::Reconnecting {
                    attempt: self.attempt,
                }
            }
            (S::Reconnecting { .. }, Event::ReconnectTimer) => {
                actions.push(Action::OpenTransport);
                S::Connecting
            }

            // Token lifecycle
            (state, Event::TokenWillExpire { remaining }) => {
                if self.token == TokenStatus::Valid {
                    self.token = TokenStatus::Expiring;
                    actions.push(Action::ScheduleTokenRefresh {
                        delay: remaining.saturating_sub(self.refresh_lead),
                    });
                    actions.push(Action::Emit(ConnectionEvent::TokenWillExpire { remaining }));
                }
                state.clone()
            }
            (state, Event::TokenExpired) => {
                if self.token != TokenStatus::Expired {
                    self.token = TokenStatus::Expired;
                    actions.push(Action::StartTokenGrace {
                        delay: self.token_grace,
                    });
                    actions.push(Action::Emit(ConnectionEvent::TokenExpired));
                }
                state.clone()
            }
            (state, Event::TokenRefreshed) => {
                if self.token == TokenStatus::Expired {
                    actions.push(Action::CancelTokenGrace);
                }
                self.token = TokenStatus::Valid;
                state.clone()
            }
            (state, Event::TokenGraceElapsed) => {
                if self.token == TokenStatus::Expired && state.is_live() {
                    actions.push(Action::CancelReconnect);
                    actions.push(Action::CloseTransport);
                    S::Failed(FailureReason::Auth("token expired".into()))
                } else {
                    state.clone()
                }
            }

            (_, Event::Fatal { error }) => {
                actions.push(Action::CancelReconnect);
                actions.push(Action::CloseTransport);
                S::Failed(FailureReason::Fatal(error))
            }

            // Invalid transitions - stay in current state
            (state, _) => state.clone(),
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(5))
    }
}

/// Calculate reconnection backoff with jitter.
///
/// Formula: min(30s, 2^attempt seconds) + random(0..5000ms)
pub fn calculate_backoff(attempt: u32) -> Duration {
    let base_secs = 2u64.pow(attempt.min(5)).min(30);
    Duration::from_secs(base_secs) + Duration::from_millis(random_jitter_ms())
}

/// Random jitter between 0 and 5000 milliseconds.
///
/// Falls back to no jitter if the OS random source is unavailable.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % 5001,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(Duration::from_secs(30), Duration::from_secs(5))
    }

    fn drive(machine: ConnectionMachine, events: Vec<Event>) -> (ConnectionMachine, Vec<Action>) {
        let mut all = Vec::new();
        let mut machine = machine;
        for event in events {
            let (next, actions) = machine.on_event(event);
            machine = next;
            all.extend(actions);
        }
        (machine, all)
    }

    fn connected() -> ConnectionMachine {
        drive(
            machine(),
            vec![
                Event::ConnectRequested,
                Event::TransportOpened,
                Event::AuthSucceeded(AuthPhase::Http),
                Event::AuthSucceeded(AuthPhase::Socket),
                Event::SessionReady,
            ],
        )
        .0
    }

    fn status_changes(actions: &[Action]) -> Vec<(ConnectionState, ConnectionState)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(ConnectionEvent::StatusChanged { from, to }) => {
                    Some((from.clone(), to.clone()))
                }
                _ => None,
            })
            .collect()
    }

    // ===========================================
    // Handshake Tests
    // ===========================================

    #[test]
    fn starts_disconnected() {
        assert_eq!(machine().state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn full_handshake_reaches_connected() {
        let (machine, actions) = drive(
            machine(),
            vec![
                Event::ConnectRequested,
                Event::TransportOpened,
                Event::AuthSucceeded(AuthPhase::Http),
                Event::AuthSucceeded(AuthPhase::Socket),
                Event::SessionReady,
            ],
        );
        assert!(machine.state().is_connected());
        assert!(actions.contains(&Action::OpenTransport));
        assert!(actions.contains(&Action::Authenticate(AuthPhase::Http)));
        assert!(actions.contains(&Action::Authenticate(AuthPhase::Socket)));
        // First connect is not a resume
        assert!(!actions.contains(&Action::StartResync));
    }

    #[test]
    fn every_transition_emits_exactly_one_status_change() {
        let (_, actions) = drive(
            machine(),
            vec![
                Event::ConnectRequested,
                Event::TransportOpened,
                Event::AuthSucceeded(AuthPhase::Http),
                Event::AuthSucceeded(AuthPhase::Socket),
                Event::SessionReady,
            ],
        );
        let changes = status_changes(&actions);
        assert_eq!(changes.len(), 5);
        assert_eq!(changes[0].0, ConnectionState::Disconnected);
        assert_eq!(changes[0].1, ConnectionState::Connecting);
        assert_eq!(changes[2].1, ConnectionState::Authenticating(AuthPhase::Socket));
        assert_eq!(changes[4].1, ConnectionState::Connected);
    }

    #[test]
    fn ignored_events_emit_nothing() {
        let (machine, actions) = connected().on_event(Event::TransportOpened);
        assert!(machine.state().is_connected());
        assert!(actions.is_empty());
    }

    #[test]
    fn auth_failure_is_terminal() {
        let (machine, actions) = drive(
            machine(),
            vec![
                Event::ConnectRequested,
                Event::TransportOpened,
                Event::AuthFailed {
                    error: "bad token".into(),
                },
            ],
        );
        assert_eq!(
            machine.state(),
            &ConnectionState::Failed(FailureReason::Auth("bad token".into()))
        );
        assert!(actions.contains(&Action::CloseTransport));

        let (machine, actions) = machine.on_event(Event::ConnectRequested);
        assert!(machine.state().is_terminal());
        assert!(actions.is_empty());
    }

    #[test]
    fn connect_timeout_is_distinct_terminal_state() {
        let (machine, _) = drive(
            machine(),
            vec![Event::ConnectRequested, Event::TransportOpened, Event::ConnectTimedOut],
        );
        assert_eq!(machine.state(), &ConnectionState::ConnectionTimeout);

        let (machine, _) = machine.on_event(Event::NetworkLost {
            reason: "late".into(),
        });
        assert_eq!(machine.state(), &ConnectionState::ConnectionTimeout);
    }

    #[test]
    fn connect_timeout_stops_pending_retries() {
        let (machine, actions) = drive(
            machine(),
            vec![
                Event::ConnectRequested,
                Event::NetworkLost {
                    reason: "refused".into(),
                },
                Event::ConnectTimedOut,
            ],
        );
        assert_eq!(machine.state(), &ConnectionState::ConnectionTimeout);
        assert!(actions.contains(&Action::CancelReconnect));
    }

    #[test]
    fn disconnect_resets_terminal_state() {
        let (machine, _) = drive(
            machine(),
            vec![Event::ConnectRequested, Event::ConnectTimedOut, Event::DisconnectRequested],
        );
        assert_eq!(machine.state(), &ConnectionState::Disconnected);
    }

    // ===========================================
    // Reconnect Tests
    // ===========================================

    #[test]
    fn network_loss_while_connected_reconnects_and_resyncs() {
        let (machine, actions) = connected().on_event(Event::NetworkLost {
            reason: "wifi".into(),
        });
        assert_eq!(machine.state(), &ConnectionState::Reconnecting { attempt: 1 });
        assert_eq!(actions[0], Action::CloseTransport);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));

        let (machine, actions) = drive(
            machine,
            vec![
                Event::ReconnectTimer,
                Event::TransportOpened,
                Event::AuthSucceeded(AuthPhase::Http),
                Event::AuthSucceeded(AuthPhase::Socket),
                Event::SessionReady,
            ],
        );
        assert!(machine.state().is_connected());
        assert_eq!(
            actions.iter().filter(|a| **a == Action::StartResync).count(),
            1
        );
    }

    #[test]
    fn failed_reconnect_increments_attempt() {
        let (machine, _) = drive(
            connected(),
            vec![
                Event::NetworkLost { reason: "a".into() },
                Event::ReconnectTimer,
                Event::NetworkLost { reason: "b".into() },
                Event::ReconnectTimer,
                Event::NetworkLost { reason: "c".into() },
            ],
        );
        assert_eq!(machine.state(), &ConnectionState::Reconnecting { attempt: 3 });
    }

    #[test]
    fn disconnect_request_from_reconnecting_cancels() {
        let (machine, _) = connected().on_event(Event::NetworkLost {
            reason: "x".into(),
        });
        let (machine, actions) = machine.on_event(Event::DisconnectRequested);
        assert_eq!(machine.state(), &ConnectionState::Disconnected);
        assert!(actions.contains(&Action::CancelReconnect));
    }

    #[test]
    fn reconnect_backoff_increases_with_attempt() {
        assert!(calculate_backoff(1) >= Duration::from_secs(2));
        assert!(calculate_backoff(3) >= Duration::from_secs(8));
    }

    #[test]
    fn reconnect_delay_capped_at_30_seconds_plus_jitter() {
        let delay = calculate_backoff(10);
        assert!(
            delay <= Duration::from_secs(35),
            "Reconnect delay must be capped at ~35s (30s base + 5s jitter), got {:?}",
            delay
        );
    }

    // ===========================================
    // Token Lifecycle Tests
    // ===========================================

    #[test]
    fn token_will_expire_schedules_refresh_without_state_change() {
        let (machine, actions) = connected().on_event(Event::TokenWillExpire {
            remaining: Duration::from_secs(60),
        });
        assert!(machine.state().is_connected());
        assert_eq!(machine.token(), TokenStatus::Expiring);
        assert!(actions.contains(&Action::ScheduleTokenRefresh {
            delay: Duration::from_secs(55)
        }));
        assert!(status_changes(&actions).is_empty());
    }

    #[test]
    fn expired_token_without_refresh_fails_after_grace() {
        let (machine, actions) = connected().on_event(Event::TokenExpired);
        assert!(actions.contains(&Action::StartTokenGrace {
            delay: Duration::from_secs(30)
        }));
        let (machine, actions) = machine.on_event(Event::TokenGraceElapsed);
        assert_eq!(
            machine.state(),
            &ConnectionState::Failed(FailureReason::Auth("token expired".into()))
        );
        assert_eq!(status_changes(&actions).len(), 1);
    }

    #[test]
    fn refresh_within_grace_keeps_session() {
        let (machine, actions) = drive(
            connected(),
            vec![Event::TokenExpired, Event::TokenRefreshed, Event::TokenGraceElapsed],
        );
        assert!(machine.state().is_connected());
        assert_eq!(machine.token(), TokenStatus::Valid);
        assert!(actions.contains(&Action::CancelTokenGrace));
    }

    #[test]
    fn fatal_error_fails_live_session() {
        let (machine, _) = connected().on_event(Event::Fatal {
            error: "protocol".into(),
        });
        assert_eq!(
            machine.state(),
            &ConnectionState::Failed(FailureReason::Fatal("protocol".into()))
        );
    }
}
