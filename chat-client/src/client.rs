//! ChatClient - the main interface for chatsync.
//!
//! This module provides [`ChatClient`], the primary API for applications
//! to talk to the chat service while keeping a local, listener-driven view
//! of channels, messages and members.
//!
//! # Architecture
//!
//! ChatClient uses pure state machines (from chatsync-core) for session and
//! store logic and interprets their actions to perform actual I/O via the
//! Transport trait.
//!
//! ```text
//! Application → ChatClient → Transport → Network
//!                   ↓
//!             chatsync-core (connection machine, store, dispatcher)
//! ```
//!
//! Inbound frames are read by a background task and applied through the
//! [`Dispatcher`]; local commands go out through [`Transport::request`] and
//! their results are committed the same way.
//!
//! # Example
//!
//! ```ignore
//! use chatsync_client::{ChatClient, ClientConfig, MockTransport};
//!
//! let config = ClientConfig::new("wss://chat.example.com");
//! let client = ChatClient::new(config, MockTransport::new(), UserId::new("alice"));
//!
//! client.connect("access-token").await?;
//! client.send_message(&channel_id, MessageDraft::text("hi")).await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chatsync_core::lock::{lock, write};
use chatsync_core::{
    Action, AuthPhase, ChannelListener, ConnectionEvent, ConnectionListener, ConnectionMachine,
    ConnectionState, Dispatcher, Event, FailureReason, Fanout, ListenerRegistry, ListenerScope,
    LocalStore, Outbox, SharedStore,
};
use chatsync_types::{
    ChannelId, ChatError, Command, Frame, MessageId, Response, ServerEvent, UnreadCounts,
    UnreadTotals, UserId, MARKER_RECEIVED,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::transport::{Transport, TransportError};

/// Supplies fresh access tokens before the current one expires.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a new token.
    async fn fetch_token(&self) -> Result<String, ChatError>;
}

type Task<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Background work that a later action can supersede.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Reconnect,
    TokenGrace,
    TokenRefresh,
    Session,
    Link,
}

/// Arming counters. A timer only fires if its epoch is still current.
#[derive(Debug, Default)]
struct Epochs {
    reconnect: u64,
    token_grace: u64,
    token_refresh: u64,
    session: u64,
    link: u64,
}

impl Epochs {
    fn slot(&mut self, timer: Timer) -> &mut u64 {
        match timer {
            Timer::Reconnect => &mut self.reconnect,
            Timer::TokenGrace => &mut self.token_grace,
            Timer::TokenRefresh => &mut self.token_refresh,
            Timer::Session => &mut self.session,
            Timer::Link => &mut self.link,
        }
    }

    fn bump(&mut self, timer: Timer) -> u64 {
        let slot = self.slot(timer);
        *slot += 1;
        *slot
    }

    fn is_current(&mut self, timer: Timer, epoch: u64) -> bool {
        *self.slot(timer) == epoch
    }
}

/// Transport work decided under the machine lock and performed after it is
/// released. Each step carries the link epoch it was issued under.
#[derive(Debug)]
enum LinkIo {
    Open(u64),
    Authenticate(AuthPhase, u64),
    Close(u64),
}

pub(crate) struct Inner<T: Transport> {
    pub(crate) config: ClientConfig,
    pub(crate) transport: T,
    pub(crate) user_id: UserId,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) outbox: StdMutex<Outbox>,
    machine: StdMutex<ConnectionMachine>,
    link: Mutex<()>,
    status: watch::Sender<ConnectionState>,
    connection_listeners: StdMutex<ListenerRegistry<Arc<dyn ConnectionListener>>>,
    connection_events: Fanout<ConnectionEvent>,
    token: StdMutex<String>,
    token_provider: StdMutex<Option<Arc<dyn TokenProvider>>>,
    epochs: StdMutex<Epochs>,
    offline_since: StdMutex<Option<u64>>,
    held_frames: StdMutex<Option<Vec<Frame>>>,
}

/// The main chat client.
///
/// Manages the session, the outgoing message queue and the local store.
/// Cloning is cheap; clones share everything.
pub struct ChatClient<T: Transport> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ChatClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ChatClient<T> {
    /// Create a client for `user_id` with an empty store.
    pub fn new(config: ClientConfig, transport: T, user_id: UserId) -> Self {
        Self::with_store(config, transport, user_id, LocalStore::shared())
    }

    /// Create a client over an existing store (e.g. one restored from disk).
    pub fn with_store(
        config: ClientConfig,
        transport: T,
        user_id: UserId,
        store: SharedStore,
    ) -> Self {
        write(&store).set_current_user(user_id.clone());
        let machine = ConnectionMachine::new(config.token_grace(), config.token_refresh_lead());
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let outbox = Outbox::new(config.max_outbox, config.max_send_attempts);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                user_id,
                dispatcher: Dispatcher::new(store),
                outbox: StdMutex::new(outbox),
                machine: StdMutex::new(machine),
                link: Mutex::new(()),
                status,
                connection_listeners: StdMutex::new(ListenerRegistry::new()),
                connection_events: Fanout::new(),
                token: StdMutex::new(String::new()),
                token_provider: StdMutex::new(None),
                epochs: StdMutex::new(Epochs::default()),
                offline_since: StdMutex::new(None),
                held_frames: StdMutex::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// Connect and authenticate with `token`.
    ///
    /// Resolves once the session is ready. A connect that does not finish
    /// within the configured timeout ends in
    /// [`ConnectionState::ConnectionTimeout`]. Calling this from a terminal
    /// state starts over.
    pub async fn connect(&self, token: &str) -> Result<(), ChatError> {
        *lock(&self.inner.token) = token.to_string();
        if self.connection_state().is_terminal() {
            self.inner.drive(Event::DisconnectRequested).await;
        }

        let inner = Arc::clone(&self.inner);
        let session = async move {
            inner.drive(Event::ConnectRequested).await;
            inner.wait_for_session().await
        };
        let timeout = self.inner.config.connection_timeout();
        match tokio::time::timeout(timeout, session).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "connect timed out");
                self.inner.drive(Event::ConnectTimedOut).await;
                Err(ChatError::ConnectionTimeout)
            }
        }
    }

    /// Close the session. Queued messages stay in the outbox.
    pub async fn disconnect(&self) {
        self.inner.drive(Event::DisconnectRequested).await;
    }

    /// Current session state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.status.borrow().clone()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Install the source of fresh tokens used when the service announces
    /// expiry.
    pub fn set_token_provider(&self, provider: Arc<dyn TokenProvider>) {
        *lock(&self.inner.token_provider) = Some(provider);
    }

    /// Supply a fresh token. Cancels a running expiry grace window.
    pub async fn update_token(&self, token: &str) {
        self.inner.refresh_token(token.to_string()).await;
    }

    /// Register a connection listener under `key`. An existing key is
    /// replaced.
    pub fn add_connection_listener(
        &self,
        key: impl Into<String>,
        listener: Arc<dyn ConnectionListener>,
    ) {
        lock(&self.inner.connection_listeners).add(key, listener);
    }

    /// Remove a connection listener.
    pub fn remove_connection_listener(&self, key: &str) -> bool {
        lock(&self.inner.connection_listeners).remove(key)
    }

    /// Register a channel listener under `key`. An existing key is replaced.
    pub fn add_channel_listener(
        &self,
        key: impl Into<String>,
        scope: ListenerScope,
        listener: Arc<dyn ChannelListener>,
    ) {
        self.inner.dispatcher.add_listener(key, scope, listener);
    }

    /// Remove a channel listener.
    pub fn remove_channel_listener(&self, key: &str) -> bool {
        self.inner.dispatcher.remove_listener(key)
    }

    /// The signed-in user.
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// The local store.
    pub fn store(&self) -> &SharedStore {
        self.inner.dispatcher.store()
    }

    /// Read the local store.
    pub fn read<R>(&self, f: impl FnOnce(&LocalStore) -> R) -> R {
        self.inner.dispatcher.read(f)
    }

    /// Aggregate unread counts.
    pub fn total_unreads(&self) -> UnreadTotals {
        self.inner.dispatcher.totals()
    }

    /// Unread counts of one channel.
    pub fn channel_unreads(&self, channel_id: &ChannelId) -> UnreadCounts {
        self.inner.dispatcher.channel_counts(channel_id)
    }

    /// Number of messages waiting for server acknowledgement.
    pub fn outbox_len(&self) -> usize {
        lock(&self.inner.outbox).len()
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> Inner<T> {
    pub(crate) fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    /// Send a command. Fails fast while the session is not connected.
    ///
    /// A network failure on a live session is treated as a lost connection:
    /// the session starts reconnecting and resumes (flushing the outbox) once
    /// it is back.
    pub(crate) async fn request(self: &Arc<Self>, command: Command) -> Result<Response, ChatError> {
        if !self.is_connected() {
            return Err(ChatError::NetworkUnavailable("not connected".into()));
        }
        let name = command.name();
        debug!(command = name, "request");
        match self.transport.request(command).await {
            Ok(response) => Ok(response),
            Err(error) => {
                debug!(command = name, %error, "request failed");
                let error = ChatError::from(error);
                if error.is_retryable() && self.is_connected() {
                    self.mark_offline();
                    self.drive(Event::NetworkLost {
                        reason: error.to_string(),
                    })
                    .await;
                }
                Err(error)
            }
        }
    }

    fn mark_offline(&self) {
        lock(&self.offline_since).get_or_insert_with(now_ms);
    }

    // =======================================================================
    // Connection driver
    // =======================================================================

    /// Feed an event to the connection machine and execute its actions.
    pub(crate) async fn drive(self: &Arc<Self>, event: Event) {
        self.run(event, None).await;
    }

    async fn fire(self: &Arc<Self>, timer: Timer, epoch: u64, event: Event) {
        self.run(event, Some((timer, epoch))).await;
    }

    fn run(self: &Arc<Self>, event: Event, armed: Option<(Timer, u64)>) -> Task<'_> {
        Box::pin(async move {
            let ready = matches!(event, Event::SessionReady);
            let (work, release) = {
                let mut machine = lock(&self.machine);
                if let Some((timer, epoch)) = armed {
                    let current = lock(&self.epochs).is_current(timer, epoch);
                    if !current {
                        debug!(?timer, "superseded timer ignored");
                        return;
                    }
                }
                debug!(?event, state = %machine.state(), "connection event");
                let (next, actions) = machine.clone().on_event(event);
                *machine = next;
                self.status.send_replace(machine.state().clone());
                // Without a resync nothing is older than the held frames.
                let release = ready
                    && machine.state().is_connected()
                    && !actions.contains(&Action::StartResync);
                let work = actions
                    .into_iter()
                    .filter_map(|action| self.schedule(action))
                    .collect::<Vec<_>>();
                (work, release)
            };
            self.deliver_connection_events();
            if release {
                self.release_held_frames().await;
            }

            for io in work {
                if let Some((epoch, events)) = self.perform(io).await {
                    for event in events {
                        self.fire(Timer::Link, epoch, event).await;
                    }
                }
            }
        })
    }

    /// Apply the bookkeeping part of an action under the machine lock and
    /// hand back the transport work, if any.
    fn schedule(self: &Arc<Self>, action: Action) -> Option<LinkIo> {
        match action {
            Action::OpenTransport => Some(LinkIo::Open(lock(&self.epochs).bump(Timer::Link))),
            Action::Authenticate(phase) => {
                let epoch = lock(&self.epochs).link;
                Some(LinkIo::Authenticate(phase, epoch))
            }
            Action::CloseTransport => {
                let mut epochs = lock(&self.epochs);
                epochs.bump(Timer::Session);
                Some(LinkIo::Close(epochs.bump(Timer::Link)))
            }
            Action::StartResync => {
                let inner = Arc::clone(self);
                spawn(async move { inner.resync().await });
                None
            }
            Action::StartReconnectTimer { delay } => {
                info!(?delay, "scheduling reconnect");
                self.start_timer(Timer::Reconnect, delay, Event::ReconnectTimer);
                None
            }
            Action::CancelReconnect => {
                self.cancel_timer(Timer::Reconnect);
                None
            }
            Action::ScheduleTokenRefresh { delay } => {
                self.schedule_token_refresh(delay);
                None
            }
            Action::StartTokenGrace { delay } => {
                self.start_timer(Timer::TokenGrace, delay, Event::TokenGraceElapsed);
                None
            }
            Action::CancelTokenGrace => {
                self.cancel_timer(Timer::TokenGrace);
                None
            }
            Action::Emit(event) => {
                if let ConnectionEvent::StatusChanged { from, to } = &event {
                    info!(%from, %to, "connection status changed");
                }
                self.connection_events.push([event]);
                None
            }
        }
    }

    /// Run one transport step. Steps are serialized on the link lock and
    /// skipped once a later open or close superseded them. Returns the
    /// events to feed back, tagged with the step's epoch.
    async fn perform(self: &Arc<Self>, io: LinkIo) -> Option<(u64, Vec<Event>)> {
        if let LinkIo::Close(epoch) = io {
            self.close_link(epoch).await;
            return None;
        }
        let _link = self.link.lock().await;
        match io {
            LinkIo::Open(epoch) => {
                if !self.link_is_current(epoch) {
                    return None;
                }
                let attempt = tokio::time::timeout(
                    self.config.connection_timeout(),
                    self.transport.connect(&self.config.api_url),
                )
                .await
                .unwrap_or(Err(TransportError::Timeout));
                let event = match attempt {
                    Ok(()) => Event::TransportOpened,
                    Err(error) => {
                        warn!(%error, "transport connect failed");
                        Event::NetworkLost {
                            reason: error.to_string(),
                        }
                    }
                };
                Some((epoch, vec![event]))
            }
            LinkIo::Authenticate(phase, epoch) => {
                if !self.link_is_current(epoch) {
                    return None;
                }
                let token = lock(&self.token).clone();
                let events = match self.transport.authenticate(phase, &token).await {
                    Ok(()) => {
                        let mut events = vec![Event::AuthSucceeded(phase)];
                        if phase == AuthPhase::Socket {
                            self.start_frame_loop();
                            events.push(Event::SessionReady);
                        }
                        events
                    }
                    Err(TransportError::Unauthorized(error)) => {
                        warn!(?phase, %error, "authentication refused");
                        vec![Event::AuthFailed { error }]
                    }
                    Err(error) => vec![Event::NetworkLost {
                        reason: error.to_string(),
                    }],
                };
                Some((epoch, events))
            }
            LinkIo::Close(_) => None,
        }
    }

    /// Close the transport. While a connect or handshake still holds the
    /// link the close is deferred until it finishes, so callers never wait
    /// on network I/O to tear down.
    async fn close_link(self: &Arc<Self>, epoch: u64) {
        match self.link.try_lock() {
            Ok(_link) => self.close_transport(epoch).await,
            Err(_) => {
                debug!(epoch, "link busy; close deferred");
                let inner = Arc::clone(self);
                spawn(async move {
                    let _link = inner.link.lock().await;
                    inner.close_transport(epoch).await;
                });
            }
        }
    }

    async fn close_transport(&self, epoch: u64) {
        if !self.link_is_current(epoch) {
            return;
        }
        if let Err(error) = self.transport.close().await {
            debug!(%error, "transport close failed");
        }
    }

    fn link_is_current(&self, epoch: u64) -> bool {
        let current = lock(&self.epochs).is_current(Timer::Link, epoch);
        if !current {
            debug!(epoch, "superseded transport step skipped");
        }
        current
    }

    async fn wait_for_session(&self) -> Result<(), ChatError> {
        let mut status = self.status.subscribe();
        loop {
            let outcome = match &*status.borrow_and_update() {
                ConnectionState::Connected => Some(Ok(())),
                ConnectionState::Failed(FailureReason::Auth(reason)) => {
                    Some(Err(ChatError::AuthFailed(reason.clone())))
                }
                ConnectionState::Failed(FailureReason::Fatal(reason)) => {
                    Some(Err(ChatError::NetworkUnavailable(reason.clone())))
                }
                ConnectionState::ConnectionTimeout => Some(Err(ChatError::ConnectionTimeout)),
                ConnectionState::Disconnected => Some(Err(ChatError::NetworkUnavailable(
                    "disconnected".into(),
                ))),
                _ => None,
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            if status.changed().await.is_err() {
                return Err(ChatError::NetworkUnavailable("client dropped".into()));
            }
        }
    }

    fn start_timer(self: &Arc<Self>, timer: Timer, delay: Duration, event: Event) {
        let epoch = lock(&self.epochs).bump(timer);
        let inner = Arc::clone(self);
        spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(timer, epoch, event).await;
        });
    }

    fn cancel_timer(&self, timer: Timer) {
        lock(&self.epochs).bump(timer);
    }

    fn deliver_connection_events(&self) {
        self.connection_events.drain(|event| {
            let listeners = lock(&self.connection_listeners).snapshot();
            for listener in listeners {
                listener.on_event(event);
            }
        });
    }

    // =======================================================================
    // Token lifecycle
    // =======================================================================

    fn schedule_token_refresh(self: &Arc<Self>, delay: Duration) {
        let provider = lock(&self.token_provider).clone();
        let Some(provider) = provider else {
            warn!("token expiring and no token provider is set");
            return;
        };
        let epoch = lock(&self.epochs).bump(Timer::TokenRefresh);
        let inner = Arc::clone(self);
        spawn(async move {
            tokio::time::sleep(delay).await;
            let current = lock(&inner.epochs).is_current(Timer::TokenRefresh, epoch);
            if !current {
                return;
            }
            match provider.fetch_token().await {
                Ok(token) => inner.refresh_token(token).await,
                Err(error) => warn!(%error, "token refresh failed"),
            }
        });
    }

    async fn refresh_token(self: &Arc<Self>, token: String) {
        *lock(&self.token) = token.clone();
        if self.is_connected() {
            let _link = self.link.lock().await;
            if let Err(error) = self.transport.authenticate(AuthPhase::Socket, &token).await {
                warn!(%error, "re-authentication with refreshed token failed");
            }
        }
        info!("access token refreshed");
        self.drive(Event::TokenRefreshed).await;
    }

    // =======================================================================
    // Inbound frames
    // =======================================================================

    /// Frames are held from the start of a session until it is ready, and
    /// on resume until the resync burst has been applied.
    fn start_frame_loop(self: &Arc<Self>) {
        lock(&self.held_frames).get_or_insert_with(Vec::new);
        let epoch = lock(&self.epochs).bump(Timer::Session);
        let inner = Arc::clone(self);
        spawn(async move { inner.frame_loop(epoch).await });
    }

    async fn frame_loop(self: Arc<Self>, epoch: u64) {
        loop {
            match self.transport.recv().await {
                Ok(frame) => self.receive(frame).await,
                Err(error) => {
                    debug!(%error, "frame stream ended");
                    if lock(&self.epochs).is_current(Timer::Session, epoch) {
                        self.mark_offline();
                    }
                    self.fire(
                        Timer::Session,
                        epoch,
                        Event::NetworkLost {
                            reason: error.to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        }
    }

    async fn receive(self: &Arc<Self>, frame: Frame) {
        {
            let mut held = lock(&self.held_frames);
            if let Some(frames) = held.as_mut() {
                frames.push(frame);
                return;
            }
        }
        self.handle_frame(frame).await;
    }

    /// Apply held frames in arrival order and resume live delivery. Frames
    /// arriving meanwhile are still held and picked up by the next round.
    async fn release_held_frames(self: &Arc<Self>) {
        loop {
            let batch = {
                let mut held = lock(&self.held_frames);
                match held.as_mut() {
                    Some(frames) if !frames.is_empty() => std::mem::take(frames),
                    _ => {
                        *held = None;
                        return;
                    }
                }
            };
            debug!(frames = batch.len(), "applying held frames");
            for frame in batch {
                self.handle_frame(frame).await;
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let event = match frame.decode() {
            Ok(event) => event,
            Err(error) => {
                warn!(event_type = %frame.event_type, %error, "dropping malformed frame");
                return;
            }
        };
        self.sweep_expired_flags();

        match event {
            ServerEvent::TokenWillExpire { remaining_ms } => {
                self.drive(Event::TokenWillExpire {
                    remaining: Duration::from_millis(remaining_ms),
                })
                .await;
            }
            ServerEvent::TokenExpired {} => self.drive(Event::TokenExpired).await,
            event => {
                let receipt = match &event {
                    ServerEvent::MessageReceived {
                        channel_id,
                        message,
                        ..
                    } => {
                        self.ensure_channel(channel_id).await;
                        let incoming = message.sender != self.user_id && !message.transient;
                        message
                            .server_id()
                            .filter(|_| incoming && self.config.auto_mark_delivered)
                            .map(|id| (channel_id.clone(), id.clone()))
                    }
                    _ => None,
                };
                self.dispatcher.apply(event);
                if let Some((channel_id, message_id)) = receipt {
                    self.send_receipt(channel_id, message_id);
                }
            }
        }
    }

    /// Fetch a channel the store does not know before applying its messages.
    async fn ensure_channel(self: &Arc<Self>, channel_id: &ChannelId) {
        let known = self.dispatcher.read(|store| store.channel(channel_id).is_some());
        if known {
            return;
        }
        let client = ChatClient::from_inner(Arc::clone(self));
        if let Err(error) = client.get_channel(channel_id).await {
            debug!(%channel_id, %error, "could not fetch channel for incoming message");
        }
    }

    fn send_receipt(self: &Arc<Self>, channel_id: ChannelId, message_id: MessageId) {
        let client = ChatClient::from_inner(Arc::clone(self));
        spawn(async move {
            if let Err(error) = client
                .mark_messages(&channel_id, vec![message_id], MARKER_RECEIVED)
                .await
            {
                debug!(%channel_id, %error, "received marker not sent");
            }
        });
    }

    fn sweep_expired_flags(&self) {
        let now = now_ms();
        let due = self.dispatcher.read(|store| {
            store.channels().any(|c| {
                c.muted.has_expired(now) || c.hidden.has_expired(now) || c.archived.has_expired(now)
            })
        });
        if !due {
            return;
        }
        self.dispatcher.commit(|store| {
            let events = store
                .expire_flags(now)
                .iter()
                .filter_map(|id| store.channel(id).cloned())
                .map(chatsync_core::ChannelEvent::Updated)
                .collect();
            ((), events)
        });
    }

    // =======================================================================
    // Resume
    // =======================================================================

    /// Resubmit parked sends, then catch up on what happened while offline.
    async fn resync(self: Arc<Self>) {
        let client = ChatClient::from_inner(Arc::clone(&self));
        client.flush_outbox().await;

        let since = lock(&self.offline_since).take().unwrap_or(0);
        info!(since, "resynchronizing");
        match self.request(Command::Resync { since }).await {
            Ok(Response::Events { frames }) => {
                debug!(frames = frames.len(), "applying resync burst");
                for frame in frames {
                    self.handle_frame(frame).await;
                }
                self.dispatcher.recount();
            }
            Ok(other) => warn!(response = other.name(), "unexpected resync response"),
            Err(error) => warn!(%error, "resync failed"),
        }
        self.release_held_frames().await;
    }
}

/// Run a background task on the current runtime.
fn spawn<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => warn!("no async runtime; background task dropped"),
    }
}

/// Wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Error for a response of the wrong shape.
pub(crate) fn unexpected(command: &str, response: &Response) -> ChatError {
    ChatError::Malformed(format!(
        "unexpected {} response to {}",
        response.name(),
        command
    ))
}
