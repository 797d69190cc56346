//! Listener registry and re-entrancy-safe fan-out.
//!
//! Listeners are registered under a caller-chosen key. Registering a key
//! that already exists replaces the listener in place, keeping its position.
//! Delivery walks a snapshot of the registry taken per event, so listeners
//! may add or remove listeners while being notified.
//!
//! Events raised while a delivery is in progress (a listener calling back
//! into the client) are queued behind the current one and delivered after
//! it, never inline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chatsync_types::{
    Channel, ChannelId, MarkerList, MemberEntry, Message, MessageId, Reaction, TempId,
    UnreadCounts, UnreadTotals, User, UserId, DeliveryStatus, MessageKey,
};

use crate::lock::lock;
use crate::state::ConnectionEvent;

/// Change notification delivered to channel listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Channel created or first seen.
    Created(Channel),
    /// Channel fields changed.
    Updated(Channel),
    /// Channel removed (deleted or left).
    Deleted(ChannelId),
    /// Channel hidden.
    Hidden(ChannelId),
    /// Channel shown again.
    Shown(ChannelId),
    /// Notifications muted.
    Muted(ChannelId),
    /// Notifications unmuted.
    Unmuted(ChannelId),
    /// Channel blocked.
    Blocked(ChannelId),
    /// Channel unblocked.
    Unblocked(ChannelId),
    /// Channel marked as unread.
    MarkedAsUnread(ChannelId),
    /// All messages removed.
    HistoryCleared(ChannelId),
    /// Members added by someone.
    MembersAdded {
        /// Channel.
        channel_id: ChannelId,
        /// New members.
        members: Vec<MemberEntry>,
    },
    /// A user joined.
    MemberJoined {
        /// Channel.
        channel_id: ChannelId,
        /// New member.
        member: MemberEntry,
    },
    /// A user left.
    MemberLeft {
        /// Channel.
        channel_id: ChannelId,
        /// Former member.
        user_id: UserId,
    },
    /// Members removed by someone.
    MembersKicked {
        /// Channel.
        channel_id: ChannelId,
        /// Former members.
        user_ids: Vec<UserId>,
    },
    /// Roles changed.
    MembersRoleChanged {
        /// Channel.
        channel_id: ChannelId,
        /// Members with their new roles.
        members: Vec<MemberEntry>,
    },
    /// Members blocked in the channel.
    MembersBlocked {
        /// Channel.
        channel_id: ChannelId,
        /// Blocked members.
        user_ids: Vec<UserId>,
    },
    /// Members unblocked in the channel.
    MembersUnblocked {
        /// Channel.
        channel_id: ChannelId,
        /// Unblocked members.
        user_ids: Vec<UserId>,
    },
    /// Ownership moved.
    OwnerChanged {
        /// Channel.
        channel_id: ChannelId,
        /// New owner.
        new_owner: MemberEntry,
        /// Previous owner.
        old_owner: Option<UserId>,
    },
    /// A message arrived from the server.
    MessageReceived(Message),
    /// A local send was stored optimistically.
    MessagePending(Message),
    /// A local send was acknowledged.
    MessageSent {
        /// Temporary id the send was created with.
        tid: TempId,
        /// Confirmed message.
        message: Message,
    },
    /// A local send failed for good.
    MessageFailed {
        /// Temporary id of the send.
        tid: TempId,
        /// Message as stored, status `Failed`.
        message: Message,
    },
    /// A message was edited.
    MessageEdited(Message),
    /// A message was deleted.
    MessageDeleted {
        /// Channel.
        channel_id: ChannelId,
        /// Deleted message.
        message_id: MessageId,
    },
    /// Delivery status of an own message advanced.
    DeliveryStatusChanged {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        key: MessageKey,
        /// New status.
        status: DeliveryStatus,
    },
    /// Markers set by a user.
    MarkersReceived {
        /// Channel.
        channel_id: ChannelId,
        /// The markers.
        markers: MarkerList,
    },
    /// Reaction added or rescored.
    ReactionAdded {
        /// Channel.
        channel_id: ChannelId,
        /// Updated message.
        message: Option<Message>,
        /// The reaction.
        reaction: Reaction,
    },
    /// Reaction removed.
    ReactionDeleted {
        /// Channel.
        channel_id: ChannelId,
        /// Updated message.
        message: Option<Message>,
        /// The reaction.
        reaction: Reaction,
    },
    /// A user started typing.
    TypingStarted {
        /// Channel.
        channel_id: ChannelId,
        /// Typing user.
        user_id: UserId,
    },
    /// A user stopped typing.
    TypingStopped {
        /// Channel.
        channel_id: ChannelId,
        /// User.
        user_id: UserId,
    },
    /// A user profile or presence changed.
    UserUpdated(User),
    /// Unread counts of a channel changed.
    UnreadCountUpdated {
        /// Channel.
        channel_id: ChannelId,
        /// New counts.
        counts: UnreadCounts,
    },
    /// Aggregate unread counts changed.
    TotalUnreadUpdated(UnreadTotals),
}

impl ChannelEvent {
    /// Channel the event belongs to, if any.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Created(c) | Self::Updated(c) => Some(&c.id),
            Self::Deleted(id)
            | Self::Hidden(id)
            | Self::Shown(id)
            | Self::Muted(id)
            | Self::Unmuted(id)
            | Self::Blocked(id)
            | Self::Unblocked(id)
            | Self::MarkedAsUnread(id)
            | Self::HistoryCleared(id) => Some(id),
            Self::MessageReceived(m) | Self::MessagePending(m) | Self::MessageEdited(m) => {
                Some(&m.channel_id)
            }
            Self::MessageSent { message, .. } | Self::MessageFailed { message, .. } => {
                Some(&message.channel_id)
            }
            Self::MembersAdded { channel_id, .. }
            | Self::MemberJoined { channel_id, .. }
            | Self::MemberLeft { channel_id, .. }
            | Self::MembersKicked { channel_id, .. }
            | Self::MembersRoleChanged { channel_id, .. }
            | Self::MembersBlocked { channel_id, .. }
            | Self::MembersUnblocked { channel_id, .. }
            | Self::OwnerChanged { channel_id, .. }
            | Self::MessageDeleted { channel_id, .. }
            | Self::DeliveryStatusChanged { channel_id, .. }
            | Self::MarkersReceived { channel_id, .. }
            | Self::ReactionAdded { channel_id, .. }
            | Self::ReactionDeleted { channel_id, .. }
            | Self::TypingStarted { channel_id, .. }
            | Self::TypingStopped { channel_id, .. }
            | Self::UnreadCountUpdated { channel_id, .. } => Some(channel_id),
            Self::UserUpdated(_) | Self::TotalUnreadUpdated(_) => None,
        }
    }
}

/// Receives channel, message, member and counter events.
pub trait ChannelListener: Send + Sync {
    /// Called once per event, in commit order.
    fn on_event(&self, event: &ChannelEvent);
}

impl<F> ChannelListener for F
where
    F: Fn(&ChannelEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChannelEvent) {
        self(event)
    }
}

/// Receives connection status and token events.
pub trait ConnectionListener: Send + Sync {
    /// Called once per event, in order.
    fn on_event(&self, event: &ConnectionEvent);
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConnectionEvent) {
        self(event)
    }
}

/// Which events a channel listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerScope {
    /// Everything.
    All,
    /// Events of one channel, plus the aggregate ones.
    Channel(ChannelId),
}

impl ListenerScope {
    /// Whether an event is delivered under this scope.
    pub fn accepts(&self, event: &ChannelEvent) -> bool {
        match self {
            Self::All => true,
            Self::Channel(wanted) => event.channel_id().map_or(true, |id| id == wanted),
        }
    }
}

/// Ordered registry keyed by listener id.
#[derive(Debug)]
pub struct ListenerRegistry<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for ListenerRegistry<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V: Clone> ListenerRegistry<V> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. An existing key is replaced in place.
    pub fn add(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Remove a listener. Returns true if it was registered.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    /// Registered keys, in registration order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Copy of the registered listeners, in order.
    pub fn snapshot(&self) -> Vec<V> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A registered channel listener with its scope.
pub type ScopedListener = (ListenerScope, Arc<dyn ChannelListener>);

/// Event queue that serialises delivery.
///
/// Whoever finds the queue idle becomes the drainer and delivers until the
/// queue is empty; everyone else only enqueues.
#[derive(Debug)]
pub struct Fanout<E> {
    inner: Mutex<FanoutInner<E>>,
}

#[derive(Debug)]
struct FanoutInner<E> {
    queue: VecDeque<E>,
    draining: bool,
}

impl<E> Default for Fanout<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(FanoutInner {
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }
}

/// Clears the draining flag if a listener panics mid-delivery.
struct DrainGuard<'a, E> {
    fanout: &'a Fanout<E>,
    armed: bool,
}

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.fanout.inner).draining = false;
        }
    }
}

impl<E> Fanout<E> {
    /// Empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue events without delivering them.
    pub fn push(&self, events: impl IntoIterator<Item = E>) {
        lock(&self.inner).queue.extend(events);
    }

    /// Deliver queued events with `deliver`, unless a delivery is already
    /// running further up the stack (it will pick them up).
    pub fn drain(&self, mut deliver: impl FnMut(&E)) {
        {
            let mut inner = lock(&self.inner);
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        let mut guard = DrainGuard {
            fanout: self,
            armed: true,
        };
        loop {
            // Observing the empty queue and giving up the drainer role must
            // happen under one lock, or a concurrent push is stranded.
            let next = {
                let mut inner = lock(&self.inner);
                let next = inner.queue.pop_front();
                if next.is_none() {
                    inner.draining = false;
                }
                next
            };
            match next {
                Some(event) => deliver(&event),
                None => {
                    guard.armed = false;
                    break;
                }
            }
        }
    }

    /// Events waiting for delivery.
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }
}
