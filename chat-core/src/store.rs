//! Local store for chatsync.
//!
//! The single in-memory source of truth for channels, messages, users,
//! members, reactions and markers. It never touches the network.
//!
//! Every mutation appends a [`StoreChange`] to a per-kind ordered log. The
//! dispatcher drains the log after each commit to keep the unread counters
//! current, so counters always see mutations in the order they happened.
//!
//! Upserts merge by id: optional fields missing from an update keep their
//! stored value, and fields derived locally (unread counts, read watermark,
//! the current user's own reactions and markers) are never overwritten by a
//! server record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chatsync_types::{
    Channel, ChannelId, ChatError, DeliveryStatus, LastMessage, Marker, MarkerList, Member,
    MemberEntry, Message, MessageId, MessageKey, MessageState, Reaction, TempId, UnreadCounts,
    User, UserId, MARKER_DISPLAYED, MARKER_RECEIVED,
};

/// Store shared between the client, dispatcher and cursors.
pub type SharedStore = Arc<RwLock<LocalStore>>;

/// Entity kinds with their own mutation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// Channels.
    Channel,
    /// Messages.
    Message,
    /// Members.
    Member,
    /// Users.
    User,
    /// Reactions.
    Reaction,
    /// Markers.
    Marker,
}

/// A single store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Channel inserted or merged.
    ChannelUpserted {
        /// Channel.
        channel_id: ChannelId,
        /// True when the channel was not stored before.
        created: bool,
    },
    /// Channel and everything scoped to it removed.
    ChannelRemoved {
        /// Channel.
        channel_id: ChannelId,
    },
    /// New message stored.
    MessageInserted {
        /// Channel.
        channel_id: ChannelId,
        /// Key of the new message.
        key: MessageKey,
    },
    /// Stored message changed.
    MessageUpdated {
        /// Channel.
        channel_id: ChannelId,
        /// Key of the message.
        key: MessageKey,
    },
    /// A pending message received its server id.
    MessageConfirmed {
        /// Channel.
        channel_id: ChannelId,
        /// Temporary id it was created with.
        tid: TempId,
        /// New key.
        key: MessageKey,
    },
    /// Every message of a channel removed.
    MessagesCleared {
        /// Channel.
        channel_id: ChannelId,
    },
    /// Member inserted or changed.
    MemberUpserted {
        /// Channel.
        channel_id: ChannelId,
        /// Member.
        user_id: UserId,
    },
    /// Member removed.
    MemberRemoved {
        /// Channel.
        channel_id: ChannelId,
        /// Member.
        user_id: UserId,
    },
    /// User inserted or merged.
    UserUpserted {
        /// User.
        user_id: UserId,
    },
    /// Reaction inserted or rescored.
    ReactionUpserted {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
    },
    /// Reaction removed.
    ReactionRemoved {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
    },
    /// Marker recorded.
    MarkerAdded {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
    },
}

impl Change {
    /// Entity kind the change belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::ChannelUpserted { .. } | Self::ChannelRemoved { .. } => EntityKind::Channel,
            Self::MessageInserted { .. }
            | Self::MessageUpdated { .. }
            | Self::MessageConfirmed { .. }
            | Self::MessagesCleared { .. } => EntityKind::Message,
            Self::MemberUpserted { .. } | Self::MemberRemoved { .. } => EntityKind::Member,
            Self::UserUpserted { .. } => EntityKind::User,
            Self::ReactionUpserted { .. } | Self::ReactionRemoved { .. } => EntityKind::Reaction,
            Self::MarkerAdded { .. } => EntityKind::Marker,
        }
    }

    /// Channel the change is scoped to, if any.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::UserUpserted { .. } => None,
            Self::ChannelUpserted { channel_id, .. }
            | Self::ChannelRemoved { channel_id }
            | Self::MessageInserted { channel_id, .. }
            | Self::MessageUpdated { channel_id, .. }
            | Self::MessageConfirmed { channel_id, .. }
            | Self::MessagesCleared { channel_id }
            | Self::MemberUpserted { channel_id, .. }
            | Self::MemberRemoved { channel_id, .. }
            | Self::ReactionUpserted { channel_id, .. }
            | Self::ReactionRemoved { channel_id, .. }
            | Self::MarkerAdded { channel_id, .. } => Some(channel_id),
        }
    }
}

/// A logged mutation with its per-kind sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Sequence within the entity kind, starting at 1.
    pub seq: u64,
    /// The mutation.
    pub change: Change,
}

/// Ordered mutation log, one sequence per entity kind.
#[derive(Debug, Default)]
pub struct MutationLog {
    seqs: HashMap<EntityKind, u64>,
    pending: Vec<StoreChange>,
}

impl MutationLog {
    fn record(&mut self, change: Change) {
        let seq = self.seqs.entry(change.kind()).or_insert(0);
        *seq += 1;
        self.pending.push(StoreChange { seq: *seq, change });
    }

    /// Last sequence number issued for `kind`.
    pub fn last_seq(&self, kind: EntityKind) -> u64 {
        self.seqs.get(&kind).copied().unwrap_or(0)
    }

    fn drain(&mut self) -> Vec<StoreChange> {
        std::mem::take(&mut self.pending)
    }
}

/// Collections a cursor can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Messages and everything hanging off them.
    Messages,
    /// Members.
    Members,
}

/// A cursor scope: one collection of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Channel.
    pub channel_id: ChannelId,
    /// Collection.
    pub kind: ScopeKind,
}

/// The in-memory entity cache.
#[derive(Debug, Default)]
pub struct LocalStore {
    me: Option<UserId>,
    channels: HashMap<ChannelId, Channel>,
    messages: HashMap<MessageKey, Message>,
    timelines: HashMap<ChannelId, BTreeSet<(u64, MessageKey)>>,
    aliases: HashMap<TempId, MessageId>,
    users: HashMap<UserId, User>,
    members: HashMap<ChannelId, BTreeMap<UserId, Member>>,
    reactions: HashMap<MessageId, BTreeMap<(String, UserId), Reaction>>,
    markers: HashMap<MessageId, BTreeMap<(String, UserId), Marker>>,
    generations: HashMap<Scope, u64>,
    log: MutationLog,
}

impl LocalStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh store for sharing.
    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Set the signed-in user. Decides which messages are incoming.
    pub fn set_current_user(&mut self, user_id: UserId) {
        self.me = Some(user_id);
    }

    /// The signed-in user.
    pub fn current_user(&self) -> Option<&UserId> {
        self.me.as_ref()
    }

    fn is_me(&self, user_id: &UserId) -> bool {
        self.me.as_ref() == Some(user_id)
    }

    /// Take every change logged since the last drain, in mutation order.
    pub fn drain_changes(&mut self) -> Vec<StoreChange> {
        self.log.drain()
    }

    /// The mutation log.
    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    // =======================================================================
    // Scope generations
    // =======================================================================

    /// Generation of a cursor scope. Bumped by mutations that invalidate
    /// open cursors over it.
    pub fn generation(&self, scope: &Scope) -> u64 {
        self.generations.get(scope).copied().unwrap_or(0)
    }

    fn bump(&mut self, channel_id: &ChannelId, kind: ScopeKind) {
        let scope = Scope {
            channel_id: channel_id.clone(),
            kind,
        };
        *self.generations.entry(scope).or_insert(0) += 1;
    }

    // =======================================================================
    // Channels
    // =======================================================================

    /// Look up a channel.
    pub fn channel(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.channels.get(channel_id)
    }

    /// Every stored channel, in no particular order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Insert or merge a fully resolved channel. Returns true if it was new.
    pub fn upsert_channel(&mut self, incoming: Channel) -> bool {
        let channel_id = incoming.id.clone();
        let created = match self.channels.get_mut(&channel_id) {
            Some(existing) => {
                merge_channel(existing, incoming);
                false
            }
            None => {
                let mut channel = incoming;
                channel.counts = UnreadCounts::default();
                self.channels.insert(channel_id.clone(), channel);
                true
            }
        };
        self.log.record(Change::ChannelUpserted {
            channel_id,
            created,
        });
        created
    }

    /// Mutate a stored channel in place.
    pub fn update_channel<F>(&mut self, channel_id: &ChannelId, mutate: F) -> Result<(), ChatError>
    where
        F: FnOnce(&mut Channel),
    {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| ChatError::NotFound(format!("channel {}", channel_id)))?;
        mutate(channel);
        self.log.record(Change::ChannelUpserted {
            channel_id: channel_id.clone(),
            created: false,
        });
        Ok(())
    }

    /// Write derived counts back onto a channel. Not logged: counts are an
    /// output of the log, not an input to it.
    pub fn set_channel_counts(&mut self, channel_id: &ChannelId, counts: UnreadCounts) {
        if let Some(channel) = self.channels.get_mut(channel_id) {
            channel.counts = counts;
        }
    }

    /// Remove a channel with its messages, members, reactions and markers.
    ///
    /// Open cursors over the channel are invalidated. Copies already handed
    /// out to callers are unaffected.
    pub fn remove_channel(&mut self, channel_id: &ChannelId) -> Option<Channel> {
        let channel = self.channels.remove(channel_id)?;
        self.drop_messages(channel_id);
        self.members.remove(channel_id);
        self.bump(channel_id, ScopeKind::Messages);
        self.bump(channel_id, ScopeKind::Members);
        self.log.record(Change::ChannelRemoved {
            channel_id: channel_id.clone(),
        });
        Some(channel)
    }

    /// Delete every message of a channel.
    pub fn clear_history(&mut self, channel_id: &ChannelId) -> Result<(), ChatError> {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| ChatError::NotFound(format!("channel {}", channel_id)))?;
        channel.last_message = None;
        channel.marked_as_unread = false;
        self.drop_messages(channel_id);
        self.bump(channel_id, ScopeKind::Messages);
        self.log.record(Change::MessagesCleared {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    fn drop_messages(&mut self, channel_id: &ChannelId) {
        let Some(timeline) = self.timelines.remove(channel_id) else {
            return;
        };
        for (_, key) in timeline {
            if let Some(message) = self.messages.remove(&key) {
                if let Some(tid) = message.tid {
                    self.aliases.remove(&tid);
                }
            }
            if let MessageKey::Server(id) = key {
                self.reactions.remove(&id);
                self.markers.remove(&id);
            }
        }
    }

    /// Mark every message of a channel as read up to `at` (epoch millis).
    pub fn mark_channel_read(&mut self, channel_id: &ChannelId, at: u64) -> Result<(), ChatError> {
        let last = self.timelines.get(channel_id).and_then(|t| t.iter().next_back());
        let watermark = last.map(|(created, _)| *created).unwrap_or(0).max(at);
        let last_id = last.and_then(|(_, key)| key.server_id().cloned());
        self.update_channel(channel_id, |channel| {
            channel.read_watermark = channel.read_watermark.max(watermark);
            channel.marked_as_unread = false;
            if last_id.is_some() {
                channel.last_displayed_message_id = last_id;
            }
        })
    }

    /// Clear timed flags that have lapsed at `now`. Returns the affected channels.
    pub fn expire_flags(&mut self, now: u64) -> Vec<ChannelId> {
        let expired: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|c| {
                c.muted.has_expired(now) || c.hidden.has_expired(now) || c.archived.has_expired(now)
            })
            .map(|c| c.id.clone())
            .collect();
        for channel_id in &expired {
            let _ = self.update_channel(channel_id, |channel| {
                for flag in [&mut channel.muted, &mut channel.hidden, &mut channel.archived] {
                    if flag.has_expired(now) {
                        *flag = Default::default();
                    }
                }
            });
        }
        expired
    }

    // =======================================================================
    // Messages
    // =======================================================================

    /// Resolve a key to the key the message is currently stored under.
    ///
    /// A temporary key of a confirmed message resolves to its server key.
    pub fn resolve(&self, key: &MessageKey) -> Option<MessageKey> {
        if self.messages.contains_key(key) {
            return Some(key.clone());
        }
        match key {
            MessageKey::Temp(tid) => self
                .aliases
                .get(tid)
                .map(|id| MessageKey::Server(id.clone()))
                .filter(|k| self.messages.contains_key(k)),
            MessageKey::Server(_) => None,
        }
    }

    /// Look up a message by either of its keys.
    pub fn message(&self, key: &MessageKey) -> Option<&Message> {
        self.resolve(key).and_then(|k| self.messages.get(&k))
    }

    /// Look up a message by server id.
    pub fn message_by_id(&self, message_id: &MessageId) -> Option<&Message> {
        self.messages.get(&MessageKey::Server(message_id.clone()))
    }

    /// Messages of a channel, oldest first.
    pub fn timeline(&self, channel_id: &ChannelId) -> Vec<&Message> {
        self.timelines
            .get(channel_id)
            .map(|t| t.iter().filter_map(|(_, key)| self.messages.get(key)).collect())
            .unwrap_or_default()
    }

    /// Number of stored messages across all channels.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Insert a locally created message awaiting acknowledgement.
    pub fn insert_pending(&mut self, message: Message) -> Result<MessageKey, ChatError> {
        let MessageKey::Temp(tid) = message.key.clone() else {
            return Err(ChatError::InvalidTransition(
                "pending message must have a temporary key".into(),
            ));
        };
        if self.message(&MessageKey::Temp(tid)).is_some() {
            return Err(ChatError::InvalidTransition(format!(
                "message {} already stored",
                tid
            )));
        }
        Ok(self.insert_new(message))
    }

    /// Store a message delivered by the server.
    ///
    /// Recognises the echo of an optimistic send by its temporary id and
    /// confirms it in place instead of inserting a second entity.
    pub fn upsert_message(&mut self, mut incoming: Message) -> Result<MessageKey, ChatError> {
        if incoming.key.is_temp() {
            return Err(ChatError::Malformed("server message without server id".into()));
        }
        if let Some(me) = &self.me {
            incoming.incoming = &incoming.sender != me;
        }

        if let Some(tid) = incoming.tid {
            if self.messages.contains_key(&MessageKey::Temp(tid)) {
                return self.confirm_message(tid, incoming);
            }
        }

        let key = incoming.key.clone();
        match self.messages.get_mut(&key) {
            Some(existing) => {
                merge_message(existing, incoming);
                let channel_id = existing.channel_id.clone();
                self.log.record(Change::MessageUpdated {
                    channel_id,
                    key: key.clone(),
                });
                Ok(key)
            }
            None => Ok(self.insert_new(incoming)),
        }
    }

    /// Rewrite a pending message in place with its server record.
    ///
    /// After this the message is addressed by its server id, and the
    /// temporary id resolves to it permanently.
    pub fn confirm_message(
        &mut self,
        tid: TempId,
        mut server: Message,
    ) -> Result<MessageKey, ChatError> {
        let new_key = server.key.clone();
        let MessageKey::Server(server_id) = new_key.clone() else {
            return Err(ChatError::Malformed("confirmation without server id".into()));
        };

        let temp_key = MessageKey::Temp(tid);
        let Some(pending) = self.messages.remove(&temp_key) else {
            // Already confirmed through the echo; just merge.
            if self.aliases.get(&tid) == Some(&server_id) {
                server.tid = Some(tid);
                return self.upsert_message(server);
            }
            return Err(ChatError::NotFound(format!("pending message {}", tid)));
        };
        if let Some(timeline) = self.timelines.get_mut(&pending.channel_id) {
            timeline.remove(&(pending.created_at, temp_key));
        }

        server.tid = Some(tid);
        server.incoming = false;
        server.delivery_status = DeliveryStatus::Sent.merge(server.delivery_status);
        if server.created_at == 0 {
            server.created_at = pending.created_at;
        }
        if server.attachments.is_empty() {
            server.attachments = pending.attachments;
        }

        let channel_id = server.channel_id.clone();
        match self.messages.get_mut(&new_key) {
            // The echo raced ahead without carrying the temporary id.
            Some(existing) => {
                merge_message(existing, server);
                existing.tid = Some(tid);
                existing.incoming = false;
            }
            None => {
                self.timelines
                    .entry(channel_id.clone())
                    .or_default()
                    .insert((server.created_at, new_key.clone()));
                self.refresh_last_message(&server);
                self.messages.insert(new_key.clone(), server);
            }
        }
        self.aliases.insert(tid, server_id);
        self.log.record(Change::MessageConfirmed {
            channel_id,
            tid,
            key: new_key.clone(),
        });
        Ok(new_key)
    }

    fn insert_new(&mut self, message: Message) -> MessageKey {
        let key = message.key.clone();
        let channel_id = message.channel_id.clone();
        self.timelines
            .entry(channel_id.clone())
            .or_default()
            .insert((message.created_at, key.clone()));
        self.refresh_last_message(&message);
        self.messages.insert(key.clone(), message);
        self.log.record(Change::MessageInserted {
            channel_id,
            key: key.clone(),
        });
        key
    }

    fn refresh_last_message(&mut self, message: &Message) {
        if message.reply_in_thread {
            return;
        }
        if let Some(channel) = self.channels.get_mut(&message.channel_id) {
            let newer = channel
                .last_message
                .as_ref()
                .map_or(true, |last| last.key == message.key || last.created_at <= message.created_at);
            if newer {
                channel.last_message = Some(LastMessage::of(message));
            }
        }
    }

    /// Mutate a stored message in place.
    pub fn update_message<F>(&mut self, key: &MessageKey, mutate: F) -> Result<(), ChatError>
    where
        F: FnOnce(&mut Message),
    {
        let key = self
            .resolve(key)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", key)))?;
        let message = self
            .messages
            .get_mut(&key)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", key)))?;
        mutate(message);
        let channel_id = message.channel_id.clone();
        let snapshot = message.clone();
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            if channel.last_message.as_ref().is_some_and(|l| l.key == key) {
                channel.last_message = Some(LastMessage::of(&snapshot));
            }
        }
        self.log.record(Change::MessageUpdated { channel_id, key });
        Ok(())
    }

    /// Move a message's delivery status, refusing illegal steps.
    ///
    /// Returns whether the status changed.
    pub fn set_delivery_status(
        &mut self,
        key: &MessageKey,
        status: DeliveryStatus,
    ) -> Result<bool, ChatError> {
        let current = self
            .message(key)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", key)))?
            .delivery_status;
        if current == status {
            return Ok(false);
        }
        if !current.can_advance_to(status) {
            return Err(ChatError::InvalidTransition(format!(
                "delivery status {} -> {}",
                current, status
            )));
        }
        self.update_message(key, |m| m.delivery_status = status)?;
        Ok(true)
    }

    /// Tombstone a message. Deleted messages keep their place in the timeline.
    pub fn delete_message(&mut self, message_id: &MessageId) -> Result<(), ChatError> {
        self.update_message(&MessageKey::Server(message_id.clone()), |m| {
            m.state = MessageState::Deleted;
            m.body.clear();
            m.attachments.clear();
            m.mentioned_user_ids.clear();
        })
    }

    // =======================================================================
    // Users and members
    // =======================================================================

    /// Look up a user.
    pub fn user(&self, user_id: &UserId) -> Option<&User> {
        self.users.get(user_id)
    }

    /// Insert or merge a user. One record is shared by every reference.
    pub fn upsert_user(&mut self, user: User) {
        let user_id = user.id.clone();
        match self.users.get_mut(&user_id) {
            Some(existing) => existing.merge(user),
            None => {
                self.users.insert(user_id.clone(), user);
            }
        }
        self.log.record(Change::UserUpserted { user_id });
    }

    /// Members of a channel, by user id.
    pub fn members(&self, channel_id: &ChannelId) -> Vec<&Member> {
        self.members
            .get(channel_id)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Look up one member.
    pub fn member(&self, channel_id: &ChannelId, user_id: &UserId) -> Option<&Member> {
        self.members.get(channel_id).and_then(|m| m.get(user_id))
    }

    /// Insert or update a member and its user record.
    pub fn upsert_member(&mut self, channel_id: &ChannelId, entry: MemberEntry) {
        let member = entry.member();
        let user_id = member.user_id.clone();
        self.upsert_user(entry.user);
        let previous = self
            .members
            .entry(channel_id.clone())
            .or_default()
            .insert(user_id.clone(), member.clone());
        let added = previous.is_none();
        if added {
            if let Some(channel) = self.channels.get_mut(channel_id) {
                channel.member_count += 1;
            }
        }
        // Member cursors page by offset over the affiliation order, so a new
        // entry or a new role moves everything behind it.
        if previous.map_or(true, |p| p.role != member.role) {
            self.bump(channel_id, ScopeKind::Members);
        }
        self.log.record(Change::MemberUpserted {
            channel_id: channel_id.clone(),
            user_id,
        });
    }

    /// Change fields of an existing member.
    pub fn update_member<F>(
        &mut self,
        channel_id: &ChannelId,
        user_id: &UserId,
        mutate: F,
    ) -> Result<(), ChatError>
    where
        F: FnOnce(&mut Member),
    {
        let member = self
            .members
            .get_mut(channel_id)
            .and_then(|m| m.get_mut(user_id))
            .ok_or_else(|| ChatError::NotFound(format!("member {} of {}", user_id, channel_id)))?;
        let role = member.role.clone();
        mutate(member);
        if member.role != role {
            self.bump(channel_id, ScopeKind::Members);
        }
        self.log.record(Change::MemberUpserted {
            channel_id: channel_id.clone(),
            user_id: user_id.clone(),
        });
        Ok(())
    }

    /// Remove a member. Offsets of open member cursors shift, so they are
    /// invalidated.
    pub fn remove_member(&mut self, channel_id: &ChannelId, user_id: &UserId) -> Option<Member> {
        let member = self.members.get_mut(channel_id)?.remove(user_id)?;
        if let Some(channel) = self.channels.get_mut(channel_id) {
            channel.member_count = channel.member_count.saturating_sub(1);
        }
        self.bump(channel_id, ScopeKind::Members);
        self.log.record(Change::MemberRemoved {
            channel_id: channel_id.clone(),
            user_id: user_id.clone(),
        });
        Some(member)
    }

    // =======================================================================
    // Reactions
    // =======================================================================

    /// Reactions on a message, by (key, user).
    pub fn reactions(&self, message_id: &MessageId) -> Vec<&Reaction> {
        self.reactions
            .get(message_id)
            .map(|r| r.values().collect())
            .unwrap_or_default()
    }

    /// Add or rescore a reaction. Idempotent per (message, key, user).
    ///
    /// Returns false if nothing changed.
    pub fn add_reaction(&mut self, channel_id: &ChannelId, reaction: Reaction) -> bool {
        let mine = self.is_me(&reaction.user_id);
        let slot = (reaction.key.clone(), reaction.user_id.clone());
        let log = self.reactions.entry(reaction.message_id.clone()).or_default();
        let previous = log.get(&slot).map(|r| r.score);
        if previous == Some(reaction.score) {
            return false;
        }
        let delta = reaction.score - previous.unwrap_or(0);
        let message_id = reaction.message_id.clone();
        let key = reaction.key.clone();
        log.insert(slot, reaction);

        if let Some(message) = self.messages.get_mut(&MessageKey::Server(message_id.clone())) {
            *message.reaction_totals.entry(key.clone()).or_insert(0) += delta;
            if mine {
                message.self_reactions.insert(key);
            }
        }
        self.log.record(Change::ReactionUpserted {
            channel_id: channel_id.clone(),
            message_id,
        });
        true
    }

    /// Remove a reaction. Returns false if it was not stored.
    pub fn remove_reaction(
        &mut self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        key: &str,
        user_id: &UserId,
    ) -> bool {
        let Some(removed) = self
            .reactions
            .get_mut(message_id)
            .and_then(|log| log.remove(&(key.to_string(), user_id.clone())))
        else {
            return false;
        };
        let mine = self.is_me(user_id);
        if let Some(message) = self.messages.get_mut(&MessageKey::Server(message_id.clone())) {
            if let Some(total) = message.reaction_totals.get_mut(key) {
                *total -= removed.score;
                if *total <= 0 {
                    message.reaction_totals.remove(key);
                }
            }
            if mine {
                message.self_reactions.remove(key);
            }
        }
        self.log.record(Change::ReactionRemoved {
            channel_id: channel_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    // =======================================================================
    // Markers
    // =======================================================================

    /// Markers on a message, by (name, user).
    pub fn markers(&self, message_id: &MessageId) -> Vec<&Marker> {
        self.markers
            .get(message_id)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Record a batch of markers.
    ///
    /// Another user's `received`/`displayed` marker advances the delivery
    /// status of the current user's message. The current user's own
    /// `displayed` marker moves the channel's read watermark. Repeated
    /// markers are ignored. Returns the keys of messages whose delivery
    /// status changed.
    pub fn apply_markers(&mut self, channel_id: &ChannelId, list: &MarkerList) -> Vec<MessageKey> {
        let mut advanced = Vec::new();
        let by_me = self.is_me(&list.user_id);

        for marker in list.markers() {
            let slot = (marker.name.clone(), marker.user_id.clone());
            let message_id = marker.message_id.clone();
            let fresh = self
                .markers
                .entry(message_id.clone())
                .or_default()
                .insert(slot, marker.clone())
                .is_none();
            if !fresh {
                continue;
            }

            let key = MessageKey::Server(message_id.clone());
            let mut created_at = None;
            if let Some(message) = self.messages.get_mut(&key) {
                *message.marker_totals.entry(marker.name.clone()).or_insert(0) += 1;
                created_at = Some(message.created_at);
                if by_me {
                    message.self_markers.insert(marker.name.clone());
                } else if !message.incoming {
                    if let Some(status) = DeliveryStatus::for_marker(&marker.name) {
                        let next = message.delivery_status.merge(status);
                        if next != message.delivery_status {
                            message.delivery_status = next;
                            advanced.push(key.clone());
                        }
                    }
                }
            }

            if by_me {
                if let Some(channel) = self.channels.get_mut(channel_id) {
                    match marker.name.as_str() {
                        MARKER_RECEIVED => {
                            channel.last_received_message_id = Some(message_id.clone());
                        }
                        MARKER_DISPLAYED => {
                            channel.last_displayed_message_id = Some(message_id.clone());
                            if let Some(at) = created_at {
                                channel.read_watermark = channel.read_watermark.max(at);
                            }
                        }
                        _ => {}
                    }
                }
            }

            self.log.record(Change::MarkerAdded {
                channel_id: channel_id.clone(),
                message_id,
            });
        }
        for key in &advanced {
            self.log.record(Change::MessageUpdated {
                channel_id: channel_id.clone(),
                key: key.clone(),
            });
        }
        advanced
    }
}

fn merge_channel(existing: &mut Channel, incoming: Channel) {
    let counts = existing.counts;
    let read_watermark = existing.read_watermark.max(incoming.read_watermark);
    let last_message = match (existing.last_message.take(), incoming.last_message) {
        (Some(local), Some(remote)) if local.created_at > remote.created_at => Some(local),
        (local, remote) => remote.or(local),
    };
    let label = incoming.label.or(existing.label.take());
    let metadata = incoming.metadata.or(existing.metadata.take());
    let last_received = incoming
        .last_received_message_id
        .or(existing.last_received_message_id.take());
    let last_displayed = incoming
        .last_displayed_message_id
        .or(existing.last_displayed_message_id.take());

    *existing = Channel {
        label,
        metadata,
        last_message,
        last_received_message_id: last_received,
        last_displayed_message_id: last_displayed,
        read_watermark,
        counts,
        ..incoming
    };
}

fn merge_message(existing: &mut Message, incoming: Message) {
    let status = existing.delivery_status.merge(incoming.delivery_status);
    if existing.state == MessageState::Deleted {
        existing.delivery_status = status;
        return;
    }
    let tid = existing.tid.or(incoming.tid);
    let created_at = existing.created_at;
    let self_reactions = if incoming.self_reactions.is_empty() {
        std::mem::take(&mut existing.self_reactions)
    } else {
        incoming.self_reactions.clone()
    };
    let self_markers: BTreeSet<String> = existing
        .self_markers
        .union(&incoming.self_markers)
        .cloned()
        .collect();

    *existing = Message {
        delivery_status: status,
        tid,
        created_at,
        self_reactions,
        self_markers,
        ..incoming
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{channel, message};
    use chatsync_types::TimedFlag;

    fn pending(channel: &str, tid: TempId, at: u64) -> Message {
        Message {
            key: MessageKey::Temp(tid),
            tid: Some(tid),
            incoming: false,
            delivery_status: DeliveryStatus::Pending,
            ..message(channel, "unused", "me", at)
        }
    }

    fn store() -> LocalStore {
        let mut store = LocalStore::new();
        store.set_current_user(UserId::new("me"));
        store.upsert_channel(channel("c1"));
        store.drain_changes();
        store
    }

    // ===========================================
    // Channel Tests
    // ===========================================

    #[test]
    fn upsert_channel_preserves_missing_and_derived_fields() {
        let mut store = store();
        store
            .update_channel(&ChannelId::new("c1"), |c| {
                c.label = Some("work".into());
                c.read_watermark = 50;
                c.counts.messages = 3;
            })
            .unwrap();

        let created = store.upsert_channel(Channel {
            member_count: 7,
            ..channel("c1")
        });

        assert!(!created);
        let stored = store.channel(&ChannelId::new("c1")).unwrap();
        assert_eq!(stored.member_count, 7);
        assert_eq!(stored.label.as_deref(), Some("work"));
        assert_eq!(stored.read_watermark, 50);
        assert_eq!(stored.counts.messages, 3);
    }

    #[test]
    fn remove_channel_cascades_and_invalidates_scopes() {
        let mut store = store();
        let c1 = ChannelId::new("c1");
        store.upsert_message(message("c1", "m1", "bob", 10)).unwrap();
        store.add_reaction(
            &c1,
            Reaction {
                message_id: MessageId::new("m1"),
                key: "👍".into(),
                score: 1,
                reason: None,
                user_id: UserId::new("bob"),
                updated_at: 11,
            },
        );
        let scope = Scope {
            channel_id: c1.clone(),
            kind: ScopeKind::Messages,
        };
        let before = store.generation(&scope);

        let removed = store.remove_channel(&c1);

        assert!(removed.is_some());
        assert!(store.message_by_id(&MessageId::new("m1")).is_none());
        assert!(store.reactions(&MessageId::new("m1")).is_empty());
        assert_eq!(store.generation(&scope), before + 1);
        assert!(store
            .drain_changes()
            .iter()
            .any(|c| c.change == Change::ChannelRemoved { channel_id: c1.clone() }));
    }

    #[test]
    fn expired_flags_are_cleared() {
        let mut store = store();
        store
            .update_channel(&ChannelId::new("c1"), |c| c.muted = TimedFlag::on(Some(100)))
            .unwrap();

        assert!(store.expire_flags(99).is_empty());
        assert_eq!(store.expire_flags(100), vec![ChannelId::new("c1")]);
        assert!(!store.channel(&ChannelId::new("c1")).unwrap().muted.enabled);
    }

    // ===========================================
    // Message Tests
    // ===========================================

    #[test]
    fn echo_confirms_pending_message_in_place() {
        let mut store = store();
        let tid = TempId::new();
        store.insert_pending(pending("c1", tid, 5)).unwrap();

        let mut echo = message("c1", "m1", "me", 6);
        echo.tid = Some(tid);
        let key = store.upsert_message(echo).unwrap();

        assert_eq!(key, MessageKey::Server(MessageId::new("m1")));
        assert_eq!(store.message_count(), 1);
        let resolved = store.message(&MessageKey::Temp(tid)).unwrap();
        assert_eq!(resolved.key, key);
        assert_eq!(resolved.delivery_status, DeliveryStatus::Sent);
        assert!(!resolved.incoming);
        assert_eq!(store.timeline(&ChannelId::new("c1")).len(), 1);
    }

    #[test]
    fn ack_after_untagged_echo_does_not_duplicate() {
        let mut store = store();
        let tid = TempId::new();
        store.insert_pending(pending("c1", tid, 5)).unwrap();
        store.upsert_message(message("c1", "m1", "me", 6)).unwrap();

        let mut ack = message("c1", "m1", "me", 6);
        ack.tid = Some(tid);
        store.confirm_message(tid, ack).unwrap();

        assert_eq!(store.message_count(), 1);
        assert_eq!(store.timeline(&ChannelId::new("c1")).len(), 1);
        assert!(store.message(&MessageKey::Temp(tid)).is_some());
    }

    #[test]
    fn duplicate_pending_insert_is_rejected() {
        let mut store = store();
        let tid = TempId::new();
        store.insert_pending(pending("c1", tid, 5)).unwrap();
        assert!(store.insert_pending(pending("c1", tid, 5)).is_err());
    }

    #[test]
    fn delivery_status_never_regresses() {
        let mut store = store();
        let key = store.upsert_message(message("c1", "m1", "me", 1)).unwrap();
        assert!(store.set_delivery_status(&key, DeliveryStatus::Read).unwrap());
        assert!(store
            .set_delivery_status(&key, DeliveryStatus::Delivered)
            .is_err());

        // Server records never pull the status back either
        store.upsert_message(message("c1", "m1", "me", 1)).unwrap();
        assert_eq!(store.message(&key).unwrap().delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn deleted_message_stays_deleted() {
        let mut store = store();
        store.upsert_message(message("c1", "m1", "bob", 1)).unwrap();
        store.delete_message(&MessageId::new("m1")).unwrap();
        store.upsert_message(message("c1", "m1", "bob", 1)).unwrap();

        let stored = store.message_by_id(&MessageId::new("m1")).unwrap();
        assert!(stored.is_deleted());
        assert!(stored.body.is_empty());
    }

    #[test]
    fn last_message_tracks_newest() {
        let mut store = store();
        store.upsert_message(message("c1", "m2", "bob", 20)).unwrap();
        store.upsert_message(message("c1", "m1", "bob", 10)).unwrap();
        let last = store
            .channel(&ChannelId::new("c1"))
            .unwrap()
            .last_message
            .clone()
            .unwrap();
        assert_eq!(last.key, MessageKey::Server(MessageId::new("m2")));
    }

    #[test]
    fn mutation_log_sequences_per_kind() {
        let mut store = store();
        store.upsert_message(message("c1", "m1", "bob", 1)).unwrap();
        store.upsert_message(message("c1", "m2", "bob", 2)).unwrap();
        store.upsert_user(User::new(UserId::new("bob")));

        let changes = store.drain_changes();
        let message_seqs: Vec<u64> = changes
            .iter()
            .filter(|c| c.change.kind() == EntityKind::Message)
            .map(|c| c.seq)
            .collect();
        assert_eq!(message_seqs, vec![1, 2]);
        assert_eq!(store.log().last_seq(EntityKind::User), 1);
        assert!(store.drain_changes().is_empty());
    }

    // ===========================================
    // Reaction and Marker Tests
    // ===========================================

    #[test]
    fn reactions_are_idempotent_per_key() {
        let mut store = store();
        let c1 = ChannelId::new("c1");
        store.upsert_message(message("c1", "m1", "bob", 1)).unwrap();
        let reaction = Reaction {
            message_id: MessageId::new("m1"),
            key: "🔥".into(),
            score: 2,
            reason: None,
            user_id: UserId::new("me"),
            updated_at: 3,
        };

        assert!(store.add_reaction(&c1, reaction.clone()));
        assert!(!store.add_reaction(&c1, reaction.clone()));

        let stored = store.message_by_id(&MessageId::new("m1")).unwrap();
        assert_eq!(stored.reaction_totals.get("🔥"), Some(&2));
        assert!(stored.self_reactions.contains("🔥"));

        assert!(store.remove_reaction(&c1, &MessageId::new("m1"), "🔥", &UserId::new("me")));
        let stored = store.message_by_id(&MessageId::new("m1")).unwrap();
        assert!(stored.reaction_totals.is_empty());
        assert!(stored.self_reactions.is_empty());
    }

    #[test]
    fn peer_markers_advance_own_messages() {
        let mut store = store();
        let c1 = ChannelId::new("c1");
        let key = store.upsert_message(message("c1", "m1", "me", 1)).unwrap();

        let advanced = store.apply_markers(
            &c1,
            &MarkerList {
                message_ids: vec![MessageId::new("m1")],
                name: MARKER_RECEIVED.into(),
                user_id: UserId::new("bob"),
                created_at: 2,
            },
        );
        assert_eq!(advanced, vec![key.clone()]);
        assert_eq!(
            store.message(&key).unwrap().delivery_status,
            DeliveryStatus::Delivered
        );

        // Replaying the same marker changes nothing
        let replay = store.apply_markers(
            &c1,
            &MarkerList {
                message_ids: vec![MessageId::new("m1")],
                name: MARKER_RECEIVED.into(),
                user_id: UserId::new("bob"),
                created_at: 2,
            },
        );
        assert!(replay.is_empty());
        assert_eq!(store.message(&key).unwrap().marker_totals.get("received"), Some(&1));
    }

    #[test]
    fn own_displayed_marker_moves_watermark() {
        let mut store = store();
        let c1 = ChannelId::new("c1");
        store.upsert_message(message("c1", "m1", "bob", 40)).unwrap();
        store.apply_markers(
            &c1,
            &MarkerList {
                message_ids: vec![MessageId::new("m1")],
                name: MARKER_DISPLAYED.into(),
                user_id: UserId::new("me"),
                created_at: 41,
            },
        );
        let stored = store.channel(&c1).unwrap();
        assert_eq!(stored.read_watermark, 40);
        assert_eq!(stored.last_displayed_message_id, Some(MessageId::new("m1")));
    }

    // ===========================================
    // Member Tests
    // ===========================================

    #[test]
    fn members_share_user_records() {
        let mut store = store();
        let c1 = ChannelId::new("c1");
        let mut bob = User::new(UserId::new("bob"));
        bob.first_name = Some("Bob".into());
        store.upsert_member(
            &c1,
            MemberEntry {
                user: bob,
                role: "admin".into(),
                blocked: false,
            },
        );
        let mut update = User::new(UserId::new("bob"));
        update.last_name = Some("Builder".into());
        store.upsert_user(update);

        let user = store.user(&UserId::new("bob")).unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Bob"));
        assert_eq!(user.last_name.as_deref(), Some("Builder"));
        assert_eq!(store.channel(&c1).unwrap().member_count, 1);

        store.remove_member(&c1, &UserId::new("bob"));
        assert!(store.members(&c1).is_empty());
        assert_eq!(store.channel(&c1).unwrap().member_count, 0);
    }
}
