//! Entity records held by the local store.
//!
//! Records reference each other by id only. A message names its sender and
//! its thread parent by id; the store resolves them on demand.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{ChannelId, ChatError, MessageId, MessageKey, TempId, UserId};

/// Marker name acknowledging that a message reached the recipient's device.
pub const MARKER_RECEIVED: &str = "received";

/// Marker name acknowledging that a message was displayed to the recipient.
pub const MARKER_DISPLAYED: &str = "displayed";

/// The three channel flavours of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// One-to-one conversation.
    Direct,
    /// Invite-only group.
    Private,
    /// Group joinable by uri.
    Public,
}

/// Kind-specific channel fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelDetails {
    /// Direct channel with a single peer.
    Direct {
        /// The other participant.
        peer: UserId,
    },
    /// Private group channel.
    Private {
        /// Display subject.
        subject: String,
        /// Avatar image url.
        #[serde(default)]
        avatar_url: Option<String>,
        /// Role of the current user in this channel.
        #[serde(default)]
        my_role: Option<String>,
    },
    /// Public group channel.
    Public {
        /// Unique uri used to find and join the channel.
        uri: String,
        /// Display subject.
        subject: String,
        /// Avatar image url.
        #[serde(default)]
        avatar_url: Option<String>,
        /// Role of the current user in this channel.
        #[serde(default)]
        my_role: Option<String>,
    },
}

impl ChannelDetails {
    /// The channel kind these details belong to.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Direct { .. } => ChannelKind::Direct,
            Self::Private { .. } => ChannelKind::Private,
            Self::Public { .. } => ChannelKind::Public,
        }
    }

    /// Subject of a group channel.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Direct { .. } => None,
            Self::Private { subject, .. } | Self::Public { subject, .. } => Some(subject),
        }
    }

    /// Uri of a public channel.
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Public { uri, .. } => Some(uri),
            _ => None,
        }
    }

    /// Peer of a direct channel.
    pub fn peer(&self) -> Option<&UserId> {
        match self {
            Self::Direct { peer } => Some(peer),
            _ => None,
        }
    }
}

/// A boolean channel flag that may lapse at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedFlag {
    /// Whether the flag is set.
    pub enabled: bool,
    /// Epoch millis after which the flag no longer applies (`None` = never).
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl TimedFlag {
    /// A set flag, optionally expiring.
    pub fn on(expires_at: Option<u64>) -> Self {
        Self {
            enabled: true,
            expires_at,
        }
    }

    /// A cleared flag.
    pub fn off() -> Self {
        Self::default()
    }

    /// True if the flag is set and has lapsed at `now`.
    pub fn has_expired(&self, now: u64) -> bool {
        self.enabled && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Denormalized snapshot of the latest message in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Key of the referenced message (weak reference).
    pub key: MessageKey,
    /// Sender of the message.
    pub sender: UserId,
    /// Body at the time the snapshot was taken.
    pub body: String,
    /// Message type.
    pub kind: String,
    /// Creation time, epoch millis.
    pub created_at: u64,
}

impl LastMessage {
    /// Snapshot a message.
    pub fn of(message: &Message) -> Self {
        Self {
            key: message.key.clone(),
            sender: message.sender.clone(),
            body: message.body.clone(),
            kind: message.kind.clone(),
            created_at: message.created_at,
        }
    }
}

/// Unread aggregates for a single channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    /// Unread incoming messages.
    pub messages: u64,
    /// Unread messages that mention the current user.
    pub mentions: u64,
    /// Unseen reactions by others on the current user's messages.
    pub reactions: u64,
}

impl UnreadCounts {
    /// Component-wise sum.
    pub fn add(&mut self, other: UnreadCounts) {
        self.messages += other.messages;
        self.mentions += other.mentions;
        self.reactions += other.reactions;
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        self.messages == 0 && self.mentions == 0 && self.reactions == 0
    }
}

/// Unread aggregates across all channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadTotals {
    /// Sum of unread messages over all channels.
    pub unread_messages: u64,
    /// Sum of unread mentions over all channels.
    pub unread_mentions: u64,
    /// Sum of unread reactions over all channels.
    pub unread_reactions: u64,
    /// Channels with unread messages or marked as unread.
    pub unread_channels: u64,
}

/// A channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id.
    pub id: ChannelId,
    /// Kind-specific fields.
    pub details: ChannelDetails,
    /// Free-form label.
    #[serde(default)]
    pub label: Option<String>,
    /// Application metadata.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Creation time, epoch millis.
    #[serde(default)]
    pub created_at: u64,
    /// Last update time, epoch millis.
    #[serde(default)]
    pub updated_at: u64,
    /// Number of members.
    #[serde(default)]
    pub member_count: u64,
    /// Notifications muted.
    #[serde(default)]
    pub muted: TimedFlag,
    /// Hidden from the channel list.
    #[serde(default)]
    pub hidden: TimedFlag,
    /// Archived.
    #[serde(default)]
    pub archived: TimedFlag,
    /// Group channel blocked by the current user.
    #[serde(default)]
    pub blocked: bool,
    /// Explicitly marked as unread by the current user.
    #[serde(default)]
    pub marked_as_unread: bool,
    /// Snapshot of the latest message.
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Latest message acknowledged with a `received` marker by the current user.
    #[serde(default)]
    pub last_received_message_id: Option<MessageId>,
    /// Latest message acknowledged with a `displayed` marker by the current user.
    #[serde(default)]
    pub last_displayed_message_id: Option<MessageId>,
    /// Messages created at or before this time count as read.
    #[serde(default)]
    pub read_watermark: u64,
    /// Derived unread counts, maintained locally.
    #[serde(default)]
    pub counts: UnreadCounts,
}

impl Channel {
    /// The channel kind.
    pub fn kind(&self) -> ChannelKind {
        self.details.kind()
    }

    /// True for private and public channels.
    pub fn is_group(&self) -> bool {
        !matches!(self.kind(), ChannelKind::Direct)
    }

    /// Muted at `now`. A mute whose expiry has passed no longer counts.
    pub fn is_muted(&self, now: u64) -> bool {
        self.muted.enabled && !self.muted.has_expired(now)
    }
}

/// Delivery progress of a message.
///
/// The canonical names are capitalized. The lowercase spelling used by some
/// service generations is accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Created locally, not acknowledged.
    #[serde(alias = "pending")]
    Pending,
    /// Accepted by the server.
    #[serde(alias = "sent")]
    Sent,
    /// Received by at least one recipient.
    #[serde(alias = "delivered", alias = "received")]
    Delivered,
    /// Displayed to at least one recipient.
    #[serde(alias = "read", alias = "displayed")]
    Read,
    /// Submission failed.
    #[serde(alias = "failed")]
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending | Self::Failed => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal step.
    ///
    /// Status only moves forward along `Pending → Sent → Delivered → Read`.
    /// `Failed` is entered from `Pending` or `Sent`, and left only for
    /// `Pending` when the message is resent.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (Self::Failed, Self::Pending) => true,
            (Self::Failed, _) => false,
            (Self::Pending | Self::Sent, Self::Failed) => true,
            (_, Self::Failed) => false,
            (_, next) => next.rank() > self.rank(),
        }
    }

    /// The furthest of two statuses, ignoring illegal steps.
    pub fn merge(self, other: DeliveryStatus) -> DeliveryStatus {
        if self.can_advance_to(other) && other != Self::Pending {
            other
        } else {
            self
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Sent => "Sent",
            Self::Delivered => "Delivered",
            Self::Read => "Read",
            Self::Failed => "Failed",
        }
    }

    /// Status reached by an own message once another user sets `marker` on it.
    pub fn for_marker(marker: &str) -> Option<DeliveryStatus> {
        match marker {
            MARKER_RECEIVED => Some(Self::Delivered),
            MARKER_DISPLAYED => Some(Self::Read),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" | "received" => Ok(Self::Delivered),
            "read" | "displayed" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(ChatError::Malformed(format!("unknown delivery status: {other}"))),
        }
    }
}

/// Edit state of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Never edited.
    #[default]
    #[serde(alias = "None", alias = "none")]
    Unmodified,
    /// Body or metadata changed after sending.
    #[serde(alias = "edited")]
    Edited,
    /// Deleted; the record stays as a tombstone.
    #[serde(alias = "deleted")]
    Deleted,
}

/// A file attached to a message. Owned by the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Server id, absent until the message is confirmed.
    #[serde(default)]
    pub id: Option<String>,
    /// Download url.
    pub url: String,
    /// Attachment type, e.g. `image` or `file`.
    #[serde(rename = "type")]
    pub kind: String,
    /// File name.
    #[serde(default)]
    pub name: Option<String>,
    /// Application metadata.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Creation time, epoch millis.
    #[serde(default)]
    pub created_at: u64,
    /// Uploading user.
    #[serde(default)]
    pub uploader: Option<UserId>,
    /// Channel the owning message belongs to.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Owning message.
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

/// Where a forwarded message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingDetails {
    /// Origin channel.
    pub channel_id: ChannelId,
    /// Origin message.
    pub message_id: MessageId,
    /// Original author.
    pub user_id: UserId,
    /// Number of times the message has been forwarded.
    #[serde(default)]
    pub hops: u32,
}

/// A message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Addressable key: temporary until confirmed, server id afterwards.
    pub key: MessageKey,
    /// Temporary id the message was created with, if sent from this client.
    #[serde(default)]
    pub tid: Option<TempId>,
    /// Owning channel.
    pub channel_id: ChannelId,
    /// Author.
    pub sender: UserId,
    /// Text body.
    #[serde(default)]
    pub body: String,
    /// Message type, `text` by default.
    #[serde(rename = "type", default = "default_message_kind")]
    pub kind: String,
    /// Application metadata.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Creation time, epoch millis.
    #[serde(default)]
    pub created_at: u64,
    /// Last update time, epoch millis.
    #[serde(default)]
    pub updated_at: u64,
    /// True if authored by another user.
    #[serde(default)]
    pub incoming: bool,
    /// Delivery progress (meaningful for outgoing messages).
    #[serde(default = "default_delivery_status")]
    pub delivery_status: DeliveryStatus,
    /// Edit state.
    #[serde(default)]
    pub state: MessageState,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Score totals per reaction key.
    #[serde(default)]
    pub reaction_totals: BTreeMap<String, i64>,
    /// Reaction keys set by the current user.
    #[serde(default)]
    pub self_reactions: BTreeSet<String>,
    /// Number of users per marker name.
    #[serde(default)]
    pub marker_totals: BTreeMap<String, u64>,
    /// Marker names set by the current user.
    #[serde(default)]
    pub self_markers: BTreeSet<String>,
    /// Users mentioned in the body.
    #[serde(default)]
    pub mentioned_user_ids: Vec<UserId>,
    /// Parent message for replies and threads.
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    /// Reply lives in the parent's thread rather than the main timeline.
    #[serde(default)]
    pub reply_in_thread: bool,
    /// Number of thread replies.
    #[serde(default)]
    pub reply_count: u64,
    /// Delivered to listeners only, never stored.
    #[serde(default)]
    pub transient: bool,
    /// Does not trigger notifications or unread counts.
    #[serde(default)]
    pub silent: bool,
    /// Forwarding origin.
    #[serde(default)]
    pub forwarding: Option<ForwardingDetails>,
}

fn default_message_kind() -> String {
    "text".to_string()
}

fn default_delivery_status() -> DeliveryStatus {
    DeliveryStatus::Sent
}

impl Message {
    /// Server id, once confirmed.
    pub fn server_id(&self) -> Option<&MessageId> {
        self.key.server_id()
    }

    /// True if the message still awaits server acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.key.is_temp()
    }

    /// True if the message was deleted.
    pub fn is_deleted(&self) -> bool {
        self.state == MessageState::Deleted
    }

    /// True if `user` is mentioned.
    pub fn mentions(&self, user: &UserId) -> bool {
        self.mentioned_user_ids.iter().any(|u| u == user)
    }
}

/// Presence state vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceState {
    /// Not connected.
    #[default]
    Offline,
    /// Connected and visible.
    Online,
    /// Connected but shown as offline.
    Invisible,
    /// Idle.
    Away,
    /// Do not disturb.
    #[serde(rename = "DND")]
    Dnd,
}

/// Presence of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Presence state.
    pub state: PresenceState,
    /// Free-form status line.
    #[serde(default)]
    pub status: Option<String>,
    /// Last activity, epoch millis.
    #[serde(default)]
    pub last_active_at: u64,
}

/// Account lifecycle tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    /// Normal account.
    #[default]
    Active,
    /// Deactivated account.
    Inactive,
    /// Deleted account.
    Deleted,
}

/// A user record, shared by every message and member referencing its id.
///
/// Optional fields left `None` in an update keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Login name.
    #[serde(default)]
    pub username: Option<String>,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Avatar image url.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Application metadata.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Blocked by the current user.
    #[serde(default)]
    pub blocked: bool,
    /// Presence, if known.
    #[serde(default)]
    pub presence: Option<Presence>,
    /// Account lifecycle.
    #[serde(default)]
    pub activity: ActivityState,
}

impl User {
    /// A user known only by id.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            last_name: None,
            avatar_url: None,
            metadata: None,
            blocked: false,
            presence: None,
            activity: ActivityState::Active,
        }
    }

    /// Merge a (possibly partial) update into this record.
    pub fn merge(&mut self, update: User) {
        fn keep<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        keep(&mut self.username, update.username);
        keep(&mut self.first_name, update.first_name);
        keep(&mut self.last_name, update.last_name);
        keep(&mut self.avatar_url, update.avatar_url);
        keep(&mut self.metadata, update.metadata);
        keep(&mut self.presence, update.presence);
        self.blocked = update.blocked;
        self.activity = update.activity;
    }
}

/// Channel-scoped projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The underlying user.
    pub user_id: UserId,
    /// Role within the channel.
    pub role: String,
    /// Blocked from the channel.
    #[serde(default)]
    pub blocked: bool,
}

impl Member {
    /// A member with the given role.
    pub fn new(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
            blocked: false,
        }
    }

    /// Owners and admins.
    pub fn is_privileged(&self) -> bool {
        matches!(self.role.as_str(), "owner" | "admin")
    }
}

/// A member together with its user profile, as delivered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    /// The user profile.
    pub user: User,
    /// Role within the channel.
    pub role: String,
    /// Blocked from the channel.
    #[serde(default)]
    pub blocked: bool,
}

impl MemberEntry {
    /// The member projection of this entry.
    pub fn member(&self) -> Member {
        Member {
            user_id: self.user.id.clone(),
            role: self.role.clone(),
            blocked: self.blocked,
        }
    }
}

/// A reaction of one user on one message, keyed by `(message, key, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Target message.
    pub message_id: MessageId,
    /// Reaction key, usually an emoji.
    pub key: String,
    /// Weight contributed to the key's total.
    #[serde(default = "default_score")]
    pub score: i64,
    /// Free-form reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Reacting user.
    pub user_id: UserId,
    /// Time of the reaction, epoch millis.
    #[serde(default)]
    pub updated_at: u64,
}

fn default_score() -> i64 {
    1
}

/// A marker of one user on one message, keyed by `(message, name, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// Target message.
    pub message_id: MessageId,
    /// Marker name, e.g. `received` or `displayed`.
    pub name: String,
    /// Marking user.
    pub user_id: UserId,
    /// Time of the marker, epoch millis.
    #[serde(default)]
    pub created_at: u64,
}

/// A batch of markers with the same name from one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerList {
    /// Marked messages.
    pub message_ids: Vec<MessageId>,
    /// Marker name.
    pub name: String,
    /// Marking user.
    pub user_id: UserId,
    /// Time of the markers, epoch millis.
    #[serde(default)]
    pub created_at: u64,
}

impl MarkerList {
    /// Expand into one marker per message.
    pub fn markers(&self) -> impl Iterator<Item = Marker> + '_ {
        self.message_ids.iter().map(move |message_id| Marker {
            message_id: message_id.clone(),
            name: self.name.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // Delivery Status Tests
    // ===========================================

    #[test]
    fn delivery_status_only_moves_forward() {
        use DeliveryStatus::*;
        assert!(Pending.can_advance_to(Sent));
        assert!(Sent.can_advance_to(Delivered));
        assert!(Delivered.can_advance_to(Read));
        assert!(Sent.can_advance_to(Read));

        assert!(!Read.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Sent.can_advance_to(Pending));
    }

    #[test]
    fn failed_only_from_pending_or_sent() {
        use DeliveryStatus::*;
        assert!(Pending.can_advance_to(Failed));
        assert!(Sent.can_advance_to(Failed));
        assert!(!Delivered.can_advance_to(Failed));
        assert!(!Read.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Pending));
        assert!(!Failed.can_advance_to(Sent));
    }

    #[test]
    fn merge_keeps_furthest_status() {
        use DeliveryStatus::*;
        assert_eq!(Delivered.merge(Sent), Delivered);
        assert_eq!(Sent.merge(Read), Read);
        assert_eq!(Pending.merge(Sent), Sent);
        assert_eq!(Read.merge(Failed), Read);
    }

    #[test]
    fn delivery_status_accepts_both_vocabularies() {
        let upper: DeliveryStatus = serde_json::from_str("\"Delivered\"").unwrap();
        let lower: DeliveryStatus = serde_json::from_str("\"delivered\"").unwrap();
        assert_eq!(upper, lower);
        assert_eq!("READ".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Read);
        assert!("bogus".parse::<DeliveryStatus>().is_err());
        assert_eq!(serde_json::to_string(&DeliveryStatus::Read).unwrap(), "\"Read\"");
    }

    // ===========================================
    // Entity Helper Tests
    // ===========================================

    #[test]
    fn user_merge_preserves_absent_fields() {
        let mut user = User::new(UserId::new("u1"));
        user.first_name = Some("Ada".into());
        user.avatar_url = Some("a.png".into());

        let mut update = User::new(UserId::new("u1"));
        update.last_name = Some("Lovelace".into());
        update.presence = Some(Presence {
            state: PresenceState::Online,
            status: None,
            last_active_at: 10,
        });
        user.merge(update);

        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(user.avatar_url.as_deref(), Some("a.png"));
        assert_eq!(user.presence.unwrap().state, PresenceState::Online);
    }

    #[test]
    fn timed_flag_expiry() {
        let flag = TimedFlag::on(Some(100));
        assert!(!flag.has_expired(99));
        assert!(flag.has_expired(100));
        assert!(!TimedFlag::on(None).has_expired(u64::MAX));
        assert!(!TimedFlag::off().has_expired(0));
    }

    #[test]
    fn channel_details_accessors() {
        let public = ChannelDetails::Public {
            uri: "rust".into(),
            subject: "Rust".into(),
            avatar_url: None,
            my_role: None,
        };
        assert_eq!(public.kind(), ChannelKind::Public);
        assert_eq!(public.uri(), Some("rust"));
        assert_eq!(public.subject(), Some("Rust"));

        let direct = ChannelDetails::Direct {
            peer: UserId::new("bob"),
        };
        assert_eq!(direct.kind(), ChannelKind::Direct);
        assert_eq!(direct.subject(), None);
        assert_eq!(direct.peer(), Some(&UserId::new("bob")));
    }

    #[test]
    fn message_decodes_with_defaults() {
        let json = serde_json::json!({
            "key": { "kind": "server", "id": "m1" },
            "channel_id": "c1",
            "sender": "alice",
            "body": "hi",
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.kind, "text");
        assert_eq!(message.delivery_status, DeliveryStatus::Sent);
        assert_eq!(message.state, MessageState::Unmodified);
        assert_eq!(message.server_id(), Some(&MessageId::new("m1")));
    }

    #[test]
    fn marker_list_expands_per_message() {
        let list = MarkerList {
            message_ids: vec![MessageId::new("m1"), MessageId::new("m2")],
            name: MARKER_RECEIVED.into(),
            user_id: UserId::new("bob"),
            created_at: 5,
        };
        let markers: Vec<Marker> = list.markers().collect();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[1].message_id, MessageId::new("m2"));
        assert_eq!(DeliveryStatus::for_marker(&markers[0].name), Some(DeliveryStatus::Delivered));
    }
}
