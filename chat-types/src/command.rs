//! Outbound commands and the responses the service returns for them.

use serde::{Deserialize, Serialize};

use crate::{
    Attachment, Channel, ChannelDetails, ChannelId, Frame, MemberEntry, Message, MessageId,
    Page, PageRequest, PresenceState, Reaction, TempId, User, UserId,
};

/// Content of a message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    /// Text body.
    pub body: String,
    /// Message type.
    pub kind: String,
    /// Application metadata.
    pub metadata: Option<String>,
    /// Attachments, already uploaded.
    pub attachments: Vec<Attachment>,
    /// Users mentioned in the body.
    pub mentioned_user_ids: Vec<UserId>,
    /// Message replied to.
    pub parent_id: Option<MessageId>,
    /// Post the reply into the parent's thread.
    pub reply_in_thread: bool,
    /// Message being forwarded.
    pub forwarding_message_id: Option<MessageId>,
    /// Deliver to online members only, never persist.
    pub transient: bool,
    /// Suppress notifications and unread counting.
    pub silent: bool,
}

impl Default for MessageDraft {
    fn default() -> Self {
        Self {
            body: String::new(),
            kind: "text".to_string(),
            metadata: None,
            attachments: Vec::new(),
            mentioned_user_ids: Vec::new(),
            parent_id: None,
            reply_in_thread: false,
            forwarding_message_id: None,
            transient: false,
            silent: false,
        }
    }
}

impl MessageDraft {
    /// A plain text draft.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Changes to an existing message. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdit {
    /// New body.
    pub body: Option<String>,
    /// New metadata.
    pub metadata: Option<String>,
    /// New mention list.
    pub mentioned_user_ids: Option<Vec<UserId>>,
    /// New attachment list.
    pub attachments: Option<Vec<Attachment>>,
}

/// A user to add to a channel, with a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberParams {
    /// User.
    pub user_id: UserId,
    /// Role to assign.
    pub role: String,
}

impl MemberParams {
    /// Member params with the given role.
    pub fn new(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}

/// A channel to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDraft {
    /// Kind and kind-specific fields.
    pub details: ChannelDetails,
    /// Label.
    pub label: Option<String>,
    /// Application metadata.
    pub metadata: Option<String>,
    /// Initial members of a group channel.
    pub members: Vec<MemberParams>,
}

impl ChannelDraft {
    /// A direct channel with `peer`.
    pub fn direct(peer: UserId) -> Self {
        Self {
            details: ChannelDetails::Direct { peer },
            label: None,
            metadata: None,
            members: Vec::new(),
        }
    }

    /// A private group channel.
    pub fn private(subject: impl Into<String>, members: Vec<MemberParams>) -> Self {
        Self {
            details: ChannelDetails::Private {
                subject: subject.into(),
                avatar_url: None,
                my_role: None,
            },
            label: None,
            metadata: None,
            members,
        }
    }

    /// A public group channel reachable by `uri`.
    pub fn public(
        uri: impl Into<String>,
        subject: impl Into<String>,
        members: Vec<MemberParams>,
    ) -> Self {
        Self {
            details: ChannelDetails::Public {
                uri: uri.into(),
                subject: subject.into(),
                avatar_url: None,
                my_role: None,
            },
            label: None,
            metadata: None,
            members,
        }
    }
}

/// Changes to channel fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    /// Group subject.
    pub subject: Option<String>,
    /// Public uri.
    pub uri: Option<String>,
    /// Avatar url.
    pub avatar_url: Option<String>,
    /// Label.
    pub label: Option<String>,
    /// Metadata.
    pub metadata: Option<String>,
}

/// Per-channel operations of the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChannelAction {
    /// Delete the channel for everyone.
    Delete,
    /// Leave a group channel.
    Leave,
    /// Join a public channel.
    Join,
    /// Hide from the channel list.
    Hide,
    /// Show again.
    Unhide,
    /// Mute notifications, optionally until a time (epoch millis).
    Mute {
        /// When the mute lapses.
        until: Option<u64>,
    },
    /// Unmute.
    Unmute,
    /// Block a group channel.
    Block,
    /// Unblock.
    Unblock,
    /// Mark every message as displayed.
    MarkAsRead,
    /// Flag the channel as unread.
    MarkAsUnread,
    /// Delete all messages.
    ClearHistory,
}

/// Membership operations on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum MemberAction {
    /// Add members.
    Add(Vec<MemberParams>),
    /// Remove members.
    Kick(Vec<UserId>),
    /// Block members.
    Block(Vec<UserId>),
    /// Unblock members.
    Unblock(Vec<UserId>),
    /// Change member roles.
    ChangeRole(Vec<MemberParams>),
    /// Hand ownership to another member.
    ChangeOwner(UserId),
}

/// Profile fields the current user may change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Avatar url.
    pub avatar_url: Option<String>,
    /// Metadata.
    pub metadata: Option<String>,
}

/// What a report is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum ReportTarget {
    /// A channel.
    Channel {
        /// Reported channel.
        channel_id: ChannelId,
    },
    /// Messages in a channel.
    Messages {
        /// Channel.
        channel_id: ChannelId,
        /// Reported messages.
        message_ids: Vec<MessageId>,
    },
    /// A user.
    User {
        /// Reported user.
        user_id: UserId,
    },
}

/// Requests sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Create a channel.
    CreateChannel {
        /// What to create.
        draft: ChannelDraft,
    },
    /// Fetch a channel.
    GetChannel {
        /// Channel.
        channel_id: ChannelId,
    },
    /// Change channel fields.
    UpdateChannel {
        /// Channel.
        channel_id: ChannelId,
        /// Changes.
        update: ChannelUpdate,
    },
    /// A per-channel operation.
    Channel {
        /// Channel.
        channel_id: ChannelId,
        /// Operation.
        action: ChannelAction,
    },
    /// A membership operation.
    Members {
        /// Channel.
        channel_id: ChannelId,
        /// Operation.
        action: MemberAction,
    },
    /// Submit a message.
    SendMessage {
        /// Channel.
        channel_id: ChannelId,
        /// Temporary id, echoed back on the stored message.
        tid: TempId,
        /// Content.
        draft: MessageDraft,
    },
    /// Edit a confirmed message.
    EditMessage {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
        /// Changes.
        edit: MessageEdit,
    },
    /// Delete a confirmed message.
    DeleteMessage {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
    },
    /// React to a message.
    AddReaction {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
        /// Reaction key.
        key: String,
        /// Score.
        score: i64,
        /// Reason.
        reason: Option<String>,
        /// Replace the user's other reactions on the message.
        enforce_unique: bool,
    },
    /// Remove a reaction.
    DeleteReaction {
        /// Channel.
        channel_id: ChannelId,
        /// Message.
        message_id: MessageId,
        /// Reaction key.
        key: String,
    },
    /// Set a marker on messages.
    MarkMessages {
        /// Channel.
        channel_id: ChannelId,
        /// Messages.
        message_ids: Vec<MessageId>,
        /// Marker name.
        marker: String,
    },
    /// Typing indicator.
    Typing {
        /// Channel.
        channel_id: ChannelId,
        /// Started or stopped.
        started: bool,
    },
    /// Fetch a page of a list.
    FetchPage {
        /// The page to fetch.
        request: PageRequest,
    },
    /// Ask for every event missed since a time (epoch millis).
    Resync {
        /// Last time the client was known to be in sync.
        since: u64,
    },
    /// Fetch user profiles.
    GetUsers {
        /// Users.
        user_ids: Vec<UserId>,
    },
    /// Block users.
    BlockUsers {
        /// Users.
        user_ids: Vec<UserId>,
    },
    /// Unblock users.
    UnblockUsers {
        /// Users.
        user_ids: Vec<UserId>,
    },
    /// Publish the current user's presence.
    SetPresence {
        /// State.
        state: PresenceState,
        /// Status line.
        status: Option<String>,
    },
    /// Change the current user's profile.
    SetProfile {
        /// Changes.
        profile: UserProfile,
    },
    /// Report content to the service.
    Report {
        /// What is reported.
        target: ReportTarget,
        /// Reason code.
        reason: String,
        /// Free-form description.
        description: Option<String>,
    },
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateChannel { .. } => "create_channel",
            Self::GetChannel { .. } => "get_channel",
            Self::UpdateChannel { .. } => "update_channel",
            Self::Channel { .. } => "channel",
            Self::Members { .. } => "members",
            Self::SendMessage { .. } => "send_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::DeleteReaction { .. } => "delete_reaction",
            Self::MarkMessages { .. } => "mark_messages",
            Self::Typing { .. } => "typing",
            Self::FetchPage { .. } => "fetch_page",
            Self::Resync { .. } => "resync",
            Self::GetUsers { .. } => "get_users",
            Self::BlockUsers { .. } => "block_users",
            Self::UnblockUsers { .. } => "unblock_users",
            Self::SetPresence { .. } => "set_presence",
            Self::SetProfile { .. } => "set_profile",
            Self::Report { .. } => "report",
        }
    }
}

/// Service answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    /// Accepted, nothing to return.
    Ack,
    /// A channel record.
    Channel {
        /// The channel.
        channel: Channel,
    },
    /// Member records.
    Members {
        /// The members.
        members: Vec<MemberEntry>,
    },
    /// A message record.
    Message {
        /// The message.
        message: Message,
    },
    /// A reaction together with the message totals after it.
    Reaction {
        /// The message after the change.
        message: Message,
        /// The reaction.
        reaction: Reaction,
    },
    /// A page of a list.
    Page {
        /// The page.
        page: Page,
    },
    /// A burst of events.
    Events {
        /// Frames in server order.
        frames: Vec<Frame>,
    },
    /// User records.
    Users {
        /// The users.
        users: Vec<User>,
    },
    /// A single user record.
    User {
        /// The user.
        user: User,
    },
}

impl Response {
    /// Short name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Channel { .. } => "channel",
            Self::Members { .. } => "members",
            Self::Message { .. } => "message",
            Self::Reaction { .. } => "reaction",
            Self::Page { .. } => "page",
            Self::Events { .. } => "events",
            Self::Users { .. } => "users",
            Self::User { .. } => "user",
        }
    }
}
