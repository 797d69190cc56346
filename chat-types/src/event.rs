//! Inbound events.
//!
//! The transport hands over [`Frame`]s: an event type name plus a JSON
//! payload, already decoded from the wire. [`Frame::decode`] turns a frame
//! into a typed [`ServerEvent`].

use serde::{Deserialize, Serialize};

use crate::{
    Channel, ChannelId, ChatError, MarkerList, MemberEntry, Message, MessageId, Reaction, User,
    UserId,
};

/// A structured inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event type name, e.g. `message_received`.
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl Frame {
    /// Build a frame from its parts.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Encode a typed event as a frame.
    pub fn from_event(event: &ServerEvent) -> Result<Self, ChatError> {
        let value = serde_json::to_value(event).map_err(|e| ChatError::Malformed(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ChatError::Malformed(e.to_string()))
    }

    /// Decode into a typed event.
    ///
    /// Unknown event types and payloads missing required fields are reported
    /// as [`ChatError::Malformed`].
    pub fn decode(&self) -> Result<ServerEvent, ChatError> {
        let value = serde_json::json!({
            "event_type": self.event_type,
            "payload": self.payload,
        });
        serde_json::from_value(value)
            .map_err(|e| ChatError::Malformed(format!("{}: {}", self.event_type, e)))
    }
}

/// Every event the service pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A channel the current user belongs to was created.
    ChannelCreated {
        /// The fully resolved channel.
        channel: Channel,
    },
    /// Channel fields changed.
    ChannelUpdated {
        /// The channel after the change.
        channel: Channel,
    },
    /// A channel was deleted.
    ChannelDeleted {
        /// Deleted channel.
        channel_id: ChannelId,
    },
    /// The current user hid a channel (possibly from another device).
    ChannelHidden {
        /// Hidden channel.
        channel_id: ChannelId,
    },
    /// A hidden channel became visible again.
    ChannelShown {
        /// Shown channel.
        channel_id: ChannelId,
    },
    /// Notifications for a channel were muted.
    ChannelMuted {
        /// Muted channel.
        channel_id: ChannelId,
        /// Epoch millis when the mute lapses.
        #[serde(default)]
        expires_at: Option<u64>,
    },
    /// Notifications for a channel were unmuted.
    ChannelUnmuted {
        /// Unmuted channel.
        channel_id: ChannelId,
    },
    /// A group channel was blocked.
    ChannelBlocked {
        /// Blocked channel.
        channel_id: ChannelId,
    },
    /// A group channel was unblocked.
    ChannelUnblocked {
        /// Unblocked channel.
        channel_id: ChannelId,
    },
    /// The current user marked a channel as unread.
    ChannelMarkedAsUnread {
        /// Marked channel.
        channel_id: ChannelId,
    },
    /// All messages of a channel were deleted.
    HistoryCleared {
        /// Cleared channel.
        channel_id: ChannelId,
    },
    /// Members were added.
    MembersAdded {
        /// Channel.
        channel_id: ChannelId,
        /// New members.
        members: Vec<MemberEntry>,
    },
    /// A user joined a public channel.
    MemberJoined {
        /// Channel.
        channel_id: ChannelId,
        /// The new member.
        member: MemberEntry,
    },
    /// A member left.
    MemberLeft {
        /// Channel.
        channel_id: ChannelId,
        /// Departed user.
        user_id: UserId,
    },
    /// Members were removed.
    MembersKicked {
        /// Channel.
        channel_id: ChannelId,
        /// Removed users.
        user_ids: Vec<UserId>,
    },
    /// Member roles changed.
    MembersRoleChanged {
        /// Channel.
        channel_id: ChannelId,
        /// Members with their new roles.
        members: Vec<MemberEntry>,
    },
    /// Members were blocked.
    MembersBlocked {
        /// Channel.
        channel_id: ChannelId,
        /// Blocked users.
        user_ids: Vec<UserId>,
    },
    /// Members were unblocked.
    MembersUnblocked {
        /// Channel.
        channel_id: ChannelId,
        /// Unblocked users.
        user_ids: Vec<UserId>,
    },
    /// Channel ownership moved.
    OwnerChanged {
        /// Channel.
        channel_id: ChannelId,
        /// The new owner.
        new_owner: MemberEntry,
        /// The previous owner, demoted to admin.
        #[serde(default)]
        old_owner: Option<UserId>,
    },
    /// A message was posted, including the server echo of our own sends.
    MessageReceived {
        /// Channel.
        channel_id: ChannelId,
        /// The message.
        message: Message,
        /// Sender profile.
        #[serde(default)]
        user: Option<User>,
    },
    /// A message was edited.
    MessageEdited {
        /// Channel.
        channel_id: ChannelId,
        /// The message after the edit.
        message: Message,
    },
    /// A message was deleted.
    MessageDeleted {
        /// Channel.
        channel_id: ChannelId,
        /// Deleted message.
        message_id: MessageId,
    },
    /// A reaction was added or its score changed.
    ReactionAdded {
        /// Channel.
        channel_id: ChannelId,
        /// The reaction.
        reaction: Reaction,
    },
    /// A reaction was removed.
    ReactionDeleted {
        /// Channel.
        channel_id: ChannelId,
        /// The removed reaction.
        reaction: Reaction,
    },
    /// A user set markers on messages.
    MarkersReceived {
        /// Channel.
        channel_id: ChannelId,
        /// The markers.
        markers: MarkerList,
    },
    /// A member started typing.
    TypingStarted {
        /// Channel.
        channel_id: ChannelId,
        /// Typing user.
        user_id: UserId,
    },
    /// A member stopped typing.
    TypingStopped {
        /// Channel.
        channel_id: ChannelId,
        /// Typing user.
        user_id: UserId,
    },
    /// A user profile, presence or block flag changed.
    UserUpdated {
        /// The user after the change.
        user: User,
    },
    /// The access token will expire soon.
    TokenWillExpire {
        /// Time left, in milliseconds.
        remaining_ms: u64,
    },
    /// The access token expired.
    TokenExpired {},
}

impl ServerEvent {
    /// Channel the event belongs to, if any.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::ChannelCreated { channel } | Self::ChannelUpdated { channel } => {
                Some(&channel.id)
            }
            Self::ChannelDeleted { channel_id }
            | Self::ChannelHidden { channel_id }
            | Self::ChannelShown { channel_id }
            | Self::ChannelMuted { channel_id, .. }
            | Self::ChannelUnmuted { channel_id }
            | Self::ChannelBlocked { channel_id }
            | Self::ChannelUnblocked { channel_id }
            | Self::ChannelMarkedAsUnread { channel_id }
            | Self::HistoryCleared { channel_id }
            | Self::MembersAdded { channel_id, .. }
            | Self::MemberJoined { channel_id, .. }
            | Self::MemberLeft { channel_id, .. }
            | Self::MembersKicked { channel_id, .. }
            | Self::MembersRoleChanged { channel_id, .. }
            | Self::MembersBlocked { channel_id, .. }
            | Self::MembersUnblocked { channel_id, .. }
            | Self::OwnerChanged { channel_id, .. }
            | Self::MessageReceived { channel_id, .. }
            | Self::MessageEdited { channel_id, .. }
            | Self::MessageDeleted { channel_id, .. }
            | Self::ReactionAdded { channel_id, .. }
            | Self::ReactionDeleted { channel_id, .. }
            | Self::MarkersReceived { channel_id, .. }
            | Self::TypingStarted { channel_id, .. }
            | Self::TypingStopped { channel_id, .. } => Some(channel_id),
            Self::UserUpdated { .. } | Self::TokenWillExpire { .. } | Self::TokenExpired {} => {
                None
            }
        }
    }

    /// True for token lifecycle events, which concern the session rather
    /// than the store.
    pub fn is_session_event(&self) -> bool {
        matches!(self, Self::TokenWillExpire { .. } | Self::TokenExpired {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_decodes_typed_event() {
        let frame = Frame::new(
            "message_deleted",
            serde_json::json!({ "channel_id": "c1", "message_id": "m9" }),
        );
        let event = frame.decode().unwrap();
        assert_eq!(
            event,
            ServerEvent::MessageDeleted {
                channel_id: ChannelId::new("c1"),
                message_id: MessageId::new("m9"),
            }
        );
        assert_eq!(event.channel_id(), Some(&ChannelId::new("c1")));
    }

    #[test]
    fn unknown_event_type_is_malformed() {
        let frame = Frame::new("channel_exploded", serde_json::json!({}));
        assert!(matches!(frame.decode(), Err(ChatError::Malformed(_))));
    }

    #[test]
    fn missing_field_is_malformed() {
        let frame = Frame::new("member_left", serde_json::json!({ "channel_id": "c1" }));
        assert!(matches!(frame.decode(), Err(ChatError::Malformed(_))));
    }

    #[test]
    fn event_survives_frame_encoding() {
        let event = ServerEvent::ChannelMuted {
            channel_id: ChannelId::new("c1"),
            expires_at: Some(1_000),
        };
        let frame = Frame::from_event(&event).unwrap();
        assert_eq!(frame.event_type, "channel_muted");
        assert_eq!(frame.decode().unwrap(), event);
    }

    #[test]
    fn token_events_take_empty_payloads() {
        let frame = Frame::new("token_expired", serde_json::json!({}));
        let event = frame.decode().unwrap();
        assert!(event.is_session_event());
        assert_eq!(event.channel_id(), None);
    }
}
