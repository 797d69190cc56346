//! Identity types for chatsync.
//!
//! Server-assigned ids are opaque strings. The only id the client mints
//! itself is the [`TempId`] of an optimistically created message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a channel, assigned by the chat service.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Wrap a server-provided channel id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

/// Authoritative message id, assigned by the server on acceptance.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a server-provided message id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Identifier of a user account.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a server-provided user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// Client-local id of a message that the server has not acknowledged yet.
///
/// UUID v4 format. Kept on the message after confirmation so the server
/// echo of an optimistic send can be recognised.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(uuid::Uuid);

impl TempId {
    /// Create a new random TempId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create a TempId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0)
    }
}

/// The addressable key of a message in the local store.
///
/// A message is addressed by its temporary id until the server confirms it,
/// and by its server id from then on. Never both.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageKey {
    /// Optimistic message awaiting acknowledgement.
    Temp(TempId),
    /// Server-confirmed message.
    Server(MessageId),
}

impl MessageKey {
    /// The server id, if this key is confirmed.
    pub fn server_id(&self) -> Option<&MessageId> {
        match self {
            Self::Server(id) => Some(id),
            Self::Temp(_) => None,
        }
    }

    /// True while the key is still a temporary id.
    pub fn is_temp(&self) -> bool {
        matches!(self, Self::Temp(_))
    }
}

impl From<MessageId> for MessageKey {
    fn from(id: MessageId) -> Self {
        Self::Server(id)
    }
}

impl From<TempId> for MessageKey {
    fn from(tid: TempId) -> Self {
        Self::Temp(tid)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(tid) => write!(f, "tmp:{}", tid),
            Self::Server(id) => write!(f, "{}", id),
        }
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(tid) => write!(f, "MessageKey::Temp({})", tid),
            Self::Server(id) => write!(f, "MessageKey::Server({})", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_id_is_uuid_v4() {
        let id = TempId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn temp_id_roundtrip_bytes() {
        let original = TempId::new();
        let restored = TempId::from_bytes(original.as_uuid().as_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn temp_ids_are_unique() {
        assert_ne!(TempId::new(), TempId::new());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = ChannelId::new("c-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c-42\"");
        let back: ChannelId = serde_json::from_str("\"c-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn message_key_exposes_server_id_only_when_confirmed() {
        let temp = MessageKey::from(TempId::new());
        assert!(temp.is_temp());
        assert!(temp.server_id().is_none());

        let server = MessageKey::from(MessageId::new("m1"));
        assert!(!server.is_temp());
        assert_eq!(server.server_id(), Some(&MessageId::new("m1")));
    }

    #[test]
    fn message_key_display() {
        assert_eq!(MessageKey::from(MessageId::new("m7")).to_string(), "m7");
        assert!(MessageKey::from(TempId::new()).to_string().starts_with("tmp:"));
    }
}
