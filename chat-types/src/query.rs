//! Immutable query specifications and page exchange types.
//!
//! A query is built once as a plain struct (usually with `..Query::new(..)`
//! for the defaults) and handed to a cursor. Nothing here changes after
//! construction.

use serde::{Deserialize, Serialize};

use crate::{
    Attachment, Channel, ChannelId, ChannelKind, Marker, MemberEntry, Message, MessageId,
    Reaction,
};

/// History of a channel, or of one thread in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Channel to list.
    pub channel_id: ChannelId,
    /// Page size; 0 uses the client default.
    pub limit: usize,
    /// Newest first instead of oldest first.
    pub reversed: bool,
    /// Restrict to replies in this thread.
    pub thread: Option<MessageId>,
    /// Restrict to one message type.
    pub message_type: Option<String>,
}

impl MessageQuery {
    /// Oldest-first history of `channel_id` with the default page size.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            limit: 0,
            reversed: false,
            thread: None,
            message_type: None,
        }
    }
}

/// Which members a member query lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberFilter {
    /// Every member.
    #[default]
    All,
    /// Owners and admins.
    Privileged,
    /// Blocked members.
    Blocked,
}

/// Member list ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberOrder {
    /// Owners first, then admins, then everyone else; ascending within a role.
    #[default]
    Affiliation,
    /// Ascending by the order key.
    Ascending,
    /// Descending by the order key.
    Descending,
}

/// Profile field members are sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberOrderKey {
    /// Login name.
    #[default]
    Username,
    /// First name.
    FirstName,
    /// Last name.
    LastName,
}

/// Members of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberQuery {
    /// Channel to list.
    pub channel_id: ChannelId,
    /// Page size; 0 uses the client default.
    pub limit: usize,
    /// Which members to include.
    pub filter: MemberFilter,
    /// Ordering.
    pub order: MemberOrder,
    /// Field used by the ordering.
    pub order_key: MemberOrderKey,
}

impl MemberQuery {
    /// All members of `channel_id` by affiliation.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            limit: 0,
            filter: MemberFilter::All,
            order: MemberOrder::Affiliation,
            order_key: MemberOrderKey::Username,
        }
    }
}

/// Channel list ordering, most recent first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSort {
    /// By the time of the last message (creation time when empty).
    #[default]
    LastMessage,
    /// By creation time.
    CreationDate,
}

/// Channel field a text filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextField {
    /// Group subject.
    Subject,
    /// Public channel uri.
    Uri,
    /// Channel label.
    Label,
}

/// How a text filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextMatch {
    /// Exact match.
    Equals,
    /// Case-insensitive substring.
    Contains,
    /// Case-insensitive prefix.
    Prefix,
}

/// A text predicate on one channel field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFilter {
    /// Field to test.
    pub field: TextField,
    /// Match mode.
    pub matching: TextMatch,
    /// Needle.
    pub value: String,
}

impl TextFilter {
    /// Test a candidate value.
    pub fn matches(&self, candidate: &str) -> bool {
        match self.matching {
            TextMatch::Equals => candidate == self.value,
            TextMatch::Contains => candidate
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
            TextMatch::Prefix => candidate
                .to_lowercase()
                .starts_with(&self.value.to_lowercase()),
        }
    }
}

/// The channel list of the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelQuery {
    /// Page size; 0 uses the client default.
    pub limit: usize,
    /// Restrict to these kinds (empty = all kinds).
    pub kinds: Vec<ChannelKind>,
    /// Ordering.
    pub sort: ChannelSort,
    /// Optional text predicate.
    pub text: Option<TextFilter>,
    /// List only hidden channels instead of only visible ones.
    pub hidden_only: bool,
    /// List only blocked channels.
    pub blocked_only: bool,
}

/// Users who set given markers on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerQuery {
    /// Channel of the message.
    pub channel_id: ChannelId,
    /// Marked message.
    pub message_id: MessageId,
    /// Marker names to include (empty = all).
    pub markers: Vec<String>,
    /// Page size; 0 uses the client default.
    pub limit: usize,
    /// Newest first.
    pub reversed: bool,
}

/// Reactions on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionQuery {
    /// Channel of the message.
    pub channel_id: ChannelId,
    /// Target message.
    pub message_id: MessageId,
    /// Restrict to one reaction key.
    pub key: Option<String>,
    /// Page size; 0 uses the client default.
    pub limit: usize,
}

/// Attachments posted in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentQuery {
    /// Channel to list.
    pub channel_id: ChannelId,
    /// Attachment types to include (empty = all).
    pub types: Vec<String>,
    /// Page size; 0 uses the client default.
    pub limit: usize,
    /// Newest first.
    pub reversed: bool,
}

/// Any of the query specifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum QuerySpec {
    /// Message history.
    Messages(MessageQuery),
    /// Channel members.
    Members(MemberQuery),
    /// Channel list.
    Channels(ChannelQuery),
    /// Message markers.
    Markers(MarkerQuery),
    /// Message reactions.
    Reactions(ReactionQuery),
    /// Channel attachments.
    Attachments(AttachmentQuery),
}

impl QuerySpec {
    /// Configured page size (0 = client default).
    pub fn limit(&self) -> usize {
        match self {
            Self::Messages(q) => q.limit,
            Self::Members(q) => q.limit,
            Self::Channels(q) => q.limit,
            Self::Markers(q) => q.limit,
            Self::Reactions(q) => q.limit,
            Self::Attachments(q) => q.limit,
        }
    }

    /// Channel the query is scoped to, if any.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Messages(q) => Some(&q.channel_id),
            Self::Members(q) => Some(&q.channel_id),
            Self::Channels(_) => None,
            Self::Markers(q) => Some(&q.channel_id),
            Self::Reactions(q) => Some(&q.channel_id),
            Self::Attachments(q) => Some(&q.channel_id),
        }
    }
}

macro_rules! impl_into_spec {
    ($($query:ident => $variant:ident),* $(,)?) => {
        $(impl From<$query> for QuerySpec {
            fn from(query: $query) -> Self {
                Self::$variant(query)
            }
        })*
    };
}

impl_into_spec!(
    MessageQuery => Messages,
    MemberQuery => Members,
    ChannelQuery => Channels,
    MarkerQuery => Markers,
    ReactionQuery => Reactions,
    AttachmentQuery => Attachments,
);

/// A point in a list to jump to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Anchor {
    /// The item with this id.
    Id(String),
    /// The first item at or after this time (epoch millis) in list order.
    Timestamp(u64),
}

/// Cursor movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    /// Items after the loaded window.
    Next,
    /// Items before the loaded window.
    Previous,
    /// A window centred on the anchor, replacing the current position.
    Near(Anchor),
}

/// Position of an item in a keyed list: its time, then its id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Epoch millis the list is ordered by.
    pub at: u64,
    /// Tie breaker.
    pub id: String,
}

impl SortKey {
    /// Build a key.
    pub fn new(at: u64, id: impl Into<String>) -> Self {
        Self { at, id: id.into() }
    }
}

/// Opaque cursor position.
///
/// Member lists are positioned by offset; every other list by the key of the
/// edge item, which stays meaningful when unrelated items are inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageToken {
    /// Index into the ordered list.
    Offset(usize),
    /// Key of the edge item.
    Key(SortKey),
}

/// One page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// What to list.
    pub spec: QuerySpec,
    /// Which way to move.
    pub navigation: Navigation,
    /// Current edge of the cursor in the direction of travel.
    pub from: Option<PageToken>,
    /// Page size, already resolved.
    pub limit: usize,
}

/// Items of a page, typed by entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "items", rename_all = "snake_case")]
pub enum PageItems {
    /// Messages.
    Messages(Vec<Message>),
    /// Members with their profiles.
    Members(Vec<MemberEntry>),
    /// Channels.
    Channels(Vec<Channel>),
    /// Markers.
    Markers(Vec<Marker>),
    /// Reactions.
    Reactions(Vec<Reaction>),
    /// Attachments.
    Attachments(Vec<Attachment>),
}

impl PageItems {
    /// Number of items.
    pub fn len(&self) -> usize {
        match self {
            Self::Messages(v) => v.len(),
            Self::Members(v) => v.len(),
            Self::Channels(v) => v.len(),
            Self::Markers(v) => v.len(),
            Self::Reactions(v) => v.len(),
            Self::Attachments(v) => v.len(),
        }
    }

    /// True for an empty page.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One page of results, in query order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// The items.
    pub items: PageItems,
    /// More items exist after this page (advisory).
    pub has_next: bool,
    /// More items exist before this page (advisory).
    pub has_previous: bool,
    /// Index of the first item, for offset-positioned lists.
    #[serde(default)]
    pub start_offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_filter_modes() {
        let contains = TextFilter {
            field: TextField::Subject,
            matching: TextMatch::Contains,
            value: "rust".into(),
        };
        assert!(contains.matches("Learning Rust"));
        assert!(!contains.matches("Go"));

        let prefix = TextFilter {
            matching: TextMatch::Prefix,
            ..contains.clone()
        };
        assert!(prefix.matches("Rustaceans"));
        assert!(!prefix.matches("Learning Rust"));

        let equals = TextFilter {
            matching: TextMatch::Equals,
            ..contains
        };
        assert!(equals.matches("rust"));
        assert!(!equals.matches("Rust"));
    }

    #[test]
    fn spec_exposes_scope_and_limit() {
        let spec = QuerySpec::from(MessageQuery {
            limit: 20,
            ..MessageQuery::new(ChannelId::new("c1"))
        });
        assert_eq!(spec.limit(), 20);
        assert_eq!(spec.channel_id(), Some(&ChannelId::new("c1")));
        assert_eq!(QuerySpec::from(ChannelQuery::default()).channel_id(), None);
    }

    #[test]
    fn sort_keys_order_by_time_then_id() {
        assert!(SortKey::new(1, "b") < SortKey::new(2, "a"));
        assert!(SortKey::new(1, "a") < SortKey::new(1, "b"));
    }
}
