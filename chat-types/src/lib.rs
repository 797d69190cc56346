//! # chatsync-types
//!
//! Shared types for the chatsync client core.
//!
//! This crate provides the foundational types used across all chatsync crates:
//! - [`ChannelId`], [`MessageId`], [`UserId`], [`TempId`], [`MessageKey`] - Identity types
//! - [`Channel`], [`Message`], [`User`], [`Member`], [`Reaction`], [`Marker`] - Entity records
//! - [`Frame`], [`ServerEvent`] - Inbound events, already decoded by the transport
//! - [`Command`], [`Response`] - Outbound requests and their results
//! - [`ChatError`] - Error kinds shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
mod event;
mod ids;
mod model;
mod query;

pub use command::{
    ChannelAction, ChannelDraft, ChannelUpdate, Command, MemberAction, MemberParams,
    MessageDraft, MessageEdit, ReportTarget, Response, UserProfile,
};
pub use error::ChatError;
pub use event::{Frame, ServerEvent};
pub use ids::{ChannelId, MessageId, MessageKey, TempId, UserId};
pub use model::{
    ActivityState, Attachment, Channel, ChannelDetails, ChannelKind, DeliveryStatus,
    ForwardingDetails, LastMessage, Marker, MarkerList, Member, MemberEntry, Message,
    MessageState, Presence, PresenceState, Reaction, TimedFlag, UnreadCounts, UnreadTotals,
    User, MARKER_DISPLAYED, MARKER_RECEIVED,
};
pub use query::{
    Anchor, AttachmentQuery, ChannelQuery, ChannelSort, MarkerQuery, MemberFilter, MemberOrder,
    MemberOrderKey, MemberQuery, MessageQuery, Navigation, Page, PageItems, PageRequest, PageToken,
    QuerySpec, ReactionQuery, SortKey, TextField, TextFilter, TextMatch,
};
