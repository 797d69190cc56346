//! # chatsync-core
//!
//! Pure logic for chatsync (no network I/O, instant tests).
//!
//! This crate holds the client's state and the rules that mutate it:
//! - [`LocalStore`] - the single source of truth for cached entities
//! - [`ConnectionMachine`] - session lifecycle with reconnect backoff
//! - [`Outbox`] - optimistic sends awaiting acknowledgement
//! - [`Cursor`] - pagination over any entity list
//! - [`UnreadCounters`] - unread counts derived from the store
//! - [`Dispatcher`] - the serialised write path and listener fan-out
//!
//! ## Design Philosophy
//!
//! Nothing here talks to the network. State machines take events and
//! return actions; cursors hand out page requests and fold pages back in.
//! `chatsync-client` performs the I/O those actions and requests describe.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod counters;
pub mod dispatcher;
pub mod listener;
pub mod lock;
pub mod outbox;
pub mod query;
pub mod state;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use apply::apply_event;
pub use counters::UnreadCounters;
pub use dispatcher::Dispatcher;
pub use listener::{
    ChannelEvent, ChannelListener, ConnectionListener, Fanout, ListenerRegistry, ListenerScope,
};
pub use outbox::{Disposition, Outbox, OutboxEntry, OutboxState};
pub use query::{local_page, scope_of, window, Cursor, Query, Ticket, Window};
pub use state::{
    calculate_backoff, Action, AuthPhase, ConnectionEvent, ConnectionMachine, ConnectionState,
    Event, FailureReason, TokenStatus,
};
pub use store::{
    Change, EntityKind, LocalStore, MutationLog, Scope, ScopeKind, SharedStore, StoreChange,
};
