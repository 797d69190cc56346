//! # chatsync-client
//!
//! Client library for the chatsync chat core.
//!
//! This is the crate applications use to talk to the chat service while
//! keeping an offline-capable local view of channels, messages and members.
//!
//! ## Features
//!
//! - **Optimistic Sends**: messages appear immediately and are confirmed in place
//! - **Offline First**: queries fall back to the local store, sends queue until resume
//! - **Transport Abstraction**: pluggable transport layer (mock included)
//! - **Pure State Machines**: uses chatsync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use chatsync_client::{ChatClient, ClientConfig, MockTransport};
//!
//! let config = ClientConfig::from_file(Path::new("chat.toml"))?;
//! let client = ChatClient::new(config, MockTransport::new(), UserId::new("alice"));
//! client.connect("access-token").await?;
//!
//! // Send a message
//! client.send_message(&channel_id, MessageDraft::text("hi")).await?;
//!
//! // Page through history
//! let history = client.query(MessageQuery::new(channel_id));
//! let page = history.load_next().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod channels;
pub mod client;
pub mod config;
pub mod logging;
mod messages;
pub mod query;
pub mod transport;
mod users;

pub use client::{ChatClient, TokenProvider};
pub use config::{ClientConfig, ConfigError};
pub use logging::LogLevel;
pub use query::QueryHandle;
pub use transport::{MockTransport, Transport, TransportError};

pub use chatsync_core::{
    ChannelEvent, ChannelListener, ConnectionEvent, ConnectionListener, ConnectionState,
    FailureReason, ListenerScope,
};
pub use chatsync_types as types;
