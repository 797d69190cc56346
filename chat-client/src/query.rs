//! Query handles: paginated list views backed by a core [`Cursor`].
//!
//! While connected, pages come from the service and are merged into the
//! store before they are handed out. Offline, or when the service is
//! unreachable, the same windows are served from the local store.

use std::sync::{Arc, Mutex};

use chatsync_core::lock::lock;
use chatsync_core::{local_page, scope_of, ChannelEvent, Cursor, LocalStore, Query, Scope, Ticket};
use chatsync_types::{
    Anchor, ChatError, Command, Navigation, Page, PageItems, QuerySpec, Response,
};
use tracing::debug;

use crate::client::{unexpected, ChatClient, Inner};
use crate::transport::Transport;

/// A paginated view over one immutable query.
///
/// Cheap to clone; clones share the cursor. One page load may be in flight
/// at a time, a second one fails with [`ChatError::Busy`].
pub struct QueryHandle<Q: Query, T: Transport> {
    inner: Arc<Inner<T>>,
    cursor: Arc<Mutex<Cursor<Q>>>,
}

impl<Q: Query, T: Transport> Clone for QueryHandle<Q, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cursor: Arc::clone(&self.cursor),
        }
    }
}

impl<T: Transport> ChatClient<T> {
    /// Open a list view over `query`.
    pub fn query<Q: Query>(&self, query: Q) -> QueryHandle<Q, T> {
        let spec: QuerySpec = query.clone().into();
        let scope = scope_of(&spec);
        let generation = self.read(|store| generation(store, &scope));
        let cursor = Cursor::new(query, generation, self.inner.config.default_page_limit);
        QueryHandle {
            inner: Arc::clone(&self.inner),
            cursor: Arc::new(Mutex::new(cursor)),
        }
    }
}

impl<Q: Query, T: Transport> QueryHandle<Q, T> {
    /// Load the page after the current window.
    pub async fn load_next(&self) -> Result<Vec<Q::Item>, ChatError> {
        self.load(Navigation::Next).await
    }

    /// Load the page before the current window.
    pub async fn load_previous(&self) -> Result<Vec<Q::Item>, ChatError> {
        self.load(Navigation::Previous).await
    }

    /// Load a window around `anchor`, replacing the current position.
    pub async fn load_near(&self, anchor: Anchor) -> Result<Vec<Q::Item>, ChatError> {
        self.load(Navigation::Near(anchor)).await
    }

    /// More items may follow (advisory).
    pub fn has_next(&self) -> bool {
        lock(&self.cursor).has_next()
    }

    /// More items may precede the window (advisory).
    pub fn has_previous(&self) -> bool {
        lock(&self.cursor).has_previous()
    }

    /// A page load is in flight.
    pub fn is_loading(&self) -> bool {
        lock(&self.cursor).is_loading()
    }

    /// The store changed underneath this view; open a new one.
    pub fn is_invalidated(&self) -> bool {
        lock(&self.cursor).is_invalidated()
    }

    /// The query this view lists.
    pub fn query(&self) -> Q {
        lock(&self.cursor).query().clone()
    }

    async fn load(&self, navigation: Navigation) -> Result<Vec<Q::Item>, ChatError> {
        let scope = lock(&self.cursor).scope();
        let store_generation = self.inner.dispatcher.read(|store| generation(store, &scope));
        let ticket = lock(&self.cursor).begin(navigation, store_generation)?;
        let _pending = Pending {
            cursor: &self.cursor,
            ticket: &ticket,
        };

        if self.inner.is_connected() {
            let response = self
                .inner
                .request(Command::FetchPage {
                    request: ticket.request.clone(),
                })
                .await;
            match response {
                Ok(Response::Page { page }) => return self.complete_remote(&ticket, &scope, page),
                Ok(other) => return Err(unexpected("fetch_page", &other)),
                Err(error) if error.is_retryable() => {
                    debug!(%error, "page fetch failed; serving from local store");
                }
                Err(error) => return Err(error),
            }
        }
        self.complete_local(&ticket, &scope)
    }

    fn complete_remote(
        &self,
        ticket: &Ticket,
        scope: &Option<Scope>,
        page: Page,
    ) -> Result<Vec<Q::Item>, ChatError> {
        let cursor = &self.cursor;
        self.inner.dispatcher.commit(|store| {
            let now = generation(store, scope);
            let mut cursor = lock(cursor);
            if now != cursor.generation() {
                // Invalidated: nothing from this page may reach the store.
                return (cursor.complete(ticket, page, now), Vec::new());
            }
            let (page, events) = merge_page(store, scope, page);
            let items = cursor.complete(ticket, page, now);
            cursor.rebase(generation(store, scope));
            (items, events)
        })
    }

    fn complete_local(
        &self,
        ticket: &Ticket,
        scope: &Option<Scope>,
    ) -> Result<Vec<Q::Item>, ChatError> {
        self.inner.dispatcher.read(|store| {
            let now = generation(store, scope);
            let page = local_page(store, &ticket.request)?;
            lock(&self.cursor).complete(ticket, page, now)
        })
    }
}

/// Frees the cursor if the load is dropped before it completes.
struct Pending<'a, Q: Query> {
    cursor: &'a Mutex<Cursor<Q>>,
    ticket: &'a Ticket,
}

impl<Q: Query> Drop for Pending<'_, Q> {
    fn drop(&mut self) {
        lock(self.cursor).abort(self.ticket);
    }
}

fn generation(store: &LocalStore, scope: &Option<Scope>) -> u64 {
    scope.as_ref().map_or(0, |s| store.generation(s))
}

/// Merge a service page into the store and return the page with the
/// stored copies.
///
/// Reactions and markers are returned as delivered: their totals already
/// live on the messages, and folding them in again would count them twice.
fn merge_page(
    store: &mut LocalStore,
    scope: &Option<Scope>,
    page: Page,
) -> (Page, Vec<ChannelEvent>) {
    let Page {
        items,
        has_next,
        has_previous,
        start_offset,
    } = page;
    let items = match items {
        PageItems::Messages(messages) => PageItems::Messages(
            messages
                .into_iter()
                .map(|message| {
                    if message.transient {
                        return message;
                    }
                    match store.upsert_message(message.clone()) {
                        Ok(key) => store.message(&key).cloned().unwrap_or(message),
                        Err(error) => {
                            debug!(%error, "paged message not merged");
                            message
                        }
                    }
                })
                .collect(),
        ),
        PageItems::Members(members) => {
            if let Some(scope) = scope {
                for entry in &members {
                    store.upsert_member(&scope.channel_id, entry.clone());
                }
            }
            PageItems::Members(members)
        }
        PageItems::Channels(channels) => PageItems::Channels(
            channels
                .into_iter()
                .map(|channel| {
                    let channel_id = channel.id.clone();
                    let fallback = channel.clone();
                    store.upsert_channel(channel);
                    store.channel(&channel_id).cloned().unwrap_or(fallback)
                })
                .collect(),
        ),
        other => other,
    };
    let page = Page {
        items,
        has_next,
        has_previous,
        start_offset,
    };
    (page, Vec::new())
}
