//! Event dispatcher: the single write path into the local store.
//!
//! Every mutation, whether from an inbound frame or a local command, goes
//! through [`Dispatcher::commit`]:
//!
//! 1. take the ordering lock (the counters mutex)
//! 2. mutate the store under its write lock and drain the mutation log
//! 3. fold the changes into the unread counters
//! 4. queue the resulting events, in commit order
//! 5. release both locks, then deliver queued events to listeners
//!
//! Listeners never run with a lock held, and events from a commit made by a
//! listener are delivered after the event that triggered it.

use std::sync::{Arc, Mutex};

use chatsync_types::{ChannelId, ChatError, Frame, ServerEvent, UnreadCounts, UnreadTotals};
use tracing::{debug, warn};

use crate::apply::apply_event;
use crate::counters::UnreadCounters;
use crate::listener::{
    ChannelEvent, ChannelListener, Fanout, ListenerRegistry, ListenerScope, ScopedListener,
};
use crate::lock::{lock, read, write};
use crate::store::{LocalStore, SharedStore};

/// Serialises store mutations and delivers their notifications.
pub struct Dispatcher {
    store: SharedStore,
    counters: Mutex<UnreadCounters>,
    listeners: Mutex<ListenerRegistry<ScopedListener>>,
    fanout: Fanout<ChannelEvent>,
}

impl Dispatcher {
    /// Create a dispatcher over a store. Counters start from a full recount.
    pub fn new(store: SharedStore) -> Self {
        let counters = UnreadCounters::recount(&read(&store));
        Self {
            store,
            counters: Mutex::new(counters),
            listeners: Mutex::new(ListenerRegistry::new()),
            fanout: Fanout::new(),
        }
    }

    /// The store this dispatcher writes to.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Read the store.
    pub fn read<R>(&self, f: impl FnOnce(&LocalStore) -> R) -> R {
        f(&read(&self.store))
    }

    /// Apply a mutation and publish its events.
    ///
    /// `mutate` returns its result together with the events to publish;
    /// counter updates are appended after them.
    pub fn commit<R>(&self, mutate: impl FnOnce(&mut LocalStore) -> (R, Vec<ChannelEvent>)) -> R {
        let result = {
            let mut counters = lock(&self.counters);
            let mut store = write(&self.store);
            let (result, mut events) = mutate(&mut store);
            let changes = store.drain_changes();

            let before = counters.totals();
            let touched = counters.apply(&store, &changes);
            for channel_id in touched {
                let counts = counters.channel(&channel_id);
                let stale = store.channel(&channel_id).is_some_and(|c| c.counts != counts);
                if stale {
                    store.set_channel_counts(&channel_id, counts);
                    events.push(ChannelEvent::UnreadCountUpdated { channel_id, counts });
                }
            }
            let totals = counters.totals();
            if totals != before {
                events.push(ChannelEvent::TotalUnreadUpdated(totals));
            }
            drop(store);
            self.fanout.push(events);
            result
        };
        self.deliver();
        result
    }

    /// Decode and apply an inbound frame. Malformed frames are logged and
    /// dropped.
    pub fn dispatch(&self, frame: &Frame) -> Result<(), ChatError> {
        match frame.decode() {
            Ok(event) => {
                self.apply(event);
                Ok(())
            }
            Err(error) => {
                warn!(event_type = %frame.event_type, %error, "dropping malformed frame");
                Err(error)
            }
        }
    }

    /// Apply a decoded server event.
    pub fn apply(&self, event: ServerEvent) {
        if event.is_session_event() {
            debug!(?event, "session event is handled by the connection");
            return;
        }
        self.commit(|store| ((), apply_event(store, event)));
    }

    /// Publish events that involve no store mutation.
    pub fn notify(&self, events: Vec<ChannelEvent>) {
        {
            // Ordering lock keeps these behind in-progress commits
            let _order = lock(&self.counters);
            self.fanout.push(events);
        }
        self.deliver();
    }

    /// Reconcile counters with a full recount, publishing any differences.
    pub fn recount(&self) {
        {
            let mut counters = lock(&self.counters);
            let mut store = write(&self.store);
            let fresh = UnreadCounters::recount(&store);
            if *counters != fresh {
                warn!("unread counters drifted from recount; reconciled");
            }

            let mut events = Vec::new();
            let ids: Vec<ChannelId> = store.channels().map(|c| c.id.clone()).collect();
            for channel_id in ids {
                let counts = fresh.channel(&channel_id);
                if store.channel(&channel_id).is_some_and(|c| c.counts != counts) {
                    store.set_channel_counts(&channel_id, counts);
                    events.push(ChannelEvent::UnreadCountUpdated { channel_id, counts });
                }
            }
            if fresh.totals() != counters.totals() {
                events.push(ChannelEvent::TotalUnreadUpdated(fresh.totals()));
            }
            *counters = fresh;
            drop(store);
            self.fanout.push(events);
        }
        self.deliver();
    }

    /// Register a channel listener under `key`. An existing key is replaced.
    pub fn add_listener(
        &self,
        key: impl Into<String>,
        scope: ListenerScope,
        listener: Arc<dyn ChannelListener>,
    ) {
        lock(&self.listeners).add(key, (scope, listener));
    }

    /// Remove a channel listener.
    pub fn remove_listener(&self, key: &str) -> bool {
        lock(&self.listeners).remove(key)
    }

    /// Aggregate unread counts.
    pub fn totals(&self) -> UnreadTotals {
        lock(&self.counters).totals()
    }

    /// Unread counts of one channel.
    pub fn channel_counts(&self, channel_id: &ChannelId) -> UnreadCounts {
        lock(&self.counters).channel(channel_id)
    }

    fn deliver(&self) {
        self.fanout.drain(|event| {
            let listeners = lock(&self.listeners).snapshot();
            for (scope, listener) in listeners {
                if scope.accepts(event) {
                    listener.on_event(event);
                }
            }
        });
    }
}
