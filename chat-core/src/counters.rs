//! Unread counters derived from the local store.
//!
//! Counts are never authoritative: every value can be recomputed from the
//! stored channels, messages, markers and reactions. [`UnreadCounters::apply`]
//! updates them incrementally from the mutation log, and must always agree
//! with [`UnreadCounters::recount`].
//!
//! A message is unread when it is incoming, not deleted, not silent, newer
//! than the channel's read watermark, and the current user has not set the
//! `displayed` marker on it. Muted channels report zero unread messages but
//! keep their mention and reaction counts.

use std::collections::{BTreeSet, HashMap};

use chatsync_types::{Channel, ChannelId, Message, UnreadCounts, UnreadTotals, UserId, MARKER_DISPLAYED};

use crate::store::{Change, LocalStore, StoreChange};

/// Per-channel and aggregate unread counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounters {
    per_channel: HashMap<ChannelId, UnreadCounts>,
    totals: UnreadTotals,
}

impl UnreadCounters {
    /// Empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts of one channel (zero if unknown).
    pub fn channel(&self, channel_id: &ChannelId) -> UnreadCounts {
        self.per_channel.get(channel_id).copied().unwrap_or_default()
    }

    /// Aggregate counts.
    pub fn totals(&self) -> UnreadTotals {
        self.totals
    }

    /// Recompute everything from the store.
    pub fn recount(store: &LocalStore) -> Self {
        let mut counters = Self::new();
        for channel in store.channels() {
            counters.set(&channel.id, count_channel(store, channel));
        }
        counters.retotal(store);
        counters
    }

    /// Fold a batch of store changes in. Returns the channels whose counts
    /// were touched.
    ///
    /// A channel whose only changes are new messages is adjusted by the
    /// contribution of those messages; any other change recounts the
    /// channel from scratch.
    pub fn apply(&mut self, store: &LocalStore, changes: &[StoreChange]) -> BTreeSet<ChannelId> {
        let mut inserted: HashMap<&ChannelId, Vec<&Change>> = HashMap::new();
        let mut recount: BTreeSet<ChannelId> = BTreeSet::new();

        for StoreChange { change, .. } in changes {
            let Some(channel_id) = change.channel_id() else {
                continue;
            };
            match change {
                Change::MessageInserted { .. } => {
                    inserted.entry(channel_id).or_default().push(change);
                }
                _ => {
                    recount.insert(channel_id.clone());
                }
            }
        }

        let mut touched = BTreeSet::new();
        for (channel_id, changes) in inserted {
            if recount.contains(channel_id) {
                continue;
            }
            let Some(channel) = store.channel(channel_id) else {
                continue;
            };
            let mut delta = UnreadCounts::default();
            for change in changes {
                if let Change::MessageInserted { key, .. } = change {
                    if let Some(message) = store.message(key) {
                        delta.add(message_counts(store, channel, message));
                    }
                }
            }
            if channel.muted.enabled {
                delta.messages = 0;
            }
            let mut counts = self.channel(channel_id);
            counts.add(delta);
            self.set(channel_id, counts);
            touched.insert(channel_id.clone());
        }

        for channel_id in recount {
            let counts = store
                .channel(&channel_id)
                .map(|channel| count_channel(store, channel))
                .unwrap_or_default();
            self.set(&channel_id, counts);
            touched.insert(channel_id);
        }

        if !touched.is_empty() {
            self.retotal(store);
        }
        touched
    }

    /// Only non-zero counts are kept.
    fn set(&mut self, channel_id: &ChannelId, counts: UnreadCounts) {
        if counts.is_zero() {
            self.per_channel.remove(channel_id);
        } else {
            self.per_channel.insert(channel_id.clone(), counts);
        }
    }

    fn retotal(&mut self, store: &LocalStore) {
        let mut totals = UnreadTotals::default();
        for channel in store.channels() {
            let counts = self.channel(&channel.id);
            totals.unread_messages += counts.messages;
            totals.unread_mentions += counts.mentions;
            totals.unread_reactions += counts.reactions;
            if counts.messages > 0 || channel.marked_as_unread {
                totals.unread_channels += 1;
            }
        }
        self.totals = totals;
    }
}

fn count_channel(store: &LocalStore, channel: &Channel) -> UnreadCounts {
    let mut counts = UnreadCounts::default();
    for message in store.timeline(&channel.id) {
        counts.add(message_counts(store, channel, message));
    }
    if channel.muted.enabled {
        counts.messages = 0;
    }
    counts
}

/// What one message adds to its channel's counts, before muting.
fn message_counts(store: &LocalStore, channel: &Channel, message: &Message) -> UnreadCounts {
    let mut counts = UnreadCounts::default();
    let me = store.current_user();

    if is_unread(channel, message) {
        counts.messages = 1;
        if me.is_some_and(|me| message.mentions(me)) {
            counts.mentions = 1;
        }
    }

    if !message.incoming && !message.is_deleted() {
        if let Some(message_id) = message.server_id() {
            counts.reactions = store
                .reactions(message_id)
                .into_iter()
                .filter(|r| !is_me(me, &r.user_id) && r.updated_at > channel.read_watermark)
                .count() as u64;
        }
    }
    counts
}

fn is_unread(channel: &Channel, message: &Message) -> bool {
    message.incoming
        && !message.is_deleted()
        && !message.silent
        && message.created_at > channel.read_watermark
        && !message.self_markers.contains(MARKER_DISPLAYED)
}

fn is_me(me: Option<&UserId>, user: &UserId) -> bool {
    me.is_some_and(|me| me == user)
}
