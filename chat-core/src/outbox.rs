//! Outgoing message queue for chatsync.
//!
//! Tracks optimistic sends from creation until the server acknowledges them:
//! - FIFO ordering for submission
//! - In-flight tracking (at most one submission per temporary id)
//! - Parking of network-failed sends until the session resumes
//! - Max size limits to prevent unbounded memory growth
//!
//! The outbox only holds what to send. The optimistic message itself lives
//! in the local store.

use std::collections::{HashMap, VecDeque};

use chatsync_types::{
    ChannelId, ChatError, DeliveryStatus, Message, MessageDraft, MessageKey, MessageState,
    TempId, UserId,
};

/// Where an entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// Waiting to be submitted.
    Queued,
    /// Submitted, awaiting a response.
    InFlight,
    /// Submission hit a network failure; retried on resume.
    Parked,
}

/// A message waiting for acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Temporary id of the optimistic message.
    pub tid: TempId,
    /// Target channel.
    pub channel_id: ChannelId,
    /// Content.
    pub draft: MessageDraft,
    /// Submissions made so far.
    pub attempts: u32,
    /// Lifecycle state.
    pub state: OutboxState,
}

impl OutboxEntry {
    /// The optimistic message shown until the server confirms.
    pub fn pending_message(&self, sender: UserId, created_at: u64) -> Message {
        let draft = &self.draft;
        Message {
            key: MessageKey::Temp(self.tid),
            tid: Some(self.tid),
            channel_id: self.channel_id.clone(),
            sender,
            body: draft.body.clone(),
            kind: draft.kind.clone(),
            metadata: draft.metadata.clone(),
            created_at,
            updated_at: created_at,
            incoming: false,
            delivery_status: DeliveryStatus::Pending,
            state: MessageState::Unmodified,
            attachments: draft.attachments.clone(),
            reaction_totals: Default::default(),
            self_reactions: Default::default(),
            marker_totals: Default::default(),
            self_markers: Default::default(),
            mentioned_user_ids: draft.mentioned_user_ids.clone(),
            parent_id: draft.parent_id.clone(),
            reply_in_thread: draft.reply_in_thread,
            reply_count: 0,
            transient: draft.transient,
            silent: draft.silent,
            forwarding: None,
        }
    }
}

/// What to do after a failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the entry parked; resubmit when the session resumes.
    Retry,
    /// Drop the entry; the message is marked `Failed`.
    GiveUp,
}

/// Outgoing queue with in-flight tracking.
///
/// Entries flow through the outbox in this order:
/// 1. `enqueue()` - add to the queue
/// 2. `begin_submit()` - mark in flight
/// 3. `ack()` - remove (delivery confirmed)
///
/// If submission fails, call `park()`; it decides between retrying later
/// and giving up.
#[derive(Debug)]
pub struct Outbox {
    /// Maximum number of entries (queued + in flight + parked).
    max_size: usize,
    /// Submissions allowed per entry before giving up.
    max_attempts: u32,
    /// Submission order.
    order: VecDeque<TempId>,
    entries: HashMap<TempId, OutboxEntry>,
}

impl Outbox {
    /// Create a new outbox.
    pub fn new(max_size: usize, max_attempts: u32) -> Self {
        Self {
            max_size,
            max_attempts: max_attempts.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Add a message to the queue.
    ///
    /// Fails if the outbox is full or the temporary id is already queued.
    pub fn enqueue(
        &mut self,
        tid: TempId,
        channel_id: ChannelId,
        draft: MessageDraft,
    ) -> Result<&OutboxEntry, ChatError> {
        if self.entries.contains_key(&tid) {
            return Err(ChatError::InvalidTransition(format!("{} already queued", tid)));
        }
        if self.entries.len() >= self.max_size {
            return Err(ChatError::OutboxFull { max: self.max_size });
        }
        self.order.push_back(tid);
        let entry = self.entries.entry(tid).or_insert(OutboxEntry {
            tid,
            channel_id,
            draft,
            attempts: 0,
            state: OutboxState::Queued,
        });
        Ok(entry)
    }

    /// Mark an entry in flight and return a copy to submit.
    ///
    /// A second submission of the same entry while one is in flight is
    /// refused with [`ChatError::Busy`].
    pub fn begin_submit(&mut self, tid: &TempId) -> Result<OutboxEntry, ChatError> {
        let entry = self
            .entries
            .get_mut(tid)
            .ok_or_else(|| ChatError::NotFound(format!("outbox entry {}", tid)))?;
        if entry.state == OutboxState::InFlight {
            return Err(ChatError::Busy);
        }
        entry.state = OutboxState::InFlight;
        entry.attempts += 1;
        Ok(entry.clone())
    }

    /// Acknowledge delivery. Removes the entry.
    pub fn ack(&mut self, tid: &TempId) -> Option<OutboxEntry> {
        self.order.retain(|t| t != tid);
        self.entries.remove(tid)
    }

    /// Record a failed submission.
    ///
    /// Network-class failures park the entry until the attempt budget is
    /// spent. Any other failure gives up immediately and removes it.
    pub fn park(&mut self, tid: &TempId, error: &ChatError) -> Disposition {
        let retry = match self.entries.get_mut(tid) {
            Some(entry) if error.is_retryable() && entry.attempts < self.max_attempts => {
                entry.state = OutboxState::Parked;
                true
            }
            _ => false,
        };
        if retry {
            Disposition::Retry
        } else {
            self.ack(tid);
            Disposition::GiveUp
        }
    }

    /// Abandon an in-flight submission without counting it (the caller was
    /// cancelled). The entry is parked for the next resume.
    pub fn release(&mut self, tid: &TempId) {
        if let Some(entry) = self.entries.get_mut(tid) {
            if entry.state == OutboxState::InFlight {
                entry.state = OutboxState::Parked;
                entry.attempts = entry.attempts.saturating_sub(1);
            }
        }
    }

    /// Entries ready to (re)submit, in submission order.
    pub fn ready(&self) -> Vec<TempId> {
        self.order
            .iter()
            .filter(|tid| {
                self.entries
                    .get(*tid)
                    .is_some_and(|e| e.state != OutboxState::InFlight)
            })
            .copied()
            .collect()
    }

    /// Look up an entry.
    pub fn get(&self, tid: &TempId) -> Option<&OutboxEntry> {
        self.entries.get(tid)
    }

    /// Check if an entry is in flight.
    pub fn is_in_flight(&self, tid: &TempId) -> bool {
        self.entries
            .get(tid)
            .is_some_and(|e| e.state == OutboxState::InFlight)
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the outbox is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry of a channel (it was deleted or left).
    pub fn discard_channel(&mut self, channel_id: &ChannelId) -> Vec<TempId> {
        let dropped: Vec<TempId> = self
            .entries
            .values()
            .filter(|e| &e.channel_id == channel_id)
            .map(|e| e.tid)
            .collect();
        for tid in &dropped {
            self.ack(tid);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> ChatError {
        ChatError::NetworkUnavailable("offline".into())
    }

    fn queued(outbox: &mut Outbox) -> TempId {
        let tid = TempId::new();
        outbox
            .enqueue(tid, ChannelId::new("c1"), MessageDraft::text("hi"))
            .unwrap();
        tid
    }

    // ===========================================
    // Queue Tests
    // ===========================================

    #[test]
    fn outbox_respects_max_size() {
        let mut outbox = Outbox::new(2, 3);
        queued(&mut outbox);
        queued(&mut outbox);
        let overflow = outbox.enqueue(TempId::new(), ChannelId::new("c1"), MessageDraft::default());

        assert_eq!(overflow.unwrap_err(), ChatError::OutboxFull { max: 2 });
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn duplicate_tid_is_rejected() {
        let mut outbox = Outbox::new(8, 3);
        let tid = queued(&mut outbox);
        assert!(outbox
            .enqueue(tid, ChannelId::new("c1"), MessageDraft::default())
            .is_err());
    }

    #[test]
    fn ready_preserves_submission_order() {
        let mut outbox = Outbox::new(8, 3);
        let first = queued(&mut outbox);
        let second = queued(&mut outbox);
        let third = queued(&mut outbox);
        outbox.begin_submit(&second).unwrap();

        assert_eq!(outbox.ready(), vec![first, third]);
    }

    #[test]
    fn ack_removes_entry() {
        let mut outbox = Outbox::new(8, 3);
        let tid = queued(&mut outbox);
        outbox.begin_submit(&tid).unwrap();
        assert!(outbox.ack(&tid).is_some());
        assert!(outbox.is_empty());
        assert!(outbox.ready().is_empty());
    }

    // ===========================================
    // Submission Tests
    // ===========================================

    #[test]
    fn second_submit_while_in_flight_is_busy() {
        let mut outbox = Outbox::new(8, 3);
        let tid = queued(&mut outbox);
        outbox.begin_submit(&tid).unwrap();
        assert!(outbox.is_in_flight(&tid));
        assert_eq!(outbox.begin_submit(&tid).unwrap_err(), ChatError::Busy);
    }

    #[test]
    fn network_failure_parks_until_budget_spent() {
        let mut outbox = Outbox::new(8, 2);
        let tid = queued(&mut outbox);

        outbox.begin_submit(&tid).unwrap();
        assert_eq!(outbox.park(&tid, &network()), Disposition::Retry);
        assert_eq!(outbox.get(&tid).unwrap().state, OutboxState::Parked);

        outbox.begin_submit(&tid).unwrap();
        assert_eq!(outbox.park(&tid, &network()), Disposition::GiveUp);
        assert!(outbox.get(&tid).is_none());
    }

    #[test]
    fn conflict_gives_up_immediately() {
        let mut outbox = Outbox::new(8, 5);
        let tid = queued(&mut outbox);
        outbox.begin_submit(&tid).unwrap();
        let disposition = outbox.park(&tid, &ChatError::Conflict("channel frozen".into()));
        assert_eq!(disposition, Disposition::GiveUp);
        assert!(outbox.is_empty());
    }

    #[test]
    fn release_does_not_spend_an_attempt() {
        let mut outbox = Outbox::new(8, 5);
        let tid = queued(&mut outbox);
        outbox.begin_submit(&tid).unwrap();
        outbox.release(&tid);
        let entry = outbox.get(&tid).unwrap();
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.state, OutboxState::Parked);
    }

    #[test]
    fn pending_message_mirrors_draft() {
        let mut outbox = Outbox::new(8, 3);
        let tid = queued(&mut outbox);
        let message = outbox
            .get(&tid)
            .unwrap()
            .pending_message(UserId::new("me"), 42);

        assert_eq!(message.key, MessageKey::Temp(tid));
        assert_eq!(message.body, "hi");
        assert_eq!(message.delivery_status, DeliveryStatus::Pending);
        assert_eq!(message.created_at, 42);
        assert!(!message.incoming);
    }

    #[test]
    fn discard_channel_drops_its_entries() {
        let mut outbox = Outbox::new(8, 3);
        let tid = queued(&mut outbox);
        outbox
            .enqueue(TempId::new(), ChannelId::new("c2"), MessageDraft::default())
            .unwrap();
        assert_eq!(outbox.discard_channel(&ChannelId::new("c1")), vec![tid]);
        assert_eq!(outbox.len(), 1);
    }
}
