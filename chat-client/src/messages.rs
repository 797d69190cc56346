//! Messages: optimistic sends, edits, deletes, reactions and markers.
//!
//! A send is inserted into the store as a pending message under a
//! temporary id before anything leaves the client. The server response (or
//! its echo on the frame stream, whichever comes first) confirms it in
//! place. Network failures park the message for the next resume; any other
//! failure marks it failed until [`ChatClient::resend_message`].

use chatsync_core::lock::lock;
use chatsync_core::{apply_event, ChannelEvent, Disposition, LocalStore, Outbox, OutboxEntry};
use chatsync_types::{
    ChannelId, ChatError, Command, DeliveryStatus, MarkerList, Message, MessageDraft, MessageEdit,
    MessageId, MessageKey, Reaction, Response, ServerEvent, TempId, MARKER_DISPLAYED,
    MARKER_RECEIVED,
};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{now_ms, unexpected, ChatClient};
use crate::transport::Transport;

/// Parks an in-flight submission if the caller stops waiting for it.
struct InFlight<'a> {
    outbox: &'a Mutex<Outbox>,
    tid: TempId,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(tid = %self.tid, "send abandoned by caller; parked");
            lock(self.outbox).release(&self.tid);
        }
    }
}

impl<T: Transport> ChatClient<T> {
    /// Send a message.
    ///
    /// Returns the stored message: confirmed with status `Sent` when the
    /// server acknowledged it, or still `Pending` when the client is offline
    /// (it goes out on the next resume). Transient messages skip the store
    /// and require a connection.
    pub async fn send_message(
        &self,
        channel_id: &ChannelId,
        draft: MessageDraft,
    ) -> Result<Message, ChatError> {
        if draft.transient {
            return self.send_transient(channel_id, draft).await;
        }

        let tid = TempId::new();
        let pending = {
            let mut outbox = lock(&self.inner.outbox);
            let entry = outbox.enqueue(tid, channel_id.clone(), draft)?;
            entry.pending_message(self.inner.user_id.clone(), now_ms())
        };
        let inserted = self
            .inner
            .dispatcher
            .commit(|store| match store.insert_pending(pending.clone()) {
                Ok(_) => (Ok(()), vec![ChannelEvent::MessagePending(pending)]),
                Err(error) => (Err(error), Vec::new()),
            });
        if let Err(error) = inserted {
            lock(&self.inner.outbox).ack(&tid);
            return Err(error);
        }

        self.submit(tid).await
    }

    async fn send_transient(
        &self,
        channel_id: &ChannelId,
        draft: MessageDraft,
    ) -> Result<Message, ChatError> {
        let response = self
            .inner
            .request(Command::SendMessage {
                channel_id: channel_id.clone(),
                tid: TempId::new(),
                draft,
            })
            .await?;
        match response {
            Response::Message { message } => Ok(message),
            other => Err(unexpected("send_message", &other)),
        }
    }

    /// Resend a failed (or parked) message under its original temporary id.
    ///
    /// The store never holds a second copy: the same pending entry moves
    /// back to `Pending` and is confirmed in place.
    pub async fn resend_message(&self, message: &Message) -> Result<Message, ChatError> {
        let Some(tid) = message.tid else {
            return Err(ChatError::InvalidTransition(
                "message has no temporary id".into(),
            ));
        };
        let stored = self
            .read(|store| store.message(&MessageKey::Temp(tid)).cloned())
            .ok_or_else(|| ChatError::NotFound(format!("message {}", tid)))?;
        if !stored.is_pending() {
            return Err(ChatError::InvalidTransition(format!(
                "message {} already confirmed",
                tid
            )));
        }

        {
            let mut outbox = lock(&self.inner.outbox);
            if outbox.get(&tid).is_none() {
                outbox.enqueue(tid, stored.channel_id.clone(), draft_of(&stored))?;
            }
        }
        if stored.delivery_status == DeliveryStatus::Failed {
            self.inner.dispatcher.commit(|store| {
                let key = MessageKey::Temp(tid);
                let events = match store.set_delivery_status(&key, DeliveryStatus::Pending) {
                    Ok(true) => store
                        .message(&key)
                        .cloned()
                        .map(ChannelEvent::MessagePending)
                        .into_iter()
                        .collect(),
                    _ => Vec::new(),
                };
                ((), events)
            });
        }

        self.submit(tid).await
    }

    /// Submit one outbox entry and settle the result.
    pub(crate) async fn submit(&self, tid: TempId) -> Result<Message, ChatError> {
        if !self.is_connected() {
            debug!(%tid, "offline; send queued until resume");
            return self.stored(tid);
        }

        let entry: OutboxEntry = lock(&self.inner.outbox).begin_submit(&tid)?;
        let guard = InFlight {
            outbox: &self.inner.outbox,
            tid,
            armed: true,
        };
        let result = self
            .inner
            .request(Command::SendMessage {
                channel_id: entry.channel_id,
                tid,
                draft: entry.draft,
            })
            .await;
        guard.disarm();

        let result = match result {
            Ok(Response::Message { message }) => Ok(message),
            Ok(other) => Err(unexpected("send_message", &other)),
            Err(error) => Err(error),
        };
        match result {
            Ok(message) => {
                lock(&self.inner.outbox).ack(&tid);
                self.confirm(tid, message)
            }
            Err(error) => {
                let disposition = lock(&self.inner.outbox).park(&tid, &error);
                match disposition {
                    Disposition::Retry => {
                        info!(%tid, %error, "send parked for retry");
                        self.stored(tid)
                    }
                    Disposition::GiveUp => self.fail(tid, error),
                }
            }
        }
    }

    /// Resubmit every queued or parked send, oldest first. Stops when the
    /// connection goes away again.
    pub(crate) async fn flush_outbox(&self) {
        let ready = lock(&self.inner.outbox).ready();
        if ready.is_empty() {
            return;
        }
        info!(count = ready.len(), "resubmitting queued messages");
        for tid in ready {
            if let Err(error) = self.submit(tid).await {
                debug!(%tid, %error, "queued send not delivered");
            }
            if !self.is_connected() {
                break;
            }
        }
    }

    fn stored(&self, tid: TempId) -> Result<Message, ChatError> {
        self.read(|store| store.message(&MessageKey::Temp(tid)).cloned())
            .ok_or_else(|| ChatError::NotFound(format!("message {}", tid)))
    }

    fn confirm(&self, tid: TempId, server: Message) -> Result<Message, ChatError> {
        self.inner.dispatcher.commit(|store| {
            let was_pending = store
                .message(&MessageKey::Temp(tid))
                .is_some_and(Message::is_pending);
            let key = match store.confirm_message(tid, server) {
                Ok(key) => key,
                Err(error) => return (Err(error), Vec::new()),
            };
            let Some(message) = store.message(&key).cloned() else {
                return (Err(ChatError::NotFound(format!("message {}", key))), Vec::new());
            };
            // The echo may have confirmed it already.
            let events = if was_pending {
                vec![ChannelEvent::MessageSent {
                    tid,
                    message: message.clone(),
                }]
            } else {
                Vec::new()
            };
            (Ok(message), events)
        })
    }

    fn fail(&self, tid: TempId, error: ChatError) -> Result<Message, ChatError> {
        warn!(%tid, %error, "send failed");
        self.inner.dispatcher.commit(|store| {
            let key = MessageKey::Temp(tid);
            let events = match store.set_delivery_status(&key, DeliveryStatus::Failed) {
                Ok(true) => store
                    .message(&key)
                    .cloned()
                    .map(|message| ChannelEvent::MessageFailed { tid, message })
                    .into_iter()
                    .collect(),
                _ => Vec::new(),
            };
            ((), events)
        });
        Err(error)
    }

    /// Edit a confirmed message.
    pub async fn edit_message(
        &self,
        key: &MessageKey,
        edit: MessageEdit,
    ) -> Result<Message, ChatError> {
        let (channel_id, message_id) = self.server_ref(key)?;
        let response = self
            .inner
            .request(Command::EditMessage {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
                edit,
            })
            .await?;
        let Response::Message { message } = response else {
            return Err(unexpected("edit_message", &response));
        };
        self.inner.dispatcher.apply(ServerEvent::MessageEdited {
            channel_id,
            message: message.clone(),
        });
        Ok(self
            .read(|store| store.message_by_id(&message_id).cloned())
            .unwrap_or(message))
    }

    /// Delete a confirmed message. The message stays in the timeline as a
    /// tombstone.
    pub async fn delete_message(&self, key: &MessageKey) -> Result<(), ChatError> {
        let (channel_id, message_id) = self.server_ref(key)?;
        let response = self
            .inner
            .request(Command::DeleteMessage {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
            })
            .await?;
        match response {
            Response::Ack | Response::Message { .. } => {
                self.inner.dispatcher.apply(ServerEvent::MessageDeleted {
                    channel_id,
                    message_id,
                });
                Ok(())
            }
            other => Err(unexpected("delete_message", &other)),
        }
    }

    /// React to a confirmed message.
    ///
    /// With `enforce_unique` the user's other reactions on the message are
    /// replaced by this one.
    pub async fn add_reaction(
        &self,
        key: &MessageKey,
        reaction_key: &str,
        score: i64,
        reason: Option<String>,
        enforce_unique: bool,
    ) -> Result<Reaction, ChatError> {
        let (channel_id, message_id) = self.server_ref(key)?;
        let response = self
            .inner
            .request(Command::AddReaction {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
                key: reaction_key.to_string(),
                score,
                reason,
                enforce_unique,
            })
            .await?;
        let Response::Reaction { message, reaction } = response else {
            return Err(unexpected("add_reaction", &response));
        };

        let me = self.inner.user_id.clone();
        let added = reaction.clone();
        self.inner.dispatcher.commit(|store| {
            if store.message_by_id(&message_id).is_none() {
                let _ = store.upsert_message(message);
            }
            let mut events = Vec::new();
            if enforce_unique {
                let replaced: Vec<Reaction> = store
                    .reactions(&message_id)
                    .into_iter()
                    .filter(|r| r.user_id == me && r.key != added.key)
                    .cloned()
                    .collect();
                for reaction in replaced {
                    events.extend(apply_event(
                        store,
                        ServerEvent::ReactionDeleted {
                            channel_id: channel_id.clone(),
                            reaction,
                        },
                    ));
                }
            }
            events.extend(apply_event(
                store,
                ServerEvent::ReactionAdded {
                    channel_id: channel_id.clone(),
                    reaction: added,
                },
            ));
            ((), events)
        });
        Ok(reaction)
    }

    /// Remove the user's reaction with `reaction_key` from a message.
    pub async fn delete_reaction(
        &self,
        key: &MessageKey,
        reaction_key: &str,
    ) -> Result<(), ChatError> {
        let (channel_id, message_id) = self.server_ref(key)?;
        self.inner
            .request(Command::DeleteReaction {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
                key: reaction_key.to_string(),
            })
            .await?;

        let me = self.inner.user_id.clone();
        self.inner.dispatcher.commit(|store| {
            let mine = store
                .reactions(&message_id)
                .into_iter()
                .find(|r| r.user_id == me && r.key == reaction_key)
                .cloned();
            let events = match mine {
                Some(reaction) => apply_event(
                    store,
                    ServerEvent::ReactionDeleted {
                        channel_id,
                        reaction,
                    },
                ),
                None => Vec::new(),
            };
            ((), events)
        });
        Ok(())
    }

    /// Set a marker on messages on behalf of the current user.
    pub async fn mark_messages(
        &self,
        channel_id: &ChannelId,
        message_ids: Vec<MessageId>,
        marker: &str,
    ) -> Result<(), ChatError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        self.inner
            .request(Command::MarkMessages {
                channel_id: channel_id.clone(),
                message_ids: message_ids.clone(),
                marker: marker.to_string(),
            })
            .await?;
        self.inner.dispatcher.apply(ServerEvent::MarkersReceived {
            channel_id: channel_id.clone(),
            markers: MarkerList {
                message_ids,
                name: marker.to_string(),
                user_id: self.inner.user_id.clone(),
                created_at: now_ms(),
            },
        });
        Ok(())
    }

    /// Mark messages as displayed. They stop counting as unread.
    pub async fn mark_displayed(
        &self,
        channel_id: &ChannelId,
        message_ids: Vec<MessageId>,
    ) -> Result<(), ChatError> {
        self.mark_messages(channel_id, message_ids, MARKER_DISPLAYED)
            .await
    }

    /// Mark messages as received.
    pub async fn mark_received(
        &self,
        channel_id: &ChannelId,
        message_ids: Vec<MessageId>,
    ) -> Result<(), ChatError> {
        self.mark_messages(channel_id, message_ids, MARKER_RECEIVED)
            .await
    }

    /// Tell channel members the user started typing.
    pub async fn start_typing(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.typing(channel_id, true).await
    }

    /// Tell channel members the user stopped typing.
    pub async fn stop_typing(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.typing(channel_id, false).await
    }

    async fn typing(&self, channel_id: &ChannelId, started: bool) -> Result<(), ChatError> {
        self.inner
            .request(Command::Typing {
                channel_id: channel_id.clone(),
                started,
            })
            .await?;
        Ok(())
    }

    /// Channel and server id of a message, for operations the server only
    /// accepts on confirmed messages.
    fn server_ref(&self, key: &MessageKey) -> Result<(ChannelId, MessageId), ChatError> {
        self.read(|store| server_ref(store, key))
    }
}

fn server_ref(store: &LocalStore, key: &MessageKey) -> Result<(ChannelId, MessageId), ChatError> {
    let resolved = store
        .resolve(key)
        .ok_or_else(|| ChatError::NotFound(format!("message {}", key)))?;
    let message = store
        .message(&resolved)
        .ok_or_else(|| ChatError::NotFound(format!("message {}", key)))?;
    match resolved {
        MessageKey::Temp(tid) => Err(ChatError::Unresolved(tid.to_string())),
        MessageKey::Server(_) if message.is_deleted() => Err(ChatError::Conflict(format!(
            "message {} is deleted",
            key
        ))),
        MessageKey::Server(id) => Ok((message.channel_id.clone(), id)),
    }
}

/// Rebuild the draft a pending message was created from.
fn draft_of(message: &Message) -> MessageDraft {
    MessageDraft {
        body: message.body.clone(),
        kind: message.kind.clone(),
        metadata: message.metadata.clone(),
        attachments: message.attachments.clone(),
        mentioned_user_ids: message.mentioned_user_ids.clone(),
        parent_id: message.parent_id.clone(),
        reply_in_thread: message.reply_in_thread,
        forwarding_message_id: message.forwarding.as_ref().map(|f| f.message_id.clone()),
        transient: message.transient,
        silent: message.silent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::{MockTransport, TransportError};
    use chatsync_core::ListenerScope;
    use chatsync_types::{Channel, UserId};
    use std::sync::Arc;
    use std::sync::Mutex as TestMutex;

    fn channel(id: &str) -> Channel {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "details": { "type": "Private", "subject": "team" },
        }))
        .unwrap()
    }

    fn server_message(id: &str, tid: Option<TempId>, body: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "key": { "kind": "server", "id": id },
            "tid": tid,
            "channel_id": "c1",
            "sender": "me",
            "body": body,
            "created_at": 100,
            "delivery_status": "Sent",
        }))
        .unwrap()
    }

    async fn connected() -> ChatClient<MockTransport> {
        let config = ClientConfig::new("wss://chat.test")
            .with_auto_mark_delivered(false)
            .with_max_send_attempts(2);
        let client = ChatClient::new(config, MockTransport::new(), UserId::new("me"));
        client
            .inner
            .dispatcher
            .apply(ServerEvent::ChannelCreated {
                channel: channel("c1"),
            });
        client.connect("token").await.unwrap();
        client
    }

    fn events(client: &ChatClient<MockTransport>) -> Arc<TestMutex<Vec<ChannelEvent>>> {
        let seen = Arc::new(TestMutex::new(Vec::new()));
        let log = seen.clone();
        client.add_channel_listener(
            "events",
            ListenerScope::All,
            Arc::new(move |e: &ChannelEvent| log.lock().unwrap().push(e.clone())),
        );
        seen
    }

    fn c1() -> ChannelId {
        ChannelId::new("c1")
    }

    // ===========================================
    // Send Tests
    // ===========================================

    #[tokio::test]
    async fn send_confirms_in_place() {
        let client = connected().await;
        let seen = events(&client);
        // The mock echoes whatever tid the command carried.
        client.transport().queue_response(
            "send_message",
            Response::Message {
                message: server_message("m1", None, "hi"),
            },
        );

        let sent = client
            .send_message(&c1(), MessageDraft::text("hi"))
            .await
            .unwrap();

        assert_eq!(sent.key, MessageKey::Server(MessageId::new("m1")));
        assert_eq!(sent.delivery_status, DeliveryStatus::Sent);
        assert_eq!(client.read(|s| s.timeline(&c1()).len()), 1);
        assert_eq!(client.outbox_len(), 0);

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], ChannelEvent::MessagePending(_)));
        assert!(seen
            .iter()
            .any(|e| matches!(e, ChannelEvent::MessageSent { .. })));
    }

    #[tokio::test]
    async fn offline_send_stays_pending() {
        let config = ClientConfig::new("wss://chat.test");
        let client = ChatClient::new(config, MockTransport::new(), UserId::new("me"));

        let sent = client
            .send_message(&c1(), MessageDraft::text("later"))
            .await
            .unwrap();

        assert!(sent.is_pending());
        assert_eq!(sent.delivery_status, DeliveryStatus::Pending);
        assert_eq!(client.outbox_len(), 1);
        assert!(client.transport().sent_commands().is_empty());
    }

    #[tokio::test]
    async fn network_failure_parks_without_failing() {
        let client = connected().await;
        client
            .transport()
            .queue_error("send_message", TransportError::Timeout);

        let sent = client
            .send_message(&c1(), MessageDraft::text("hi"))
            .await
            .unwrap();

        assert_eq!(sent.delivery_status, DeliveryStatus::Pending);
        assert_eq!(client.outbox_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_reconnects_and_resubmits() {
        let client = connected().await;
        client
            .transport()
            .queue_error("send_message", TransportError::Timeout);
        client.transport().queue_response(
            "send_message",
            Response::Message {
                message: server_message("m1", None, "hi"),
            },
        );

        let parked = client
            .send_message(&c1(), MessageDraft::text("hi"))
            .await
            .unwrap();
        assert_eq!(parked.delivery_status, DeliveryStatus::Pending);
        assert!(!client.is_connected());

        tokio::time::sleep(std::time::Duration::from_secs(40)).await;

        assert!(client.is_connected());
        assert_eq!(client.transport().connect_count(), 2);
        assert_eq!(client.outbox_len(), 0);
        let status = client.read(|s| {
            s.message(&MessageKey::Temp(parked.tid.unwrap()))
                .map(|m| m.delivery_status)
        });
        assert_eq!(status, Some(DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn conflict_fails_immediately() {
        let client = connected().await;
        let seen = events(&client);
        client.transport().queue_error(
            "send_message",
            TransportError::Conflict("channel frozen".into()),
        );

        let result = client.send_message(&c1(), MessageDraft::text("hi")).await;

        assert_eq!(result, Err(ChatError::Conflict("channel frozen".into())));
        assert_eq!(client.outbox_len(), 0);
        let failed = client.read(|s| s.timeline(&c1())[0].delivery_status);
        assert_eq!(failed, DeliveryStatus::Failed);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ChannelEvent::MessageFailed { .. })));
    }

    #[tokio::test]
    async fn resend_reuses_temporary_id() {
        let client = connected().await;
        client
            .transport()
            .queue_error("send_message", TransportError::Conflict("busy".into()));
        let _ = client.send_message(&c1(), MessageDraft::text("hi")).await;
        let failed = client.read(|s| s.timeline(&c1())[0].clone());
        let tid = failed.tid.unwrap();

        client.transport().queue_response(
            "send_message",
            Response::Message {
                message: server_message("m1", Some(tid), "hi"),
            },
        );
        let sent = client.resend_message(&failed).await.unwrap();

        assert_eq!(sent.tid, Some(tid));
        assert_eq!(sent.delivery_status, DeliveryStatus::Sent);
        assert_eq!(client.read(|s| s.timeline(&c1()).len()), 1);
        let tids: Vec<TempId> = client
            .transport()
            .sent_named("send_message")
            .into_iter()
            .filter_map(|c| match c {
                Command::SendMessage { tid, .. } => Some(tid),
                _ => None,
            })
            .collect();
        assert_eq!(tids, vec![tid, tid]);
    }

    #[tokio::test]
    async fn resend_of_confirmed_message_is_refused() {
        let client = connected().await;
        client.transport().queue_response(
            "send_message",
            Response::Message {
                message: server_message("m1", None, "hi"),
            },
        );
        let sent = client
            .send_message(&c1(), MessageDraft::text("hi"))
            .await
            .unwrap();

        let result = client.resend_message(&sent).await;
        assert!(matches!(result, Err(ChatError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn transient_message_is_not_stored() {
        let client = connected().await;
        let mut draft = MessageDraft::text("ping");
        draft.transient = true;

        client.send_message(&c1(), draft).await.unwrap_err();

        assert_eq!(client.read(|s| s.message_count()), 0);
        assert_eq!(client.outbox_len(), 0);
    }

    #[tokio::test]
    async fn abandoned_send_is_parked_not_failed() {
        let client = connected().await;
        client
            .transport()
            .delay_responses(std::time::Duration::from_secs(60));

        let c1_id = c1();
        let send = client.send_message(&c1_id, MessageDraft::text("hi"));
        let result = tokio::time::timeout(std::time::Duration::from_millis(10), send).await;
        assert!(result.is_err());

        let stored = client.read(|s| s.timeline(&c1())[0].delivery_status);
        assert_eq!(stored, DeliveryStatus::Pending);
        assert_eq!(client.outbox_len(), 1);
        let tid = client.read(|s| s.timeline(&c1())[0].tid.unwrap());
        assert!(!lock(&client.inner.outbox).is_in_flight(&tid));
    }

    // ===========================================
    // Edit, Delete and Reaction Tests
    // ===========================================

    async fn with_confirmed(client: &ChatClient<MockTransport>) -> MessageKey {
        client.transport().queue_response(
            "send_message",
            Response::Message {
                message: server_message("m1", None, "hi"),
            },
        );
        client
            .send_message(&c1(), MessageDraft::text("hi"))
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn edit_of_pending_message_is_unresolved() {
        let config = ClientConfig::new("wss://chat.test");
        let client = ChatClient::new(config, MockTransport::new(), UserId::new("me"));
        let pending = client
            .send_message(&c1(), MessageDraft::text("draft"))
            .await
            .unwrap();

        let result = client
            .edit_message(&pending.key, MessageEdit::default())
            .await;
        assert!(matches!(result, Err(ChatError::Unresolved(_))));
    }

    #[tokio::test]
    async fn edit_updates_store() {
        let client = connected().await;
        let key = with_confirmed(&client).await;
        client.transport().queue_response(
            "edit_message",
            Response::Message {
                message: server_message("m1", None, "hello"),
            },
        );

        let edit = MessageEdit {
            body: Some("hello".into()),
            ..MessageEdit::default()
        };
        let edited = client.edit_message(&key, edit).await.unwrap();

        assert_eq!(edited.body, "hello");
    }

    #[tokio::test]
    async fn deleted_message_cannot_be_edited() {
        let client = connected().await;
        let key = with_confirmed(&client).await;
        client.delete_message(&key).await.unwrap();

        let result = client.edit_message(&key, MessageEdit::default()).await;
        assert!(matches!(result, Err(ChatError::Conflict(_))));
        assert!(client.read(|s| s.message(&key).unwrap().is_deleted()));
    }

    fn reaction(key: &str) -> Reaction {
        Reaction {
            message_id: MessageId::new("m1"),
            key: key.to_string(),
            score: 1,
            reason: None,
            user_id: UserId::new("me"),
            updated_at: 5,
        }
    }

    #[tokio::test]
    async fn unique_reaction_replaces_previous() {
        let client = connected().await;
        let key = with_confirmed(&client).await;
        for k in ["👍", "🎉"] {
            client.transport().queue_response(
                "add_reaction",
                Response::Reaction {
                    message: server_message("m1", None, "hi"),
                    reaction: reaction(k),
                },
            );
        }

        client.add_reaction(&key, "👍", 1, None, false).await.unwrap();
        client.add_reaction(&key, "🎉", 1, None, true).await.unwrap();

        let keys: Vec<String> = client.read(|s| {
            s.reactions(&MessageId::new("m1"))
                .into_iter()
                .map(|r| r.key.clone())
                .collect()
        });
        assert_eq!(keys, vec!["🎉".to_string()]);
        let totals = client.read(|s| s.message(&key).unwrap().reaction_totals.clone());
        assert_eq!(totals.get("👍"), None);
        assert_eq!(totals.get("🎉"), Some(&1));
    }

    #[tokio::test]
    async fn delete_reaction_removes_own_entry() {
        let client = connected().await;
        let key = with_confirmed(&client).await;
        client.transport().queue_response(
            "add_reaction",
            Response::Reaction {
                message: server_message("m1", None, "hi"),
                reaction: reaction("👍"),
            },
        );
        client.add_reaction(&key, "👍", 1, None, false).await.unwrap();

        client.delete_reaction(&key, "👍").await.unwrap();

        assert!(client.read(|s| s.reactions(&MessageId::new("m1")).is_empty()));
    }

    // ===========================================
    // Marker Tests
    // ===========================================

    #[tokio::test]
    async fn displayed_marker_records_own_marker() {
        let client = connected().await;
        client.inner.dispatcher.apply(ServerEvent::MessageReceived {
            channel_id: c1(),
            message: serde_json::from_value(serde_json::json!({
                "key": { "kind": "server", "id": "m7" },
                "channel_id": "c1",
                "sender": "bob",
                "created_at": 100,
            }))
            .unwrap(),
            user: None,
        });
        assert_eq!(client.channel_unreads(&c1()).messages, 1);

        client
            .mark_displayed(&c1(), vec![MessageId::new("m7")])
            .await
            .unwrap();

        assert_eq!(client.channel_unreads(&c1()).messages, 0);
        assert_eq!(client.transport().sent_named("mark_messages").len(), 1);
    }

    #[tokio::test]
    async fn empty_marker_list_sends_nothing() {
        let client = connected().await;
        client.mark_received(&c1(), Vec::new()).await.unwrap();
        assert!(client.transport().sent_named("mark_messages").is_empty());
    }
}
