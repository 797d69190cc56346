//! Applying server events to the local store.

use chatsync_types::{
    ChannelDetails, ChannelId, MessageKey, ServerEvent, TimedFlag, UserId,
};
use tracing::{debug, trace};

use crate::listener::ChannelEvent;
use crate::store::LocalStore;

/// Apply one server event and return the notifications it produces.
///
/// Events about channels the store does not know are dropped, except
/// channel creation and updates which carry the full record. Transient
/// messages are announced but never stored. Typing notices are passed
/// through. Session events belong to the connection and yield nothing here.
pub fn apply_event(store: &mut LocalStore, event: ServerEvent) -> Vec<ChannelEvent> {
    trace!(?event, "applying server event");
    match event {
        ServerEvent::ChannelCreated { channel } | ServerEvent::ChannelUpdated { channel } => {
            let channel_id = channel.id.clone();
            let created = store.upsert_channel(channel);
            let Some(stored) = store.channel(&channel_id).cloned() else {
                return Vec::new();
            };
            if created {
                vec![ChannelEvent::Created(stored)]
            } else {
                vec![ChannelEvent::Updated(stored)]
            }
        }
        ServerEvent::ChannelDeleted { channel_id } => match store.remove_channel(&channel_id) {
            Some(_) => vec![ChannelEvent::Deleted(channel_id)],
            None => Vec::new(),
        },
        ServerEvent::ChannelHidden { channel_id } => flag(store, channel_id, ChannelEvent::Hidden, |c| {
            c.hidden = TimedFlag::on(None)
        }),
        ServerEvent::ChannelShown { channel_id } => flag(store, channel_id, ChannelEvent::Shown, |c| {
            c.hidden = TimedFlag::off()
        }),
        ServerEvent::ChannelMuted {
            channel_id,
            expires_at,
        } => flag(store, channel_id, ChannelEvent::Muted, |c| {
            c.muted = TimedFlag::on(expires_at)
        }),
        ServerEvent::ChannelUnmuted { channel_id } => flag(store, channel_id, ChannelEvent::Unmuted, |c| {
            c.muted = TimedFlag::off()
        }),
        ServerEvent::ChannelBlocked { channel_id } => flag(store, channel_id, ChannelEvent::Blocked, |c| {
            c.blocked = true
        }),
        ServerEvent::ChannelUnblocked { channel_id } => {
            flag(store, channel_id, ChannelEvent::Unblocked, |c| c.blocked = false)
        }
        ServerEvent::ChannelMarkedAsUnread { channel_id } => {
            flag(store, channel_id, ChannelEvent::MarkedAsUnread, |c| {
                c.marked_as_unread = true
            })
        }
        ServerEvent::HistoryCleared { channel_id } => match store.clear_history(&channel_id) {
            Ok(()) => vec![ChannelEvent::HistoryCleared(channel_id)],
            Err(e) => skipped(&channel_id, e),
        },

        ServerEvent::MembersAdded {
            channel_id,
            members,
        } => {
            if store.channel(&channel_id).is_none() {
                return unknown(&channel_id);
            }
            for entry in &members {
                store.upsert_member(&channel_id, entry.clone());
            }
            vec![ChannelEvent::MembersAdded {
                channel_id,
                members,
            }]
        }
        ServerEvent::MemberJoined { channel_id, member } => {
            if store.channel(&channel_id).is_none() {
                return unknown(&channel_id);
            }
            store.upsert_member(&channel_id, member.clone());
            vec![ChannelEvent::MemberJoined { channel_id, member }]
        }
        ServerEvent::MemberLeft {
            channel_id,
            user_id,
        } => {
            let mut events = vec![ChannelEvent::MemberLeft {
                channel_id: channel_id.clone(),
                user_id: user_id.clone(),
            }];
            events.extend(remove_members(store, &channel_id, std::slice::from_ref(&user_id)));
            events
        }
        ServerEvent::MembersKicked {
            channel_id,
            user_ids,
        } => {
            let mut events = vec![ChannelEvent::MembersKicked {
                channel_id: channel_id.clone(),
                user_ids: user_ids.clone(),
            }];
            events.extend(remove_members(store, &channel_id, &user_ids));
            events
        }
        ServerEvent::MembersRoleChanged {
            channel_id,
            members,
        } => {
            if store.channel(&channel_id).is_none() {
                return unknown(&channel_id);
            }
            for entry in &members {
                if is_me(store, &entry.user.id) {
                    set_my_role(store, &channel_id, &entry.role);
                }
                store.upsert_member(&channel_id, entry.clone());
            }
            vec![ChannelEvent::MembersRoleChanged {
                channel_id,
                members,
            }]
        }
        ServerEvent::MembersBlocked {
            channel_id,
            user_ids,
        } => {
            for user_id in &user_ids {
                let _ = store.update_member(&channel_id, user_id, |m| m.blocked = true);
            }
            vec![ChannelEvent::MembersBlocked {
                channel_id,
                user_ids,
            }]
        }
        ServerEvent::MembersUnblocked {
            channel_id,
            user_ids,
        } => {
            for user_id in &user_ids {
                let _ = store.update_member(&channel_id, user_id, |m| m.blocked = false);
            }
            vec![ChannelEvent::MembersUnblocked {
                channel_id,
                user_ids,
            }]
        }
        ServerEvent::OwnerChanged {
            channel_id,
            new_owner,
            old_owner,
        } => {
            if store.channel(&channel_id).is_none() {
                return unknown(&channel_id);
            }
            if let Some(old) = &old_owner {
                if is_me(store, old) {
                    set_my_role(store, &channel_id, "admin");
                }
                let _ = store.update_member(&channel_id, old, |m| {
                    if m.role == "owner" {
                        m.role = "admin".into();
                    }
                });
            }
            if is_me(store, &new_owner.user.id) {
                set_my_role(store, &channel_id, "owner");
            }
            store.upsert_member(&channel_id, new_owner.clone());
            vec![ChannelEvent::OwnerChanged {
                channel_id,
                new_owner,
                old_owner,
            }]
        }

        ServerEvent::MessageReceived {
            channel_id,
            message,
            user,
        } => {
            if let Some(user) = user {
                store.upsert_user(user);
            }
            if message.transient {
                return vec![ChannelEvent::MessageReceived(message)];
            }
            let echo = message
                .tid
                .filter(|tid| store.message(&MessageKey::Temp(*tid)).is_some());
            let fresh = message
                .server_id()
                .is_some_and(|id| store.message_by_id(id).is_none());
            let parent = message.parent_id.clone().filter(|_| message.reply_in_thread);

            let key = match store.upsert_message(message) {
                Ok(key) => key,
                Err(e) => return skipped(&channel_id, e),
            };
            if fresh && echo.is_none() {
                if let Some(parent) = parent {
                    let _ = store.update_message(&MessageKey::Server(parent), |p| {
                        p.reply_count += 1
                    });
                }
            }
            let Some(stored) = store.message(&key).cloned() else {
                return Vec::new();
            };
            match echo {
                Some(tid) => vec![ChannelEvent::MessageSent {
                    tid,
                    message: stored,
                }],
                None => vec![ChannelEvent::MessageReceived(stored)],
            }
        }
        ServerEvent::MessageEdited {
            channel_id,
            message,
        } => match store.upsert_message(message) {
            Ok(key) => store
                .message(&key)
                .cloned()
                .map(|m| vec![ChannelEvent::MessageEdited(m)])
                .unwrap_or_default(),
            Err(e) => skipped(&channel_id, e),
        },
        ServerEvent::MessageDeleted {
            channel_id,
            message_id,
        } => match store.delete_message(&message_id) {
            Ok(()) => vec![ChannelEvent::MessageDeleted {
                channel_id,
                message_id,
            }],
            Err(e) => skipped(&channel_id, e),
        },

        ServerEvent::ReactionAdded {
            channel_id,
            reaction,
        } => {
            if !store.add_reaction(&channel_id, reaction.clone()) {
                return Vec::new();
            }
            let message = store.message_by_id(&reaction.message_id).cloned();
            vec![ChannelEvent::ReactionAdded {
                channel_id,
                message,
                reaction,
            }]
        }
        ServerEvent::ReactionDeleted {
            channel_id,
            reaction,
        } => {
            let removed = store.remove_reaction(
                &channel_id,
                &reaction.message_id,
                &reaction.key,
                &reaction.user_id,
            );
            if !removed {
                return Vec::new();
            }
            let message = store.message_by_id(&reaction.message_id).cloned();
            vec![ChannelEvent::ReactionDeleted {
                channel_id,
                message,
                reaction,
            }]
        }
        ServerEvent::MarkersReceived {
            channel_id,
            markers,
        } => {
            let advanced = store.apply_markers(&channel_id, &markers);
            let mut events = vec![ChannelEvent::MarkersReceived {
                channel_id: channel_id.clone(),
                markers,
            }];
            for key in advanced {
                if let Some(message) = store.message(&key) {
                    events.push(ChannelEvent::DeliveryStatusChanged {
                        channel_id: channel_id.clone(),
                        status: message.delivery_status,
                        key,
                    });
                }
            }
            events
        }

        ServerEvent::TypingStarted {
            channel_id,
            user_id,
        } => vec![ChannelEvent::TypingStarted {
            channel_id,
            user_id,
        }],
        ServerEvent::TypingStopped {
            channel_id,
            user_id,
        } => vec![ChannelEvent::TypingStopped {
            channel_id,
            user_id,
        }],
        ServerEvent::UserUpdated { user } => {
            let user_id = user.id.clone();
            store.upsert_user(user);
            store
                .user(&user_id)
                .cloned()
                .map(|u| vec![ChannelEvent::UserUpdated(u)])
                .unwrap_or_default()
        }

        ServerEvent::TokenWillExpire { .. } | ServerEvent::TokenExpired {} => Vec::new(),
    }
}

fn flag<F>(
    store: &mut LocalStore,
    channel_id: ChannelId,
    event: fn(ChannelId) -> ChannelEvent,
    mutate: F,
) -> Vec<ChannelEvent>
where
    F: FnOnce(&mut chatsync_types::Channel),
{
    match store.update_channel(&channel_id, mutate) {
        Ok(()) => vec![event(channel_id)],
        Err(e) => skipped(&channel_id, e),
    }
}

/// Remove members; losing the current user's membership removes the channel.
fn remove_members(
    store: &mut LocalStore,
    channel_id: &ChannelId,
    user_ids: &[UserId],
) -> Vec<ChannelEvent> {
    let mut left = false;
    for user_id in user_ids {
        store.remove_member(channel_id, user_id);
        left |= is_me(store, user_id);
    }
    if left && store.remove_channel(channel_id).is_some() {
        debug!(%channel_id, "current user removed from channel");
        return vec![ChannelEvent::Deleted(channel_id.clone())];
    }
    Vec::new()
}

fn is_me(store: &LocalStore, user_id: &UserId) -> bool {
    store.current_user() == Some(user_id)
}

fn set_my_role(store: &mut LocalStore, channel_id: &ChannelId, role: &str) {
    let _ = store.update_channel(channel_id, |c| match &mut c.details {
        ChannelDetails::Private { my_role, .. } | ChannelDetails::Public { my_role, .. } => {
            *my_role = Some(role.to_string());
        }
        ChannelDetails::Direct { .. } => {}
    });
}

fn unknown(channel_id: &ChannelId) -> Vec<ChannelEvent> {
    debug!(%channel_id, "event for unknown channel dropped");
    Vec::new()
}

fn skipped(channel_id: &ChannelId, error: chatsync_types::ChatError) -> Vec<ChannelEvent> {
    debug!(%channel_id, %error, "server event not applied");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{channel, message};
    use chatsync_types::{
        DeliveryStatus, MarkerList, MemberEntry, MessageDraft, MessageId, Reaction, TempId, User,
        MARKER_DISPLAYED,
    };

    fn store() -> LocalStore {
        let mut store = LocalStore::new();
        store.set_current_user(UserId::new("me"));
        store.upsert_channel(channel("c1"));
        store
    }

    fn c1() -> ChannelId {
        ChannelId::new("c1")
    }

    fn entry(user: &str, role: &str) -> MemberEntry {
        MemberEntry {
            user: User::new(UserId::new(user)),
            role: role.into(),
            blocked: false,
        }
    }

    // ===========================================
    // Channel Events
    // ===========================================

    #[test]
    fn channel_created_then_updated() {
        let mut store = LocalStore::new();
        let events = apply_event(&mut store, ServerEvent::ChannelCreated { channel: channel("c9") });
        assert!(matches!(events.as_slice(), [ChannelEvent::Created(_)]));

        let events = apply_event(&mut store, ServerEvent::ChannelUpdated { channel: channel("c9") });
        assert!(matches!(events.as_slice(), [ChannelEvent::Updated(_)]));
    }

    #[test]
    fn flags_on_unknown_channel_are_dropped() {
        let mut store = store();
        let events = apply_event(
            &mut store,
            ServerEvent::ChannelHidden {
                channel_id: ChannelId::new("nope"),
            },
        );
        assert!(events.is_empty());
    }

    #[test]
    fn mute_sets_timed_flag() {
        let mut store = store();
        apply_event(
            &mut store,
            ServerEvent::ChannelMuted {
                channel_id: c1(),
                expires_at: Some(500),
            },
        );
        assert_eq!(store.channel(&c1()).unwrap().muted, TimedFlag::on(Some(500)));
    }

    // ===========================================
    // Member Events
    // ===========================================

    #[test]
    fn kicking_current_user_removes_channel() {
        let mut store = store();
        store.upsert_member(&c1(), entry("me", "member"));
        let events = apply_event(
            &mut store,
            ServerEvent::MembersKicked {
                channel_id: c1(),
                user_ids: vec![UserId::new("me")],
            },
        );
        assert!(events.contains(&ChannelEvent::Deleted(c1())));
        assert!(store.channel(&c1()).is_none());
    }

    #[test]
    fn owner_change_demotes_old_owner() {
        let mut store = store();
        store.upsert_member(&c1(), entry("alice", "owner"));
        apply_event(
            &mut store,
            ServerEvent::OwnerChanged {
                channel_id: c1(),
                new_owner: entry("me", "owner"),
                old_owner: Some(UserId::new("alice")),
            },
        );
        assert_eq!(store.member(&c1(), &UserId::new("alice")).unwrap().role, "admin");
        assert_eq!(store.member(&c1(), &UserId::new("me")).unwrap().role, "owner");
    }

    // ===========================================
    // Message Events
    // ===========================================

    #[test]
    fn echo_of_pending_send_confirms_it() {
        let mut store = store();
        let tid = TempId::new();
        let mut pending = crate::outbox::OutboxEntry {
            tid,
            channel_id: c1(),
            draft: MessageDraft::text("hello"),
            attempts: 1,
            state: crate::outbox::OutboxState::InFlight,
        }
        .pending_message(UserId::new("me"), 10);
        pending.delivery_status = DeliveryStatus::Pending;
        store.insert_pending(pending).unwrap();

        let mut echo = message("c1", "m1", "me", 11);
        echo.tid = Some(tid);
        let events = apply_event(
            &mut store,
            ServerEvent::MessageReceived {
                channel_id: c1(),
                message: echo,
                user: None,
            },
        );

        assert!(matches!(events.as_slice(), [ChannelEvent::MessageSent { .. }]));
        assert_eq!(store.timeline(&c1()).len(), 1);
        assert_eq!(
            store.resolve(&MessageKey::Temp(tid)),
            Some(MessageKey::Server(MessageId::new("m1")))
        );
    }

    #[test]
    fn transient_message_is_not_stored() {
        let mut store = store();
        let mut m = message("c1", "m1", "bob", 10);
        m.transient = true;
        let events = apply_event(
            &mut store,
            ServerEvent::MessageReceived {
                channel_id: c1(),
                message: m,
                user: None,
            },
        );
        assert_eq!(events.len(), 1);
        assert_eq!(store.message_count(), 0);
    }

    #[test]
    fn thread_reply_bumps_parent_count() {
        let mut store = store();
        store.upsert_message(message("c1", "m1", "bob", 10)).unwrap();
        let mut reply = message("c1", "r1", "bob", 20);
        reply.parent_id = Some(MessageId::new("m1"));
        reply.reply_in_thread = true;
        let event = ServerEvent::MessageReceived {
            channel_id: c1(),
            message: reply,
            user: None,
        };
        apply_event(&mut store, event.clone());
        // Redelivery does not count twice
        apply_event(&mut store, event);
        assert_eq!(store.message_by_id(&MessageId::new("m1")).unwrap().reply_count, 1);
    }

    #[test]
    fn displayed_marker_from_peer_advances_status() {
        let mut store = store();
        store.upsert_message(message("c1", "m1", "me", 10)).unwrap();
        let events = apply_event(
            &mut store,
            ServerEvent::MarkersReceived {
                channel_id: c1(),
                markers: MarkerList {
                    message_ids: vec![MessageId::new("m1")],
                    name: MARKER_DISPLAYED.into(),
                    user_id: UserId::new("bob"),
                    created_at: 20,
                },
            },
        );
        assert!(events.iter().any(|e| matches!(
            e,
            ChannelEvent::DeliveryStatusChanged {
                status: DeliveryStatus::Read,
                ..
            }
        )));
    }

    #[test]
    fn duplicate_reaction_yields_no_event() {
        let mut store = store();
        store.upsert_message(message("c1", "m1", "me", 10)).unwrap();
        let event = ServerEvent::ReactionAdded {
            channel_id: c1(),
            reaction: Reaction {
                message_id: MessageId::new("m1"),
                key: "+1".into(),
                score: 1,
                reason: None,
                user_id: UserId::new("bob"),
                updated_at: 11,
            },
        };
        assert_eq!(apply_event(&mut store, event.clone()).len(), 1);
        assert!(apply_event(&mut store, event).is_empty());
    }

    #[test]
    fn session_events_are_ignored() {
        let mut store = store();
        assert!(apply_event(&mut store, ServerEvent::TokenExpired {}).is_empty());
    }
}
