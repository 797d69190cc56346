//! Channel and membership operations.
//!
//! Every operation is a request to the service followed by the matching
//! server event applied locally, so listeners see the same notifications
//! whether a change was made here or on another device.

use chatsync_core::lock::lock;
use chatsync_core::{apply_event, ChannelEvent};
use chatsync_types::{
    Channel, ChannelAction, ChannelDraft, ChannelId, ChannelUpdate, ChatError, Command,
    MarkerList, MemberAction, MemberEntry, MemberParams, Response, ServerEvent, User, UserId,
    MARKER_DISPLAYED,
};
use tracing::debug;

use crate::client::{now_ms, unexpected, ChatClient};
use crate::transport::Transport;

impl<T: Transport> ChatClient<T> {
    /// Create a channel. The store only receives the server's resolved
    /// record.
    pub async fn create_channel(&self, draft: ChannelDraft) -> Result<Channel, ChatError> {
        let response = self
            .inner
            .request(Command::CreateChannel { draft })
            .await?;
        let Response::Channel { channel } = response else {
            return Err(unexpected("create_channel", &response));
        };
        Ok(self.store_channel(channel))
    }

    /// Fetch a channel from the service and cache it.
    ///
    /// While offline the cached copy is returned instead.
    pub async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, ChatError> {
        if !self.is_connected() {
            return self.cached_channel(channel_id).ok_or_else(|| {
                ChatError::NetworkUnavailable(format!("channel {} not cached", channel_id))
            });
        }
        let response = self
            .inner
            .request(Command::GetChannel {
                channel_id: channel_id.clone(),
            })
            .await?;
        let Response::Channel { channel } = response else {
            return Err(unexpected("get_channel", &response));
        };
        Ok(self.store_channel(channel))
    }

    /// The cached copy of a channel.
    pub fn cached_channel(&self, channel_id: &ChannelId) -> Option<Channel> {
        self.read(|store| store.channel(channel_id).cloned())
    }

    /// Change subject, uri, avatar, label or metadata.
    pub async fn update_channel(
        &self,
        channel_id: &ChannelId,
        update: ChannelUpdate,
    ) -> Result<Channel, ChatError> {
        let response = self
            .inner
            .request(Command::UpdateChannel {
                channel_id: channel_id.clone(),
                update,
            })
            .await?;
        let Response::Channel { channel } = response else {
            return Err(unexpected("update_channel", &response));
        };
        Ok(self.store_channel(channel))
    }

    /// Delete the channel for everyone. Unsent messages of the channel are
    /// dropped.
    pub async fn delete_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Delete).await?;
        self.discard_outbox(channel_id);
        self.inner.dispatcher.apply(ServerEvent::ChannelDeleted {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Leave a group channel. The channel disappears from the store.
    pub async fn leave_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Leave).await?;
        self.discard_outbox(channel_id);
        self.inner.dispatcher.apply(ServerEvent::MemberLeft {
            channel_id: channel_id.clone(),
            user_id: self.inner.user_id.clone(),
        });
        Ok(())
    }

    /// Join a public channel.
    pub async fn join_channel(&self, channel_id: &ChannelId) -> Result<Channel, ChatError> {
        match self.channel_action(channel_id, ChannelAction::Join).await? {
            Response::Channel { channel } => Ok(self.store_channel(channel)),
            other => Err(unexpected("join", &other)),
        }
    }

    /// Hide the channel from the channel list.
    pub async fn hide_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Hide).await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelHidden {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Show a hidden channel again.
    pub async fn unhide_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Unhide).await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelShown {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Mute notifications, until `until` (epoch millis) or indefinitely.
    pub async fn mute_channel(
        &self,
        channel_id: &ChannelId,
        until: Option<u64>,
    ) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Mute { until })
            .await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelMuted {
            channel_id: channel_id.clone(),
            expires_at: until,
        });
        Ok(())
    }

    /// Unmute notifications.
    pub async fn unmute_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::Unmute).await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelUnmuted {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Block a group channel.
    pub async fn block_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.require_group(channel_id)?;
        self.channel_action(channel_id, ChannelAction::Block).await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelBlocked {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Unblock a group channel.
    pub async fn unblock_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.require_group(channel_id)?;
        self.channel_action(channel_id, ChannelAction::Unblock)
            .await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelUnblocked {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Mark every message of the channel as displayed.
    pub async fn mark_channel_as_read(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::MarkAsRead)
            .await?;
        let me = self.inner.user_id.clone();
        self.inner.dispatcher.commit(|store| {
            let last = store
                .timeline(channel_id)
                .into_iter()
                .rev()
                .find_map(|m| m.server_id().cloned());
            let mut events = Vec::new();
            if let Some(message_id) = last {
                events.extend(apply_event(
                    store,
                    ServerEvent::MarkersReceived {
                        channel_id: channel_id.clone(),
                        markers: MarkerList {
                            message_ids: vec![message_id],
                            name: MARKER_DISPLAYED.to_string(),
                            user_id: me,
                            created_at: now_ms(),
                        },
                    },
                ));
            }
            if store.mark_channel_read(channel_id, 0).is_ok() {
                events.extend(store.channel(channel_id).cloned().map(ChannelEvent::Updated));
            }
            ((), events)
        });
        Ok(())
    }

    /// Flag the channel as unread.
    pub async fn mark_channel_as_unread(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::MarkAsUnread)
            .await?;
        self.inner.dispatcher.apply(ServerEvent::ChannelMarkedAsUnread {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Delete every message of the channel.
    pub async fn clear_history(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        self.channel_action(channel_id, ChannelAction::ClearHistory)
            .await?;
        self.inner.dispatcher.apply(ServerEvent::HistoryCleared {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    // =======================================================================
    // Members
    // =======================================================================

    /// Add members with the given roles.
    pub async fn add_members(
        &self,
        channel_id: &ChannelId,
        members: Vec<MemberParams>,
    ) -> Result<Vec<MemberEntry>, ChatError> {
        let fallback = entries(&members);
        let response = self
            .member_action(channel_id, MemberAction::Add(members))
            .await?;
        let members = member_entries("add_members", response, fallback)?;
        self.inner.dispatcher.apply(ServerEvent::MembersAdded {
            channel_id: channel_id.clone(),
            members: members.clone(),
        });
        Ok(members)
    }

    /// Remove members from the channel.
    pub async fn kick_members(
        &self,
        channel_id: &ChannelId,
        user_ids: Vec<UserId>,
    ) -> Result<(), ChatError> {
        self.member_action(channel_id, MemberAction::Kick(user_ids.clone()))
            .await?;
        self.inner.dispatcher.apply(ServerEvent::MembersKicked {
            channel_id: channel_id.clone(),
            user_ids,
        });
        Ok(())
    }

    /// Block members of the channel.
    pub async fn block_members(
        &self,
        channel_id: &ChannelId,
        user_ids: Vec<UserId>,
    ) -> Result<(), ChatError> {
        self.member_action(channel_id, MemberAction::Block(user_ids.clone()))
            .await?;
        self.inner.dispatcher.apply(ServerEvent::MembersBlocked {
            channel_id: channel_id.clone(),
            user_ids,
        });
        Ok(())
    }

    /// Unblock members of the channel.
    pub async fn unblock_members(
        &self,
        channel_id: &ChannelId,
        user_ids: Vec<UserId>,
    ) -> Result<(), ChatError> {
        self.member_action(channel_id, MemberAction::Unblock(user_ids.clone()))
            .await?;
        self.inner.dispatcher.apply(ServerEvent::MembersUnblocked {
            channel_id: channel_id.clone(),
            user_ids,
        });
        Ok(())
    }

    /// Change member roles.
    pub async fn change_members_role(
        &self,
        channel_id: &ChannelId,
        members: Vec<MemberParams>,
    ) -> Result<Vec<MemberEntry>, ChatError> {
        let fallback = entries(&members);
        let response = self
            .member_action(channel_id, MemberAction::ChangeRole(members))
            .await?;
        let members = member_entries("change_members_role", response, fallback)?;
        self.inner.dispatcher.apply(ServerEvent::MembersRoleChanged {
            channel_id: channel_id.clone(),
            members: members.clone(),
        });
        Ok(members)
    }

    /// Hand ownership to another member. The previous owner becomes an admin.
    pub async fn change_owner(
        &self,
        channel_id: &ChannelId,
        new_owner: UserId,
    ) -> Result<(), ChatError> {
        let old_owner = self.read(|store| {
            store
                .members(channel_id)
                .into_iter()
                .find(|m| m.role == "owner")
                .map(|m| m.user_id.clone())
        });
        let fallback = entries(&[MemberParams::new(new_owner.clone(), "owner")]);
        let response = self
            .member_action(channel_id, MemberAction::ChangeOwner(new_owner))
            .await?;
        let entry = member_entries("change_owner", response, fallback)?
            .into_iter()
            .find(|e| e.role == "owner")
            .ok_or_else(|| ChatError::Malformed("owner change without an owner".into()))?;
        self.inner.dispatcher.apply(ServerEvent::OwnerChanged {
            channel_id: channel_id.clone(),
            new_owner: entry,
            old_owner,
        });
        Ok(())
    }

    // =======================================================================
    // Helpers
    // =======================================================================

    async fn channel_action(
        &self,
        channel_id: &ChannelId,
        action: ChannelAction,
    ) -> Result<Response, ChatError> {
        self.inner
            .request(Command::Channel {
                channel_id: channel_id.clone(),
                action,
            })
            .await
    }

    async fn member_action(
        &self,
        channel_id: &ChannelId,
        action: MemberAction,
    ) -> Result<Response, ChatError> {
        self.inner
            .request(Command::Members {
                channel_id: channel_id.clone(),
                action,
            })
            .await
    }

    fn store_channel(&self, channel: Channel) -> Channel {
        let channel_id = channel.id.clone();
        self.inner.dispatcher.apply(ServerEvent::ChannelUpdated {
            channel: channel.clone(),
        });
        self.cached_channel(&channel_id).unwrap_or(channel)
    }

    fn discard_outbox(&self, channel_id: &ChannelId) {
        let dropped = lock(&self.inner.outbox).discard_channel(channel_id);
        if !dropped.is_empty() {
            debug!(%channel_id, count = dropped.len(), "dropped unsent messages of removed channel");
        }
    }

    fn require_group(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        match self.cached_channel(channel_id) {
            Some(channel) if !channel.is_group() => Err(ChatError::InvalidTransition(format!(
                "channel {} is not a group",
                channel_id
            ))),
            _ => Ok(()),
        }
    }
}

fn entries(params: &[MemberParams]) -> Vec<MemberEntry> {
    params
        .iter()
        .map(|p| MemberEntry {
            user: User::new(p.user_id.clone()),
            role: p.role.clone(),
            blocked: false,
        })
        .collect()
}

/// Member records from a response, or the requested ones when the service
/// only acknowledged.
fn member_entries(
    operation: &str,
    response: Response,
    fallback: Vec<MemberEntry>,
) -> Result<Vec<MemberEntry>, ChatError> {
    match response {
        Response::Members { members } => Ok(members),
        Response::Ack => Ok(fallback),
        other => Err(unexpected(operation, &other)),
    }
}
