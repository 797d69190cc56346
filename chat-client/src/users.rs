//! Users, presence, profile and reports.

use chatsync_core::apply_event;
use chatsync_types::{
    ChannelId, ChatError, Command, MessageId, Presence, PresenceState, ReportTarget, Response,
    ServerEvent, User, UserId, UserProfile,
};

use crate::client::{now_ms, unexpected, ChatClient};
use crate::transport::Transport;

impl<T: Transport> ChatClient<T> {
    /// Fetch user records and cache them.
    pub async fn get_users(&self, user_ids: Vec<UserId>) -> Result<Vec<User>, ChatError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.inner.request(Command::GetUsers { user_ids }).await?;
        let Response::Users { users } = response else {
            return Err(unexpected("get_users", &response));
        };
        Ok(self.store_users(users))
    }

    /// The cached record of a user.
    pub fn cached_user(&self, user_id: &UserId) -> Option<User> {
        self.read(|store| store.user(user_id).cloned())
    }

    /// Block users.
    pub async fn block_users(&self, user_ids: Vec<UserId>) -> Result<Vec<User>, ChatError> {
        let response = self
            .inner
            .request(Command::BlockUsers {
                user_ids: user_ids.clone(),
            })
            .await?;
        self.blocked_users("block_users", response, &user_ids, true)
    }

    /// Unblock users.
    pub async fn unblock_users(&self, user_ids: Vec<UserId>) -> Result<Vec<User>, ChatError> {
        let response = self
            .inner
            .request(Command::UnblockUsers {
                user_ids: user_ids.clone(),
            })
            .await?;
        self.blocked_users("unblock_users", response, &user_ids, false)
    }

    /// Publish the current user's presence.
    pub async fn set_presence(
        &self,
        state: PresenceState,
        status: Option<String>,
    ) -> Result<User, ChatError> {
        let response = self
            .inner
            .request(Command::SetPresence {
                state,
                status: status.clone(),
            })
            .await?;
        let user = match response {
            Response::User { user } => user,
            Response::Ack => {
                let mut me = self.me();
                me.presence = Some(Presence {
                    state,
                    status,
                    last_active_at: now_ms(),
                });
                me
            }
            other => return Err(unexpected("set_presence", &other)),
        };
        Ok(self.store_user(user))
    }

    /// Change the current user's profile.
    pub async fn set_profile(&self, profile: UserProfile) -> Result<User, ChatError> {
        let response = self.inner.request(Command::SetProfile { profile }).await?;
        let Response::User { user } = response else {
            return Err(unexpected("set_profile", &response));
        };
        Ok(self.store_user(user))
    }

    /// Report a channel.
    pub async fn report_channel(
        &self,
        channel_id: &ChannelId,
        reason: &str,
        description: Option<String>,
    ) -> Result<(), ChatError> {
        let target = ReportTarget::Channel {
            channel_id: channel_id.clone(),
        };
        self.report(target, reason, description).await
    }

    /// Report messages of a channel.
    pub async fn report_messages(
        &self,
        channel_id: &ChannelId,
        message_ids: Vec<MessageId>,
        reason: &str,
        description: Option<String>,
    ) -> Result<(), ChatError> {
        let target = ReportTarget::Messages {
            channel_id: channel_id.clone(),
            message_ids,
        };
        self.report(target, reason, description).await
    }

    /// Report a user.
    pub async fn report_user(
        &self,
        user_id: &UserId,
        reason: &str,
        description: Option<String>,
    ) -> Result<(), ChatError> {
        let target = ReportTarget::User {
            user_id: user_id.clone(),
        };
        self.report(target, reason, description).await
    }

    async fn report(
        &self,
        target: ReportTarget,
        reason: &str,
        description: Option<String>,
    ) -> Result<(), ChatError> {
        self.inner
            .request(Command::Report {
                target,
                reason: reason.to_string(),
                description,
            })
            .await?;
        Ok(())
    }

    fn blocked_users(
        &self,
        operation: &str,
        response: Response,
        user_ids: &[UserId],
        blocked: bool,
    ) -> Result<Vec<User>, ChatError> {
        let users = match response {
            Response::Users { users } => users,
            Response::Ack => user_ids
                .iter()
                .map(|id| {
                    let mut user = self.cached_user(id).unwrap_or_else(|| User::new(id.clone()));
                    user.blocked = blocked;
                    user
                })
                .collect(),
            other => return Err(unexpected(operation, &other)),
        };
        Ok(self.store_users(users))
    }

    fn me(&self) -> User {
        self.cached_user(&self.inner.user_id)
            .unwrap_or_else(|| User::new(self.inner.user_id.clone()))
    }

    fn store_user(&self, user: User) -> User {
        let fallback = user.clone();
        self.store_users(vec![user])
            .into_iter()
            .next()
            .unwrap_or(fallback)
    }

    /// Merge users into the store in one commit and return the merged
    /// records.
    fn store_users(&self, users: Vec<User>) -> Vec<User> {
        self.inner.dispatcher.commit(|store| {
            let mut events = Vec::new();
            let mut merged = Vec::with_capacity(users.len());
            for user in users {
                let user_id = user.id.clone();
                let fallback = user.clone();
                events.extend(apply_event(store, ServerEvent::UserUpdated { user }));
                merged.push(store.user(&user_id).cloned().unwrap_or(fallback));
            }
            (merged, events)
        })
    }
}
