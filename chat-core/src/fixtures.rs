//! Record builders shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};

use chatsync_types::{
    Channel, ChannelDetails, ChannelId, DeliveryStatus, Message, MessageId, MessageKey,
    MessageState, TimedFlag, UnreadCounts, UserId,
};

pub fn channel(id: &str) -> Channel {
    Channel {
        id: ChannelId::new(id),
        details: ChannelDetails::Private {
            subject: format!("subject {}", id),
            avatar_url: None,
            my_role: Some("owner".into()),
        },
        label: None,
        metadata: None,
        created_at: 1,
        updated_at: 1,
        member_count: 0,
        muted: TimedFlag::off(),
        hidden: TimedFlag::off(),
        archived: TimedFlag::off(),
        blocked: false,
        marked_as_unread: false,
        last_message: None,
        last_received_message_id: None,
        last_displayed_message_id: None,
        read_watermark: 0,
        counts: UnreadCounts::default(),
    }
}

pub fn message(channel: &str, id: &str, sender: &str, at: u64) -> Message {
    Message {
        key: MessageKey::Server(MessageId::new(id)),
        tid: None,
        channel_id: ChannelId::new(channel),
        sender: UserId::new(sender),
        body: format!("body {}", id),
        kind: "text".into(),
        metadata: None,
        created_at: at,
        updated_at: at,
        incoming: true,
        delivery_status: DeliveryStatus::Sent,
        state: MessageState::Unmodified,
        attachments: Vec::new(),
        reaction_totals: BTreeMap::new(),
        self_reactions: BTreeSet::new(),
        marker_totals: BTreeMap::new(),
        self_markers: BTreeSet::new(),
        mentioned_user_ids: Vec::new(),
        parent_id: None,
        reply_in_thread: false,
        reply_count: 0,
        transient: false,
        silent: false,
        forwarding: None,
    }
}
