//! Pagination engine for chatsync.
//!
//! A [`Cursor`] walks one list view over an immutable query. It tracks the
//! loaded window's two edges, the advisory `has_next`/`has_previous` flags,
//! and the generation of the store scope it was opened over.
//!
//! The cursor does no I/O. A navigation call is split in two:
//! [`Cursor::begin`] hands out a [`Ticket`] describing the page to fetch,
//! and [`Cursor::complete`] folds the fetched page back in. Only one ticket
//! may be outstanding; a second `begin` while one is in flight fails with
//! [`ChatError::Busy`]. The same policy applies to every entity kind.
//!
//! Pages come either from the service or from [`local_page`], which serves
//! the same windows out of the local store.

use chatsync_types::{
    Anchor, Attachment, AttachmentQuery, Channel, ChannelQuery, ChannelSort, ChatError,
    MarkerQuery, MemberEntry, MemberFilter, MemberOrder, MemberOrderKey, MemberQuery, Message,
    MessageQuery, Navigation, Page, PageItems, PageRequest, PageToken, QuerySpec, Reaction,
    ReactionQuery, SortKey, TextField, User, Marker,
};
use tracing::{debug, warn};

use crate::store::{LocalStore, Scope, ScopeKind};

/// A query specification with a typed result.
pub trait Query: Clone + Into<QuerySpec> + Send + Sync + 'static {
    /// Entity the query lists.
    type Item: Clone + Send + 'static;

    /// Unwrap page items of this query's entity kind.
    fn extract(items: PageItems) -> Result<Vec<Self::Item>, ChatError>;
}

fn entity_name(items: &PageItems) -> &'static str {
    match items {
        PageItems::Messages(_) => "messages",
        PageItems::Members(_) => "members",
        PageItems::Channels(_) => "channels",
        PageItems::Markers(_) => "markers",
        PageItems::Reactions(_) => "reactions",
        PageItems::Attachments(_) => "attachments",
    }
}

macro_rules! impl_query {
    ($($query:ty => $variant:ident($item:ty)),* $(,)?) => {
        $(impl Query for $query {
            type Item = $item;

            fn extract(items: PageItems) -> Result<Vec<Self::Item>, ChatError> {
                match items {
                    PageItems::$variant(items) => Ok(items),
                    other => Err(ChatError::Malformed(format!(
                        "expected {} page, got {}",
                        stringify!($variant).to_lowercase(),
                        entity_name(&other)
                    ))),
                }
            }
        })*
    };
}

impl_query!(
    MessageQuery => Messages(Message),
    MemberQuery => Members(MemberEntry),
    ChannelQuery => Channels(Channel),
    MarkerQuery => Markers(Marker),
    ReactionQuery => Reactions(Reaction),
    AttachmentQuery => Attachments(Attachment),
);

/// Store scope a query reads from. Channel lists are unscoped.
pub fn scope_of(spec: &QuerySpec) -> Option<Scope> {
    let kind = match spec {
        QuerySpec::Channels(_) => return None,
        QuerySpec::Members(_) => ScopeKind::Members,
        QuerySpec::Messages(_)
        | QuerySpec::Markers(_)
        | QuerySpec::Reactions(_)
        | QuerySpec::Attachments(_) => ScopeKind::Messages,
    };
    spec.channel_id().map(|channel_id| Scope {
        channel_id: channel_id.clone(),
        kind,
    })
}

/// Member lists are positioned by offset, everything else by key.
pub fn is_offset_mode(spec: &QuerySpec) -> bool {
    matches!(spec, QuerySpec::Members(_))
}

/// Whether the list runs from newest to oldest.
pub fn is_descending(spec: &QuerySpec) -> bool {
    match spec {
        QuerySpec::Messages(q) => q.reversed,
        QuerySpec::Markers(q) => q.reversed,
        QuerySpec::Attachments(q) => q.reversed,
        QuerySpec::Channels(_) | QuerySpec::Reactions(_) => true,
        QuerySpec::Members(_) => false,
    }
}

/// Sort keys of page items, in item order.
pub fn item_keys(spec: &QuerySpec, items: &PageItems) -> Vec<SortKey> {
    match items {
        PageItems::Messages(v) => v.iter().map(message_key).collect(),
        PageItems::Members(v) => v.iter().map(|m| SortKey::new(0, m.user.id.as_str())).collect(),
        PageItems::Channels(v) => {
            let sort = match spec {
                QuerySpec::Channels(q) => q.sort,
                _ => ChannelSort::default(),
            };
            v.iter().map(|c| channel_key(c, sort)).collect()
        }
        PageItems::Markers(v) => v
            .iter()
            .map(|m| SortKey::new(m.created_at, format!("{}/{}", m.name, m.user_id)))
            .collect(),
        PageItems::Reactions(v) => v
            .iter()
            .map(|r| SortKey::new(r.updated_at, format!("{}/{}", r.key, r.user_id)))
            .collect(),
        PageItems::Attachments(v) => v.iter().map(attachment_key).collect(),
    }
}

fn message_key(message: &Message) -> SortKey {
    SortKey::new(message.created_at, message.key.to_string())
}

fn channel_key(channel: &Channel, sort: ChannelSort) -> SortKey {
    let at = match sort {
        ChannelSort::CreationDate => channel.created_at,
        ChannelSort::LastMessage => channel
            .last_message
            .as_ref()
            .map_or(channel.created_at, |m| m.created_at.max(channel.created_at)),
    };
    SortKey::new(at, channel.id.as_str())
}

fn attachment_key(attachment: &Attachment) -> SortKey {
    let id = attachment.id.clone().unwrap_or_else(|| attachment.url.clone());
    SortKey::new(attachment.created_at, id)
}

/// A slice of an ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First index (inclusive).
    pub start: usize,
    /// Last index (exclusive).
    pub end: usize,
    /// Items exist after `end`.
    pub has_next: bool,
    /// Items exist before `start`.
    pub has_previous: bool,
}

/// Compute the page window for a navigation step.
///
/// `keys` must be sorted in list order: ascending, or descending when
/// `descending` is set. `Next` starts strictly after `from`, `Previous` ends
/// strictly before it. Without a position, `Next` starts at the head of the
/// list and `Previous` ends at its tail. `Near` centres the window on the
/// anchor.
pub fn window(
    keys: &[SortKey],
    descending: bool,
    navigation: &Navigation,
    from: Option<&PageToken>,
    limit: usize,
) -> Result<Window, ChatError> {
    let limit = limit.max(1);
    let len = keys.len();
    let before = |key: &SortKey, edge: &SortKey| {
        if descending {
            key > edge
        } else {
            key < edge
        }
    };

    let (start, end) = match navigation {
        Navigation::Next => {
            let start = match from {
                None => 0,
                Some(PageToken::Offset(offset)) => (*offset).min(len),
                Some(PageToken::Key(edge)) => keys.partition_point(|k| before(k, edge) || k == edge),
            };
            (start, (start + limit).min(len))
        }
        Navigation::Previous => {
            let end = match from {
                None => len,
                Some(PageToken::Offset(offset)) => (*offset).min(len),
                Some(PageToken::Key(edge)) => keys.partition_point(|k| before(k, edge)),
            };
            (end.saturating_sub(limit), end)
        }
        Navigation::Near(anchor) => {
            let pivot = match anchor {
                Anchor::Id(id) => keys
                    .iter()
                    .position(|k| &k.id == id)
                    .ok_or_else(|| ChatError::NotFound(format!("anchor {}", id)))?,
                Anchor::Timestamp(at) => keys.partition_point(|k| {
                    if descending {
                        k.at > *at
                    } else {
                        k.at < *at
                    }
                }),
            };
            let start = pivot.saturating_sub(limit / 2);
            let end = (start + limit).min(len);
            (end.saturating_sub(limit).min(start), end)
        }
    };

    Ok(Window {
        start,
        end,
        has_next: end < len,
        has_previous: start > 0,
    })
}

/// Serve a page out of the local store.
pub fn local_page(store: &LocalStore, request: &PageRequest) -> Result<Page, ChatError> {
    let spec = &request.spec;
    let (keys, items) = collect(store, spec);
    let w = window(
        &keys,
        is_descending(spec),
        &request.navigation,
        request.from.as_ref(),
        request.limit,
    )?;
    Ok(Page {
        items: slice(items, w.start, w.end),
        has_next: w.has_next,
        has_previous: w.has_previous,
        start_offset: is_offset_mode(spec).then_some(w.start),
    })
}

fn slice(items: PageItems, start: usize, end: usize) -> PageItems {
    fn cut<T>(items: Vec<T>, start: usize, end: usize) -> Vec<T> {
        items.into_iter().skip(start).take(end - start).collect()
    }
    match items {
        PageItems::Messages(v) => PageItems::Messages(cut(v, start, end)),
        PageItems::Members(v) => PageItems::Members(cut(v, start, end)),
        PageItems::Channels(v) => PageItems::Channels(cut(v, start, end)),
        PageItems::Markers(v) => PageItems::Markers(cut(v, start, end)),
        PageItems::Reactions(v) => PageItems::Reactions(cut(v, start, end)),
        PageItems::Attachments(v) => PageItems::Attachments(cut(v, start, end)),
    }
}

/// Sort keyed items into list order and split keys from items.
fn ordered<T>(mut keyed: Vec<(SortKey, T)>, descending: bool) -> (Vec<SortKey>, Vec<T>) {
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    if descending {
        keyed.reverse();
    }
    keyed.into_iter().unzip()
}

fn collect(store: &LocalStore, spec: &QuerySpec) -> (Vec<SortKey>, PageItems) {
    let descending = is_descending(spec);
    match spec {
        QuerySpec::Messages(q) => {
            let keyed = store
                .timeline(&q.channel_id)
                .into_iter()
                .filter(|m| match &q.thread {
                    Some(parent) => m.parent_id.as_ref() == Some(parent),
                    None => !m.reply_in_thread,
                })
                .filter(|m| q.message_type.as_ref().map_or(true, |t| &m.kind == t))
                .map(|m| (message_key(m), m.clone()))
                .collect();
            let (keys, items) = ordered(keyed, descending);
            (keys, PageItems::Messages(items))
        }
        QuerySpec::Members(q) => {
            let mut entries: Vec<MemberEntry> = store
                .members(&q.channel_id)
                .into_iter()
                .filter(|m| match q.filter {
                    MemberFilter::All => true,
                    MemberFilter::Privileged => m.is_privileged(),
                    MemberFilter::Blocked => m.blocked,
                })
                .map(|m| MemberEntry {
                    user: store
                        .user(&m.user_id)
                        .cloned()
                        .unwrap_or_else(|| User::new(m.user_id.clone())),
                    role: m.role.clone(),
                    blocked: m.blocked,
                })
                .collect();
            sort_members(&mut entries, q.order, q.order_key);
            let keys = entries
                .iter()
                .map(|m| SortKey::new(0, m.user.id.as_str()))
                .collect();
            (keys, PageItems::Members(entries))
        }
        QuerySpec::Channels(q) => {
            let keyed = store
                .channels()
                .filter(|c| q.kinds.is_empty() || q.kinds.contains(&c.kind()))
                .filter(|c| c.hidden.enabled == q.hidden_only)
                .filter(|c| !q.blocked_only || c.blocked)
                .filter(|c| match &q.text {
                    None => true,
                    Some(filter) => {
                        let field = match filter.field {
                            TextField::Subject => c.details.subject(),
                            TextField::Uri => c.details.uri(),
                            TextField::Label => c.label.as_deref(),
                        };
                        field.is_some_and(|value| filter.matches(value))
                    }
                })
                .map(|c| (channel_key(c, q.sort), c.clone()))
                .collect();
            let (keys, items) = ordered(keyed, descending);
            (keys, PageItems::Channels(items))
        }
        QuerySpec::Markers(q) => {
            let keyed = store
                .markers(&q.message_id)
                .into_iter()
                .filter(|m| q.markers.is_empty() || q.markers.contains(&m.name))
                .map(|m| {
                    let key = SortKey::new(m.created_at, format!("{}/{}", m.name, m.user_id));
                    (key, m.clone())
                })
                .collect();
            let (keys, items) = ordered(keyed, descending);
            (keys, PageItems::Markers(items))
        }
        QuerySpec::Reactions(q) => {
            let keyed = store
                .reactions(&q.message_id)
                .into_iter()
                .filter(|r| q.key.as_ref().map_or(true, |k| &r.key == k))
                .map(|r| {
                    let key = SortKey::new(r.updated_at, format!("{}/{}", r.key, r.user_id));
                    (key, r.clone())
                })
                .collect();
            let (keys, items) = ordered(keyed, descending);
            (keys, PageItems::Reactions(items))
        }
        QuerySpec::Attachments(q) => {
            let keyed = store
                .timeline(&q.channel_id)
                .into_iter()
                .filter(|m| !m.is_deleted())
                .flat_map(|m| {
                    m.attachments.iter().map(move |a| {
                        let mut attachment = a.clone();
                        if attachment.created_at == 0 {
                            attachment.created_at = m.created_at;
                        }
                        attachment.channel_id.get_or_insert_with(|| m.channel_id.clone());
                        if let Some(id) = m.server_id() {
                            attachment.message_id.get_or_insert_with(|| id.clone());
                        }
                        attachment
                    })
                })
                .filter(|a| q.types.is_empty() || q.types.contains(&a.kind))
                .map(|a| (attachment_key(&a), a))
                .collect();
            let (keys, items) = ordered(keyed, descending);
            (keys, PageItems::Attachments(items))
        }
    }
}

fn sort_members(entries: &mut [MemberEntry], order: MemberOrder, key: MemberOrderKey) {
    fn field(user: &User, key: MemberOrderKey) -> String {
        let value = match key {
            MemberOrderKey::Username => user.username.as_deref(),
            MemberOrderKey::FirstName => user.first_name.as_deref(),
            MemberOrderKey::LastName => user.last_name.as_deref(),
        };
        value.unwrap_or(user.id.as_str()).to_lowercase()
    }
    fn rank(role: &str) -> u8 {
        match role {
            "owner" => 0,
            "admin" => 1,
            _ => 2,
        }
    }

    entries.sort_by(|a, b| {
        let by_field = field(&a.user, key)
            .cmp(&field(&b.user, key))
            .then_with(|| a.user.id.cmp(&b.user.id));
        match order {
            MemberOrder::Affiliation => rank(&a.role).cmp(&rank(&b.role)).then(by_field),
            MemberOrder::Ascending => by_field,
            MemberOrder::Descending => by_field.reverse(),
        }
    });
}

/// An outstanding page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    /// The page to fetch.
    pub request: PageRequest,
}

impl Ticket {
    /// Ticket number, unique per cursor.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pagination state of one list view.
#[derive(Debug, Clone)]
pub struct Cursor<Q: Query> {
    query: Q,
    spec: QuerySpec,
    limit: usize,
    lower: Option<PageToken>,
    upper: Option<PageToken>,
    has_next: bool,
    has_previous: bool,
    next_exhausted: bool,
    generation: u64,
    invalidated: bool,
    in_flight: Option<u64>,
    issued: u64,
}

impl<Q: Query> Cursor<Q> {
    /// Open a cursor over `query`.
    ///
    /// `generation` is the current generation of the query's store scope;
    /// `default_limit` replaces a zero page size.
    pub fn new(query: Q, generation: u64, default_limit: usize) -> Self {
        let spec: QuerySpec = query.clone().into();
        let limit = match spec.limit() {
            0 => default_limit.max(1),
            n => n,
        };
        Self {
            query,
            spec,
            limit,
            lower: None,
            upper: None,
            has_next: true,
            has_previous: true,
            next_exhausted: false,
            generation,
            invalidated: false,
            in_flight: None,
            issued: 0,
        }
    }

    /// The query this cursor walks.
    pub fn query(&self) -> &Q {
        &self.query
    }

    /// The query as a specification.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Store scope the cursor depends on.
    pub fn scope(&self) -> Option<Scope> {
        scope_of(&self.spec)
    }

    /// Scope generation the cursor was opened at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Follow a generation change caused by merging this cursor's own page
    /// into the store. An invalidated cursor stays invalid.
    pub fn rebase(&mut self, store_generation: u64) {
        if !self.invalidated {
            self.generation = store_generation;
        }
    }

    /// Resolved page size.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// More items may follow (advisory). Never true again once a `Next`
    /// page came back empty.
    pub fn has_next(&self) -> bool {
        self.has_next && !self.next_exhausted
    }

    /// More items may precede the loaded window (advisory).
    pub fn has_previous(&self) -> bool {
        self.has_previous
    }

    /// A fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The cursor's scope changed underneath it.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Invalidate the cursor; every later navigation fails.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
        self.in_flight = None;
    }

    fn check_generation(&mut self, store_generation: u64) -> Result<(), ChatError> {
        if !self.invalidated && store_generation == self.generation {
            return Ok(());
        }
        if !self.invalidated {
            warn!(
                scope = ?self.scope(),
                opened_at = self.generation,
                now = store_generation,
                "cursor invalidated by store mutation"
            );
        }
        self.invalidate();
        Err(ChatError::Invalidated)
    }

    /// Start a navigation step.
    pub fn begin(
        &mut self,
        navigation: Navigation,
        store_generation: u64,
    ) -> Result<Ticket, ChatError> {
        self.check_generation(store_generation)?;
        if self.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        let from = match navigation {
            Navigation::Next => self.upper.clone(),
            Navigation::Previous => self.lower.clone(),
            Navigation::Near(_) => None,
        };
        self.issued += 1;
        self.in_flight = Some(self.issued);
        Ok(Ticket {
            id: self.issued,
            request: PageRequest {
                spec: self.spec.clone(),
                navigation,
                from,
                limit: self.limit,
            },
        })
    }

    /// Give up on a step without touching the cursor position.
    pub fn abort(&mut self, ticket: &Ticket) {
        if self.in_flight == Some(ticket.id) {
            self.in_flight = None;
        }
    }

    /// Fold a fetched page into the cursor and return its items.
    pub fn complete(
        &mut self,
        ticket: &Ticket,
        page: Page,
        store_generation: u64,
    ) -> Result<Vec<Q::Item>, ChatError> {
        if self.in_flight != Some(ticket.id) {
            return Err(ChatError::InvalidTransition(format!(
                "page ticket {} is not in flight",
                ticket.id
            )));
        }
        self.in_flight = None;
        self.check_generation(store_generation)?;

        let len = page.items.len();
        let (first, last) = if is_offset_mode(&self.spec) {
            let start = page.start_offset.unwrap_or_else(|| match &ticket.request.navigation {
                Navigation::Next => offset(&self.upper).unwrap_or(0),
                Navigation::Previous => offset(&self.lower).unwrap_or(0).saturating_sub(len),
                Navigation::Near(_) => 0,
            });
            (
                Some(PageToken::Offset(start)),
                Some(PageToken::Offset(start + len)),
            )
        } else {
            let keys = item_keys(&self.spec, &page.items);
            (
                keys.first().cloned().map(PageToken::Key),
                keys.last().cloned().map(PageToken::Key),
            )
        };

        match &ticket.request.navigation {
            Navigation::Next if len == 0 => {
                self.next_exhausted = true;
                self.has_next = false;
            }
            Navigation::Next => {
                self.upper = last;
                if self.lower.is_none() {
                    self.lower = first;
                    self.has_previous = page.has_previous;
                }
                self.has_next = page.has_next;
            }
            Navigation::Previous if len == 0 => {
                self.has_previous = false;
            }
            Navigation::Previous => {
                self.lower = first;
                if self.upper.is_none() {
                    self.upper = last;
                    self.has_next = page.has_next;
                }
                self.has_previous = page.has_previous;
            }
            Navigation::Near(_) => {
                self.lower = first;
                self.upper = last;
                self.has_next = page.has_next;
                self.has_previous = page.has_previous;
            }
        }
        debug!(
            navigation = ?ticket.request.navigation,
            items = len,
            has_next = self.has_next(),
            "page loaded"
        );
        Q::extract(page.items)
    }
}

fn offset(token: &Option<PageToken>) -> Option<usize> {
    match token {
        Some(PageToken::Offset(offset)) => Some(*offset),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{channel, message};
    use chatsync_types::{ChannelId, MessageId, UserId};

    fn store_with_messages(count: u64) -> LocalStore {
        let mut store = LocalStore::new();
        store.set_current_user(UserId::new("me"));
        store.upsert_channel(channel("c1"));
        for i in 1..=count {
            store
                .upsert_message(message("c1", &format!("m{:02}", i), "bob", i * 10))
                .unwrap();
        }
        store
    }

    fn messages_query(limit: usize) -> MessageQuery {
        MessageQuery {
            limit,
            ..MessageQuery::new(ChannelId::new("c1"))
        }
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.key.to_string()).collect()
    }

    fn step(
        store: &LocalStore,
        cursor: &mut Cursor<MessageQuery>,
        navigation: Navigation,
    ) -> Result<Vec<Message>, ChatError> {
        let generation = cursor.scope().map_or(0, |s| store.generation(&s));
        let ticket = cursor.begin(navigation, generation)?;
        let page = local_page(store, &ticket.request)?;
        cursor.complete(&ticket, page, generation)
    }

    // ===========================================
    // Window Tests
    // ===========================================

    fn keys(n: u64) -> Vec<SortKey> {
        (1..=n).map(|i| SortKey::new(i * 10, format!("k{}", i))).collect()
    }

    #[test]
    fn next_starts_after_edge() {
        let keys = keys(10);
        let edge = PageToken::Key(keys[2].clone());
        let w = window(&keys, false, &Navigation::Next, Some(&edge), 4).unwrap();
        assert_eq!((w.start, w.end), (3, 7));
        assert!(w.has_next && w.has_previous);
    }

    #[test]
    fn previous_without_position_takes_tail() {
        let keys = keys(10);
        let w = window(&keys, false, &Navigation::Previous, None, 4).unwrap();
        assert_eq!((w.start, w.end), (6, 10));
        assert!(!w.has_next);
    }

    #[test]
    fn near_centres_on_anchor() {
        let keys = keys(10);
        let near = Navigation::Near(Anchor::Id("k5".into()));
        let w = window(&keys, false, &near, None, 4).unwrap();
        assert_eq!((w.start, w.end), (2, 6));

        let edge = Navigation::Near(Anchor::Id("k10".into()));
        let w = window(&keys, false, &edge, None, 4).unwrap();
        assert_eq!((w.start, w.end), (6, 10));
    }

    #[test]
    fn near_timestamp_respects_direction() {
        let mut keys = keys(10);
        let w = window(&keys, false, &Navigation::Near(Anchor::Timestamp(55)), None, 2).unwrap();
        assert_eq!(w.start, 4);

        keys.reverse();
        let w = window(&keys, true, &Navigation::Near(Anchor::Timestamp(55)), None, 2).unwrap();
        // First key at or before 55 in descending order is k5 at index 5
        assert_eq!((w.start, w.end), (4, 6));
    }

    #[test]
    fn unknown_anchor_is_not_found() {
        let near = Navigation::Near(Anchor::Id("missing".into()));
        assert!(matches!(
            window(&keys(3), false, &near, None, 2),
            Err(ChatError::NotFound(_))
        ));
    }

    // ===========================================
    // Cursor Tests
    // ===========================================

    #[test]
    fn load_next_pages_are_disjoint() {
        let store = store_with_messages(25);
        let mut cursor = Cursor::new(messages_query(20), 0, 30);

        let first = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(first.len(), 20);
        assert!(cursor.has_next());

        let second = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(second.len(), 5);
        assert!(!cursor.has_next());
        assert!(ids(&first).iter().all(|id| !ids(&second).contains(id)));
    }

    #[test]
    fn empty_next_page_latches_has_next() {
        let store = store_with_messages(3);
        let mut cursor = Cursor::new(messages_query(3), 0, 30);
        step(&store, &mut cursor, Navigation::Next).unwrap();
        let empty = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert!(empty.is_empty());
        assert!(!cursor.has_next());

        // A re-seed reporting more items does not lift the latch
        step(&store, &mut cursor, Navigation::Near(Anchor::Id("m01".into()))).unwrap();
        assert!(!cursor.has_next());
    }

    #[test]
    fn previous_walks_back_from_newest() {
        let store = store_with_messages(5);
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        let newest = step(&store, &mut cursor, Navigation::Previous).unwrap();
        assert_eq!(ids(&newest), vec!["m04", "m05"]);
        let older = step(&store, &mut cursor, Navigation::Previous).unwrap();
        assert_eq!(ids(&older), vec!["m02", "m03"]);
        assert!(cursor.has_previous());
    }

    #[test]
    fn reversed_query_lists_newest_first() {
        let store = store_with_messages(5);
        let query = MessageQuery {
            reversed: true,
            ..messages_query(2)
        };
        let mut cursor = Cursor::new(query, 0, 30);
        let first = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(ids(&first), vec!["m05", "m04"]);
        let second = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(ids(&second), vec!["m03", "m02"]);
    }

    #[test]
    fn position_survives_unrelated_inserts() {
        let mut store = store_with_messages(4);
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        step(&store, &mut cursor, Navigation::Next).unwrap();

        store.upsert_channel(channel("c2"));
        store.upsert_message(message("c2", "x1", "bob", 5)).unwrap();
        // Older message in the same channel lands behind the cursor
        store.upsert_message(message("c1", "m00", "bob", 1)).unwrap();

        let next = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(ids(&next), vec!["m03", "m04"]);
    }

    #[test]
    fn second_begin_while_loading_is_busy() {
        let store = store_with_messages(4);
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        let ticket = cursor.begin(Navigation::Next, 0).unwrap();
        assert!(cursor.is_loading());
        assert_eq!(cursor.begin(Navigation::Next, 0).unwrap_err(), ChatError::Busy);

        let page = local_page(&store, &ticket.request).unwrap();
        cursor.complete(&ticket, page, 0).unwrap();
        assert!(!cursor.is_loading());
    }

    #[test]
    fn aborted_step_leaves_position() {
        let store = store_with_messages(4);
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        let ticket = cursor.begin(Navigation::Next, 0).unwrap();
        cursor.abort(&ticket);
        let first = step(&store, &mut cursor, Navigation::Next).unwrap();
        assert_eq!(ids(&first), vec!["m01", "m02"]);
    }

    #[test]
    fn deleting_scope_channel_invalidates() {
        let mut store = store_with_messages(4);
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        step(&store, &mut cursor, Navigation::Next).unwrap();

        store.remove_channel(&ChannelId::new("c1"));
        assert_eq!(
            step(&store, &mut cursor, Navigation::Next).unwrap_err(),
            ChatError::Invalidated
        );
        assert!(cursor.is_invalidated());
        // Stays invalid
        assert_eq!(cursor.begin(Navigation::Next, 1).unwrap_err(), ChatError::Invalidated);
    }

    #[test]
    fn zero_limit_uses_default() {
        let cursor = Cursor::new(MessageQuery::new(ChannelId::new("c1")), 0, 30);
        assert_eq!(cursor.limit(), 30);
    }

    #[test]
    fn mismatched_page_kind_is_malformed() {
        let mut cursor = Cursor::new(messages_query(2), 0, 30);
        let ticket = cursor.begin(Navigation::Next, 0).unwrap();
        let page = Page {
            items: PageItems::Channels(vec![]),
            has_next: false,
            has_previous: false,
            start_offset: None,
        };
        assert!(matches!(
            cursor.complete(&ticket, page, 0),
            Err(ChatError::Malformed(_))
        ));
    }

    // ===========================================
    // Local Collection Tests
    // ===========================================

    #[test]
    fn members_page_by_offset_with_affiliation_order() {
        let mut store = store_with_messages(0);
        let c1 = ChannelId::new("c1");
        for (id, role) in [("zoe", "member"), ("amy", "member"), ("bob", "owner"), ("cat", "admin")] {
            store.upsert_member(
                &c1,
                MemberEntry {
                    user: User::new(UserId::new(id)),
                    role: role.into(),
                    blocked: false,
                },
            );
        }
        let request = PageRequest {
            spec: MemberQuery::new(c1.clone()).into(),
            navigation: Navigation::Next,
            from: None,
            limit: 3,
        };
        let page = local_page(&store, &request).unwrap();
        let members = MemberQuery::extract(page.items).unwrap();
        let order: Vec<&str> = members.iter().map(|m| m.user.id.as_str()).collect();
        assert_eq!(order, vec!["bob", "cat", "amy"]);
        assert_eq!(page.start_offset, Some(0));
        assert!(page.has_next);

        let rest = local_page(
            &store,
            &PageRequest {
                from: Some(PageToken::Offset(3)),
                ..request
            },
        )
        .unwrap();
        assert_eq!(rest.items.len(), 1);
    }

    fn member(id: &str, role: &str) -> MemberEntry {
        MemberEntry {
            user: User::new(UserId::new(id)),
            role: role.into(),
            blocked: false,
        }
    }

    fn member_step(
        store: &LocalStore,
        cursor: &mut Cursor<MemberQuery>,
    ) -> Result<Vec<String>, ChatError> {
        let generation = cursor.scope().map_or(0, |s| store.generation(&s));
        let ticket = cursor.begin(Navigation::Next, generation)?;
        let page = local_page(store, &ticket.request)?;
        let members = cursor.complete(&ticket, page, generation)?;
        Ok(members.into_iter().map(|m| m.user.id.to_string()).collect())
    }

    #[test]
    fn member_joining_mid_pagination_invalidates_offsets() {
        let mut store = store_with_messages(0);
        let c1 = ChannelId::new("c1");
        for (id, role) in [("zoe", "member"), ("amy", "member"), ("bob", "owner"), ("cat", "admin")] {
            store.upsert_member(&c1, member(id, role));
        }
        let query = MemberQuery {
            limit: 2,
            ..MemberQuery::new(c1.clone())
        };
        let mut cursor = Cursor::new(query, 0, 30);
        let scope = cursor.scope().unwrap();
        cursor.rebase(store.generation(&scope));
        assert_eq!(member_step(&store, &mut cursor).unwrap(), vec!["bob", "cat"]);

        // Sorts ahead of the loaded offset
        store.upsert_member(&c1, member("ann", "admin"));

        assert_eq!(member_step(&store, &mut cursor).unwrap_err(), ChatError::Invalidated);
        assert!(cursor.is_invalidated());
    }

    #[test]
    fn member_update_without_role_change_keeps_cursor() {
        let mut store = store_with_messages(0);
        let c1 = ChannelId::new("c1");
        store.upsert_member(&c1, member("amy", "member"));
        store.upsert_member(&c1, member("bob", "member"));
        let scope = Scope {
            channel_id: c1.clone(),
            kind: ScopeKind::Members,
        };
        let before = store.generation(&scope);

        store.upsert_member(&c1, member("amy", "member"));
        store
            .update_member(&c1, &UserId::new("bob"), |m| m.blocked = true)
            .unwrap();
        assert_eq!(store.generation(&scope), before);

        store
            .update_member(&c1, &UserId::new("bob"), |m| m.role = "admin".into())
            .unwrap();
        assert_eq!(store.generation(&scope), before + 1);
    }

    #[test]
    fn channel_list_filters_hidden_and_sorts_by_activity() {
        let mut store = LocalStore::new();
        store.upsert_channel(channel("quiet"));
        store.upsert_channel(channel("busy"));
        store.upsert_channel(channel("hidden"));
        store
            .update_channel(&ChannelId::new("hidden"), |c| c.hidden.enabled = true)
            .unwrap();
        store.upsert_message(message("busy", "m1", "bob", 100)).unwrap();

        let request = PageRequest {
            spec: ChannelQuery::default().into(),
            navigation: Navigation::Next,
            from: None,
            limit: 10,
        };
        let channels = ChannelQuery::extract(local_page(&store, &request).unwrap().items).unwrap();
        let order: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["busy", "quiet"]);
    }

    #[test]
    fn thread_query_lists_only_replies() {
        let mut store = store_with_messages(2);
        let mut reply = message("c1", "r1", "bob", 50);
        reply.parent_id = Some(MessageId::new("m01"));
        reply.reply_in_thread = true;
        store.upsert_message(reply).unwrap();

        let main = local_page(
            &store,
            &PageRequest {
                spec: messages_query(10).into(),
                navigation: Navigation::Next,
                from: None,
                limit: 10,
            },
        )
        .unwrap();
        assert_eq!(main.items.len(), 2);

        let thread = MessageQuery {
            thread: Some(MessageId::new("m01")),
            ..messages_query(10)
        };
        let replies = local_page(
            &store,
            &PageRequest {
                spec: thread.into(),
                navigation: Navigation::Next,
                from: None,
                limit: 10,
            },
        )
        .unwrap();
        assert_eq!(replies.items.len(), 1);
    }
}
