/// View models handed to front ends. Built from component state by reference;
/// nothing in here talks to the server.
use crate::directory::DirectoryListing;
use crate::notifications::{Badge, FeedTab, NotificationAggregator};
use crate::thread::{ChatState, ThreadPhase};
use crate::types::{DeliveryStatus, EntryId, NotificationItem};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const EMPTY_THREAD: &str = "No messages yet. Say hello!";
pub const EMPTY_DIRECTORY: &str = "No other users yet.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRow {
    pub id: i64,
    pub label: String,
    pub branches: String,
    pub preview: String,
    pub time: Option<String>,
    pub unread: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub subtitle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryPanel {
    Loading,
    Conversations { rows: Vec<ConversationRow> },
    Users { rows: Vec<UserRow> },
    Empty { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRow {
    pub id: EntryId,
    pub mine: bool,
    pub content: String,
    pub time: String,
    pub status: Option<DeliveryStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadPanel {
    pub conversation_id: i64,
    pub title: String,
    pub loading: bool,
    pub messages: Vec<MessageRow>,
    pub empty_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Directory(DirectoryPanel),
    Thread(ThreadPanel),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRow {
    pub source: &'static str,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub time: String,
    pub unread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPanel {
    pub tab: FeedTab,
    pub rows: Vec<FeedRow>,
    pub empty_state: Option<String>,
}

/// Everything a window shows at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub screen: Screen,
    pub badge: Badge,
    pub feed: FeedPanel,
    pub zoomed: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            screen: Screen::Directory(DirectoryPanel::Loading),
            badge: Badge {
                count: 0,
                overflow: false,
                label: None,
            },
            feed: FeedPanel {
                tab: FeedTab::All,
                rows: Vec::new(),
                empty_state: Some(empty_feed_text(FeedTab::All).to_string()),
            },
            zoomed: false,
        }
    }
}

/// `HH:MM` for today, `Mar 01` otherwise
pub fn format_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if at.date_naive() == now.date_naive() {
        at.format("%H:%M").to_string()
    } else {
        at.format("%b %d").to_string()
    }
}

pub fn render_directory(listing: &DirectoryListing, now: DateTime<Utc>) -> DirectoryPanel {
    match listing {
        DirectoryListing::Loading => DirectoryPanel::Loading,
        DirectoryListing::Conversations(list) => DirectoryPanel::Conversations {
            rows: list
                .iter()
                .map(|c| ConversationRow {
                    id: c.id,
                    label: c.label(),
                    branches: c.branches().join(", "),
                    preview: c.last_message.clone().unwrap_or_default(),
                    time: c.last_message_at.map(|at| format_time(at, now)),
                    unread: c.unread_count,
                })
                .collect(),
        },
        DirectoryListing::Users(users) => DirectoryPanel::Users {
            rows: users
                .iter()
                .map(|u| UserRow {
                    id: u.id,
                    name: u.name.clone(),
                    subtitle: [u.role.as_str(), u.branch.as_str()]
                        .iter()
                        .filter(|s| !s.is_empty())
                        .copied()
                        .collect::<Vec<_>>()
                        .join(" · "),
                })
                .collect(),
        },
        DirectoryListing::Empty => DirectoryPanel::Empty {
            message: EMPTY_DIRECTORY.to_string(),
        },
    }
}

/// `None` when no thread is open
pub fn render_thread(state: &ChatState, viewer_id: i64, now: DateTime<Utc>) -> Option<ThreadPanel> {
    let conversation_id = state.conversation_id?;
    let messages: Vec<MessageRow> = state
        .entries
        .iter()
        .map(|e| MessageRow {
            id: e.id,
            mine: e.sender_id == viewer_id,
            content: e.content.clone(),
            time: format_time(e.sent_at, now),
            status: e.status,
        })
        .collect();
    let loading = state.phase == ThreadPhase::Loading;
    let empty_state = (!loading && messages.is_empty()).then(|| EMPTY_THREAD.to_string());
    Some(ThreadPanel {
        conversation_id,
        title: state.label.clone(),
        loading,
        messages,
        empty_state,
    })
}

fn empty_feed_text(tab: FeedTab) -> &'static str {
    match tab {
        FeedTab::All => "You're all caught up.",
        FeedTab::Alerts => "No inventory alerts.",
        FeedTab::Chat => "No unread messages.",
    }
}

fn source_tag(item: &NotificationItem) -> &'static str {
    match item {
        NotificationItem::Generic { .. } => "notice",
        NotificationItem::Alert { .. } => "alert",
        NotificationItem::Chat { .. } => "chat",
    }
}

pub fn render_feed(aggregator: &NotificationAggregator, now: DateTime<Utc>) -> FeedPanel {
    let tab = aggregator.tab();
    let rows: Vec<FeedRow> = aggregator
        .feed()
        .into_iter()
        .map(|item| FeedRow {
            source: source_tag(item),
            title: item.title().to_string(),
            message: item.message().to_string(),
            link: item.link().map(str::to_string),
            time: format_time(item.created_at(), now),
            unread: !item.is_read(),
        })
        .collect();
    let empty_state = rows.is_empty().then(|| empty_feed_text(tab).to_string());
    FeedPanel {
        tab,
        rows,
        empty_state,
    }
}
