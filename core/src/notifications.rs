/// Notification aggregator: three independently polled partitions (generic,
/// inventory alerts, unread chat) merged into one recency-ordered feed with a
/// single badge, plus the at-most-once desktop push gate for chat
use crate::error::{LinkError, Result};
use crate::marker_store::MarkerStore;
use crate::types::{Conversation, InventoryAlert, NotificationItem, NotificationsPayload};
use crate::ui::DesktopNotifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Generic,
    Alerts,
    Chat,
}

impl Partition {
    fn index(self) -> usize {
        match self {
            Partition::Generic => 0,
            Partition::Alerts => 1,
            Partition::Chat => 2,
        }
    }
}

/// Render-time filter over the merged feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTab {
    #[default]
    All,
    Alerts,
    Chat,
}

impl FeedTab {
    pub fn admits(self, item: &NotificationItem) -> bool {
        match self {
            FeedTab::All => true,
            FeedTab::Alerts => item.is_alert(),
            FeedTab::Chat => item.is_chat(),
        }
    }
}

impl FromStr for FeedTab {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(FeedTab::All),
            "alerts" => Ok(FeedTab::Alerts),
            "chat" => Ok(FeedTab::Chat),
            other => Err(LinkError::Validation(format!("Unknown tab: {}", other))),
        }
    }
}

/// The three badge sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    pub unread: u32,
    pub alerts: u32,
    pub chat: u32,
}

impl Counters {
    pub fn total(&self) -> u32 {
        self.unread
            .saturating_add(self.alerts)
            .saturating_add(self.chat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub count: u32,
    pub overflow: bool,
    /// `None` hides the badge
    pub label: Option<String>,
}

impl Badge {
    pub fn from_counters(counters: &Counters, ceiling: u32) -> Self {
        let count = counters.total();
        let overflow = count > ceiling;
        let label = match count {
            0 => None,
            _ if overflow => Some(format!("{}+", ceiling)),
            n => Some(n.to_string()),
        };
        Self {
            count,
            overflow,
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedTicket {
    partition: Partition,
    seq: u64,
}

/// Serialisable aggregator state, for the replica handoff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub generic: Vec<NotificationItem>,
    pub alerts: Vec<NotificationItem>,
    pub chat: Vec<NotificationItem>,
    pub counters: Counters,
    pub tab: FeedTab,
}

pub struct NotificationAggregator {
    generic: Vec<NotificationItem>,
    alerts: Vec<NotificationItem>,
    chat: Vec<NotificationItem>,
    counters: Counters,
    tab: FeedTab,
    ceiling: u32,
    issued: [u64; 3],
    applied: [u64; 3],
}

impl NotificationAggregator {
    pub fn new(ceiling: u32) -> Self {
        Self::restore(FeedSnapshot::default(), ceiling)
    }

    pub fn restore(snapshot: FeedSnapshot, ceiling: u32) -> Self {
        Self {
            generic: snapshot.generic,
            alerts: snapshot.alerts,
            chat: snapshot.chat,
            counters: snapshot.counters,
            tab: snapshot.tab,
            ceiling,
            issued: [0; 3],
            applied: [0; 3],
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            generic: self.generic.clone(),
            alerts: self.alerts.clone(),
            chat: self.chat.clone(),
            counters: self.counters,
            tab: self.tab,
        }
    }

    pub fn begin(&mut self, partition: Partition) -> FeedTicket {
        let i = partition.index();
        self.issued[i] += 1;
        FeedTicket {
            partition,
            seq: self.issued[i],
        }
    }

    /// Older than what the partition already shows
    fn accept(&mut self, ticket: FeedTicket) -> bool {
        let i = ticket.partition.index();
        if ticket.seq < self.applied[i] {
            debug!("Dropping stale {:?} feed (ticket {})", ticket.partition, ticket.seq);
            return false;
        }
        self.applied[i] = ticket.seq;
        true
    }

    fn has_applied(&self, partition: Partition) -> bool {
        self.applied[partition.index()] > 0
    }

    /// Replace the generic partition. The server summary seeds the alert and
    /// chat counters only until those partitions have been polled themselves.
    pub fn apply_generic(
        &mut self,
        ticket: FeedTicket,
        result: Result<NotificationsPayload>,
    ) -> bool {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Notification poll failed: {}", e);
                return false;
            }
        };
        if !self.accept(ticket) {
            return false;
        }
        self.generic = dedup_by_key(
            payload
                .notifications
                .into_iter()
                .map(NotificationItem::from_generic),
        );
        self.counters.unread = payload.unread_count;
        if !self.has_applied(Partition::Alerts) {
            self.counters.alerts = payload.alerts_count;
        }
        if !self.has_applied(Partition::Chat) {
            self.counters.chat = payload.chat_count;
        }
        true
    }

    pub fn apply_alerts(
        &mut self,
        ticket: FeedTicket,
        result: Result<Vec<InventoryAlert>>,
        polled_at: DateTime<Utc>,
    ) -> bool {
        let alerts = match result {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!("Inventory alert poll failed: {}", e);
                return false;
            }
        };
        if !self.accept(ticket) {
            return false;
        }
        self.alerts = dedup_by_key(
            alerts
                .iter()
                .map(|a| NotificationItem::from_alert(a, polled_at)),
        );
        self.counters.alerts = self.alerts.len() as u32;
        true
    }

    pub fn apply_chat(
        &mut self,
        ticket: FeedTicket,
        result: Result<&[Conversation]>,
        polled_at: DateTime<Utc>,
    ) -> bool {
        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Chat unread poll failed: {}", e);
                return false;
            }
        };
        if !self.accept(ticket) {
            return false;
        }
        self.chat = dedup_by_key(
            conversations
                .iter()
                .filter_map(|c| NotificationItem::from_conversation(c, polled_at)),
        );
        self.counters.chat = self.chat.iter().fold(0u32, |acc, item| match item {
            NotificationItem::Chat { unread, .. } => acc.saturating_add(*unread),
            _ => acc,
        });
        true
    }

    /// Local effect of a successful mark-read call
    pub fn apply_mark_read(&mut self, notification_id: i64) -> bool {
        for item in &mut self.generic {
            if let NotificationItem::Generic { id, read, .. } = item {
                if *id == notification_id {
                    if !*read {
                        *read = true;
                        self.counters.unread = self.counters.unread.saturating_sub(1);
                    }
                    return true;
                }
            }
        }
        false
    }

    pub fn apply_mark_all_read(&mut self) {
        for item in &mut self.generic {
            if let NotificationItem::Generic { read, .. } = item {
                *read = true;
            }
        }
        self.counters.unread = 0;
    }

    pub fn tab(&self) -> FeedTab {
        self.tab
    }

    pub fn set_tab(&mut self, tab: FeedTab) {
        self.tab = tab;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn badge(&self) -> Badge {
        Badge::from_counters(&self.counters, self.ceiling)
    }

    /// Merged feed for the selected tab, newest first
    pub fn feed(&self) -> Vec<&NotificationItem> {
        let mut items: Vec<&NotificationItem> = self
            .generic
            .iter()
            .chain(self.alerts.iter())
            .chain(self.chat.iter())
            .filter(|item| self.tab.admits(item))
            .collect();
        items.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        items
    }
}

/// First row per identity wins; servers repeat rows across joins
fn dedup_by_key(items: impl Iterator<Item = NotificationItem>) -> Vec<NotificationItem> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.key())).collect()
}

/// At-most-one desktop push per (conversation, last message time)
#[derive(Clone)]
pub struct PushGate {
    markers: MarkerStore,
    notifier: Arc<dyn DesktopNotifier>,
    enabled: bool,
}

impl PushGate {
    pub fn new(markers: MarkerStore, notifier: Arc<dyn DesktopNotifier>, enabled: bool) -> Self {
        Self {
            markers,
            notifier,
            enabled,
        }
    }

    /// Raise the notification unless a marker exists; returns whether one was
    /// shown. `quiet` still writes the marker without showing anything.
    pub fn push(
        &self,
        conversation_id: i64,
        at: DateTime<Utc>,
        title: &str,
        body: &str,
        quiet: bool,
    ) -> Result<bool> {
        if !self.markers.insert(conversation_id, at)? {
            return Ok(false);
        }
        if !self.enabled || quiet {
            return Ok(false);
        }
        self.notifier.notify(title, body);
        Ok(true)
    }

    /// Push every unread conversation; the one currently open stays quiet
    pub fn push_unread(&self, conversations: &[Conversation], open: Option<i64>) -> usize {
        let mut shown = 0;
        for conv in conversations.iter().filter(|c| c.unread_count > 0) {
            // No timestamp, no stable marker
            let Some(at) = conv.last_message_at else {
                continue;
            };
            let body = conv.last_message.clone().unwrap_or_default();
            match self.push(conv.id, at, &conv.label(), &body, open == Some(conv.id)) {
                Ok(true) => shown += 1,
                Ok(false) => {}
                Err(e) => warn!("Desktop push for conversation {} failed: {}", conv.id, e),
            }
        }
        shown
    }
}
