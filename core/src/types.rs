/// Shared types for the messaging and notification layers
///
/// Wire records accept both the snake_case names and the legacy column-style
/// names (`ConversationID`, `SenderID`, ...) the branch servers still emit.
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamps arrive either as RFC3339 or as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

pub mod opt_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&dt.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
            None => Ok(None),
        }
    }
}

// ─── Conversations ───────────────────────────────────────────────────────────

/// One participant of a conversation, as seen by the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(alias = "Name", alias = "full_name")]
    pub name: String,
    #[serde(default, alias = "Role")]
    pub role: String,
    #[serde(default, alias = "Branch", alias = "branch_name")]
    pub branch: String,
}

/// Summary of one conversation thread (list view)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "ConversationID", alias = "conversation_id")]
    pub id: i64,
    /// The other participants; the viewer is not listed
    #[serde(default, alias = "Participants")]
    pub participants: Vec<Participant>,
    #[serde(default, alias = "LastMessage")]
    pub last_message: Option<String>,
    #[serde(
        default,
        alias = "LastMessageTime",
        alias = "last_message_time",
        with = "opt_timestamp"
    )]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Scoped to the viewing user
    #[serde(default, alias = "UnreadCount")]
    pub unread_count: u32,
}

impl Conversation {
    /// Display label: participant names, or a placeholder when the server sent none
    pub fn label(&self) -> String {
        if self.participants.is_empty() {
            return format!("Conversation #{}", self.id);
        }
        self.participants
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Branch labels of the other side, deduplicated, in participant order
    pub fn branches(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for p in &self.participants {
            if !p.branch.is_empty() && !out.contains(&p.branch.as_str()) {
                out.push(p.branch.as_str());
            }
        }
        out
    }

    /// Secondary identity: participant name + branch, order-independent.
    /// `None` when the row carries no participants.
    pub fn identity_key(&self) -> Option<String> {
        if self.participants.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = self
            .participants
            .iter()
            .map(|p| format!("{}@{}", p.name.trim().to_lowercase(), p.branch.trim().to_lowercase()))
            .collect();
        parts.sort();
        Some(parts.join("|"))
    }
}

/// Another user of the system (directory fallback)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDescriptor {
    #[serde(alias = "UserID", alias = "user_id")]
    pub id: i64,
    #[serde(alias = "Name", alias = "full_name")]
    pub name: String,
    #[serde(default, alias = "Role")]
    pub role: String,
    #[serde(default, alias = "Branch", alias = "branch_name")]
    pub branch: String,
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// A persisted message as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "MessageID", alias = "message_id")]
    pub id: i64,
    #[serde(alias = "ConversationID")]
    pub conversation_id: i64,
    #[serde(alias = "SenderID")]
    pub sender_id: i64,
    #[serde(alias = "Content", alias = "message")]
    pub content: String,
    #[serde(alias = "CreatedAt", alias = "created_at", alias = "timestamp", with = "timestamp")]
    pub sent_at: DateTime<Utc>,
}

/// Client-local delivery state of an unconfirmed message. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

/// Identity of a rendered thread entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryId {
    /// Server-assigned id
    Server(i64),
    /// Temporary id; doubles as the idempotency token for the send
    Pending(Uuid),
}

/// One rendered message in an open thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub id: EntryId,
    pub sender_id: i64,
    pub content: String,
    #[serde(with = "timestamp")]
    pub sent_at: DateTime<Utc>,
    /// `None` once the server-confirmed copy is merged in
    pub status: Option<DeliveryStatus>,
    /// Server id echoed back by a successful send; polls match on it first
    #[serde(default)]
    pub confirmed_id: Option<i64>,
}

impl ThreadEntry {
    pub fn confirmed(msg: Message) -> Self {
        Self {
            id: EntryId::Server(msg.id),
            sender_id: msg.sender_id,
            content: msg.content,
            sent_at: msg.sent_at,
            status: None,
            confirmed_id: None,
        }
    }

    pub fn pending(token: Uuid, sender_id: i64, content: String, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::Pending(token),
            sender_id,
            content,
            sent_at,
            status: Some(DeliveryStatus::Sending),
            confirmed_id: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.id, EntryId::Pending(_))
    }

    pub fn pending_id(&self) -> Option<Uuid> {
        match self.id {
            EntryId::Pending(id) => Some(id),
            EntryId::Server(_) => None,
        }
    }
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Generic notification row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericNotification {
    #[serde(alias = "NotificationID", alias = "notification_id")]
    pub id: i64,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(default, alias = "Message")]
    pub message: String,
    #[serde(default, alias = "Link")]
    pub link: Option<String>,
    #[serde(alias = "CreatedAt", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "IsRead", alias = "read")]
    pub is_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowStock,
    OutOfStock,
    Expiring,
    Expired,
}

impl AlertKind {
    pub fn headline(&self) -> &'static str {
        match self {
            AlertKind::LowStock => "Low stock",
            AlertKind::OutOfStock => "Out of stock",
            AlertKind::Expiring => "Expiring soon",
            AlertKind::Expired => "Expired",
        }
    }
}

/// Inventory alert row, regenerated by the server on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryAlert {
    #[serde(alias = "ProductID")]
    pub product_id: i64,
    #[serde(alias = "ProductName", alias = "name")]
    pub product_name: String,
    #[serde(default, alias = "BranchName")]
    pub branch: Option<String>,
    #[serde(alias = "type")]
    pub kind: AlertKind,
    #[serde(default, alias = "Quantity", alias = "stock")]
    pub quantity: i64,
    #[serde(default, alias = "ExpiryDate")]
    pub expiry_date: Option<NaiveDate>,
}

/// Identity used for dedup and read state; differs per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKey {
    Generic(i64),
    Alert(AlertKind, i64),
    Chat(i64),
}

/// One entry of the merged notification feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NotificationItem {
    Generic {
        id: i64,
        title: String,
        message: String,
        link: Option<String>,
        #[serde(with = "timestamp")]
        created_at: DateTime<Utc>,
        read: bool,
    },
    /// No persisted read state
    Alert {
        kind: AlertKind,
        product_id: i64,
        title: String,
        message: String,
        link: Option<String>,
        #[serde(with = "timestamp")]
        created_at: DateTime<Utc>,
    },
    Chat {
        conversation_id: i64,
        unread: u32,
        title: String,
        message: String,
        link: Option<String>,
        #[serde(with = "timestamp")]
        created_at: DateTime<Utc>,
    },
}

impl NotificationItem {
    pub fn from_generic(n: GenericNotification) -> Self {
        NotificationItem::Generic {
            id: n.id,
            title: n.title,
            message: n.message,
            link: n.link,
            created_at: n.created_at,
            read: n.is_read,
        }
    }

    /// `polled_at` stands in for the creation time, alerts carry none
    pub fn from_alert(alert: &InventoryAlert, polled_at: DateTime<Utc>) -> Self {
        let place = alert
            .branch
            .as_deref()
            .map(|b| format!(" at {}", b))
            .unwrap_or_default();
        let message = match alert.kind {
            AlertKind::LowStock => format!("Only {} left{}", alert.quantity, place),
            AlertKind::OutOfStock => format!("No stock left{}", place),
            AlertKind::Expiring => match alert.expiry_date {
                Some(date) => format!("Expires on {}{}", date, place),
                None => format!("Expiring soon{}", place),
            },
            AlertKind::Expired => match alert.expiry_date {
                Some(date) => format!("Expired on {}{}", date, place),
                None => format!("Expired{}", place),
            },
        };
        NotificationItem::Alert {
            kind: alert.kind,
            product_id: alert.product_id,
            title: format!("{}: {}", alert.kind.headline(), alert.product_name),
            message,
            link: Some(format!("/inventory?product={}", alert.product_id)),
            created_at: polled_at,
        }
    }

    /// Conversations without unread messages produce no chat item
    pub fn from_conversation(conv: &Conversation, polled_at: DateTime<Utc>) -> Option<Self> {
        if conv.unread_count == 0 {
            return None;
        }
        Some(NotificationItem::Chat {
            conversation_id: conv.id,
            unread: conv.unread_count,
            title: conv.label(),
            message: conv.last_message.clone().unwrap_or_default(),
            link: Some(format!("/chat?conversation={}", conv.id)),
            created_at: conv.last_message_at.unwrap_or(polled_at),
        })
    }

    pub fn key(&self) -> ItemKey {
        match self {
            NotificationItem::Generic { id, .. } => ItemKey::Generic(*id),
            NotificationItem::Alert {
                kind, product_id, ..
            } => ItemKey::Alert(*kind, *product_id),
            NotificationItem::Chat {
                conversation_id, ..
            } => ItemKey::Chat(*conversation_id),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            NotificationItem::Generic { title, .. }
            | NotificationItem::Alert { title, .. }
            | NotificationItem::Chat { title, .. } => title,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            NotificationItem::Generic { message, .. }
            | NotificationItem::Alert { message, .. }
            | NotificationItem::Chat { message, .. } => message,
        }
    }

    pub fn link(&self) -> Option<&str> {
        match self {
            NotificationItem::Generic { link, .. }
            | NotificationItem::Alert { link, .. }
            | NotificationItem::Chat { link, .. } => link.as_deref(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            NotificationItem::Generic { created_at, .. }
            | NotificationItem::Alert { created_at, .. }
            | NotificationItem::Chat { created_at, .. } => *created_at,
        }
    }

    /// Alerts and unread chat are always shown as unread
    pub fn is_read(&self) -> bool {
        match self {
            NotificationItem::Generic { read, .. } => *read,
            NotificationItem::Alert { .. } | NotificationItem::Chat { .. } => false,
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, NotificationItem::Alert { .. })
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, NotificationItem::Chat { .. })
    }
}

// ─── Response payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsPayload {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsersPayload {
    #[serde(default)]
    pub users: Vec<UserDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesPayload {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentPayload {
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPayload {
    #[serde(alias = "ConversationID")]
    pub conversation_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsPayload {
    #[serde(default)]
    pub notifications: Vec<GenericNotification>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub alerts_count: u32,
    #[serde(default)]
    pub chat_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsPayload {
    #[serde(default)]
    pub alerts: Vec<InventoryAlert>,
}
