/// Conversation directory: the deduplicated conversation list, falling back to
/// the user list so the panel is never empty while another user exists
use crate::api::ChatApi;
use crate::error::Result;
use crate::thread::{ThreadController, ThreadTicket};
use crate::types::{Conversation, UserDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// What the directory panel currently shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum DirectoryListing {
    Loading,
    Conversations(Vec<Conversation>),
    Users(Vec<UserDescriptor>),
    Empty,
}

/// Issued per refresh; results carrying an older ticket than the one on
/// screen are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Rendered,
    /// Conversations failed or came back empty; fetch users next
    NeedsUserFallback,
    /// Nothing changed on screen
    Failed,
    Stale,
}

/// First-seen wins, by id and then by participant name + branch
pub fn dedup_conversations(list: Vec<Conversation>) -> Vec<Conversation> {
    let mut ids = HashSet::new();
    let mut keys = HashSet::new();
    list.into_iter()
        .filter(|conv| {
            if !ids.insert(conv.id) {
                return false;
            }
            match conv.identity_key() {
                Some(key) => keys.insert(key),
                None => true,
            }
        })
        .collect()
}

/// First-seen wins; the viewer is never listed
pub fn dedup_users(list: Vec<UserDescriptor>, viewer_id: i64) -> Vec<UserDescriptor> {
    let mut ids = HashSet::new();
    list.into_iter()
        .filter(|u| u.id != viewer_id && ids.insert(u.id))
        .collect()
}

pub struct ConversationDirectory {
    viewer_id: i64,
    listing: DirectoryListing,
    issued: u64,
    applied: u64,
}

impl ConversationDirectory {
    pub fn new(viewer_id: i64) -> Self {
        Self {
            viewer_id,
            listing: DirectoryListing::Loading,
            issued: 0,
            applied: 0,
        }
    }

    /// Rebuild from a replica snapshot
    pub fn restore(viewer_id: i64, listing: DirectoryListing) -> Self {
        Self {
            viewer_id,
            listing,
            issued: 0,
            applied: 0,
        }
    }

    pub fn listing(&self) -> &DirectoryListing {
        &self.listing
    }

    pub fn label_for(&self, conversation_id: i64) -> Option<String> {
        match &self.listing {
            DirectoryListing::Conversations(list) => list
                .iter()
                .find(|c| c.id == conversation_id)
                .map(Conversation::label),
            _ => None,
        }
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket { seq: self.issued }
    }

    fn is_stale(&self, ticket: RefreshTicket) -> bool {
        ticket.seq < self.applied
    }

    pub fn apply_conversations(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<Conversation>>,
    ) -> RefreshOutcome {
        if self.is_stale(ticket) {
            debug!("Dropping stale conversation list (ticket {})", ticket.seq);
            return RefreshOutcome::Stale;
        }
        match result {
            Ok(list) if !list.is_empty() => {
                self.applied = ticket.seq;
                self.listing = DirectoryListing::Conversations(dedup_conversations(list));
                RefreshOutcome::Rendered
            }
            Ok(_) => RefreshOutcome::NeedsUserFallback,
            Err(e) => {
                warn!("Conversation refresh failed: {}", e);
                RefreshOutcome::NeedsUserFallback
            }
        }
    }

    pub fn apply_users(
        &mut self,
        ticket: RefreshTicket,
        result: Result<Vec<UserDescriptor>>,
    ) -> RefreshOutcome {
        if self.is_stale(ticket) {
            debug!("Dropping stale user list (ticket {})", ticket.seq);
            return RefreshOutcome::Stale;
        }
        match result {
            Ok(users) => {
                let users = dedup_users(users, self.viewer_id);
                self.applied = ticket.seq;
                self.listing = if users.is_empty() {
                    DirectoryListing::Empty
                } else {
                    DirectoryListing::Users(users)
                };
                RefreshOutcome::Rendered
            }
            Err(e) => {
                warn!("User list refresh failed: {}", e);
                if self.listing == DirectoryListing::Loading {
                    self.listing = DirectoryListing::Empty;
                }
                RefreshOutcome::Failed
            }
        }
    }

    /// Fetch conversations, falling back to users on failure or empty result
    pub async fn refresh(&mut self, api: &ChatApi) -> RefreshOutcome {
        let ticket = self.begin_refresh();
        let result = api.get_conversations().await;
        match self.apply_conversations(ticket, result) {
            RefreshOutcome::NeedsUserFallback => {
                let users = api.get_users().await;
                self.apply_users(ticket, users)
            }
            outcome => outcome,
        }
    }

    pub async fn refresh_users(&mut self, api: &ChatApi) -> RefreshOutcome {
        let ticket = self.begin_refresh();
        let users = api.get_users().await;
        self.apply_users(ticket, users)
    }

    /// Switch to the thread view; fetching is left to the thread controller
    pub fn open(
        &self,
        thread: &mut ThreadController,
        conversation_id: i64,
        label: impl Into<String>,
    ) -> ThreadTicket {
        thread.open(conversation_id, label.into())
    }

    /// Create (or reuse) a conversation with `user_id` and open it. On failure
    /// the directory stays active and the error goes back to the caller.
    pub async fn start_with(
        &self,
        api: &ChatApi,
        thread: &mut ThreadController,
        user_id: i64,
        label: impl Into<String>,
    ) -> Result<ThreadTicket> {
        let conversation_id = api.create_conversation(user_id).await?;
        Ok(self.open(thread, conversation_id, label))
    }
}
