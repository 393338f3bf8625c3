/// Message thread controller: loads the open thread, renders it in server
/// order and reconciles optimistic sends against later polls
use crate::api::ChatApi;
use crate::error::{LinkError, Result};
use crate::types::{DeliveryStatus, EntryId, Message, ThreadEntry};
use crate::ui::Prompt;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DELETE_QUESTION: &str = "Delete all messages in this conversation?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPhase {
    Idle,
    Loading,
    Loaded,
}

/// Chat UI state, owned by the controller and handed to renderers by reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub conversation_id: Option<i64>,
    pub label: String,
    pub phase: ThreadPhase,
    /// Confirmed entries in server order, then pending ones in send order
    pub entries: Vec<ThreadEntry>,
    /// Set in the replica window
    pub zoomed: bool,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            label: String::new(),
            phase: ThreadPhase::Idle,
            entries: Vec::new(),
            zoomed: false,
        }
    }
}

/// Ties a response to the view that asked for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTicket {
    pub conversation_id: i64,
    generation: u64,
}

/// An optimistic entry waiting for its send to resolve
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub ticket: ThreadTicket,
    pub token: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Rendered,
    /// Same count, nothing confirmed; skip the re-render
    Unchanged,
    Failed,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Cleared,
    /// Delete failed; fetch the thread again to restore it
    Refetch,
    Stale,
}

pub struct ThreadController {
    viewer_id: i64,
    reconcile_window: chrono::Duration,
    state: ChatState,
    generation: u64,
}

impl ThreadController {
    pub fn new(viewer_id: i64, reconcile_window: Duration) -> Self {
        Self::restore(viewer_id, reconcile_window, ChatState::default())
    }

    pub fn restore(viewer_id: i64, reconcile_window: Duration, state: ChatState) -> Self {
        let reconcile_window = chrono::Duration::from_std(reconcile_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        Self {
            viewer_id,
            reconcile_window,
            state,
            generation: 0,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn viewer_id(&self) -> i64 {
        self.viewer_id
    }

    pub fn is_open(&self) -> bool {
        self.state.conversation_id.is_some()
    }

    pub fn set_zoomed(&mut self, zoomed: bool) {
        self.state.zoomed = zoomed;
    }

    /// Idle/Loaded → Loading. Invalidates every ticket issued before.
    pub fn open(&mut self, conversation_id: i64, label: String) -> ThreadTicket {
        self.generation += 1;
        self.state.conversation_id = Some(conversation_id);
        self.state.label = label;
        self.state.phase = ThreadPhase::Loading;
        self.state.entries.clear();
        info!("Opened conversation {}", conversation_id);
        ThreadTicket {
            conversation_id,
            generation: self.generation,
        }
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.state.conversation_id = None;
        self.state.label.clear();
        self.state.phase = ThreadPhase::Idle;
        self.state.entries.clear();
    }

    /// Ticket for a fetch of the thread currently open
    pub fn ticket(&self) -> Option<ThreadTicket> {
        self.state.conversation_id.map(|conversation_id| ThreadTicket {
            conversation_id,
            generation: self.generation,
        })
    }

    fn is_current(&self, ticket: ThreadTicket) -> bool {
        ticket.generation == self.generation
            && self.state.conversation_id == Some(ticket.conversation_id)
    }

    /// Apply a fetched message list, for the initial load and for polls alike
    pub fn apply_messages(
        &mut self,
        ticket: ThreadTicket,
        result: Result<Vec<Message>>,
    ) -> PollOutcome {
        if !self.is_current(ticket) {
            debug!(
                "Dropping stale messages for conversation {}",
                ticket.conversation_id
            );
            return PollOutcome::Stale;
        }
        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Thread refresh failed: {}", e);
                return PollOutcome::Failed;
            }
        };

        let first_load = self.state.phase == ThreadPhase::Loading;
        let confirmed_before = self
            .state
            .entries
            .iter()
            .filter(|e| !e.is_pending())
            .count();
        let server_count = messages.len();
        let (entries, matched) = self.reconcile(messages);

        if first_load || server_count != confirmed_before || matched > 0 {
            self.state.entries = entries;
            self.state.phase = ThreadPhase::Loaded;
            PollOutcome::Rendered
        } else {
            PollOutcome::Unchanged
        }
    }

    /// Server list becomes the confirmed sequence. A pending entry whose send
    /// echoed a server id is superseded by that message. Otherwise it is
    /// superseded by the first not-yet-rendered server message with the same
    /// sender and content inside the reconcile window.
    fn reconcile(&self, server: Vec<Message>) -> (Vec<ThreadEntry>, usize) {
        let known: HashSet<i64> = self
            .state
            .entries
            .iter()
            .filter_map(|e| match e.id {
                EntryId::Server(id) => Some(id),
                EntryId::Pending(_) => None,
            })
            .collect();

        let mut claimed = vec![false; server.len()];
        let mut kept = Vec::new();
        let mut matched = 0;

        for entry in self.state.entries.iter().filter(|e| e.is_pending()) {
            let hit = match entry.confirmed_id {
                Some(confirmed) => server
                    .iter()
                    .enumerate()
                    .position(|(i, m)| !claimed[i] && m.id == confirmed),
                None => server.iter().enumerate().position(|(i, m)| {
                    !claimed[i]
                        && !known.contains(&m.id)
                        && m.sender_id == entry.sender_id
                        && m.content == entry.content
                        && within(m.sent_at - entry.sent_at, self.reconcile_window)
                }),
            };
            match hit {
                Some(i) => {
                    claimed[i] = true;
                    matched += 1;
                }
                None => kept.push(entry.clone()),
            }
        }

        let entries = server
            .into_iter()
            .map(ThreadEntry::confirmed)
            .chain(kept)
            .collect();
        (entries, matched)
    }

    /// Append an optimistic entry in state `sending`
    pub fn begin_send(&mut self, content: &str) -> Result<PendingSend> {
        let ticket = self
            .ticket()
            .ok_or_else(|| LinkError::Validation("No conversation selected".to_string()))?;
        let content = content.trim();
        if content.is_empty() {
            return Err(LinkError::Validation("Message cannot be empty".to_string()));
        }

        let token = Uuid::new_v4();
        self.state.entries.push(ThreadEntry::pending(
            token,
            self.viewer_id,
            content.to_string(),
            Utc::now(),
        ));

        Ok(PendingSend {
            ticket,
            token,
            content: content.to_string(),
        })
    }

    /// Move a failed entry back to `sending`; the retry reuses its token
    pub fn begin_retry(&mut self, token: Uuid) -> Result<PendingSend> {
        let ticket = self
            .ticket()
            .ok_or_else(|| LinkError::Validation("No conversation selected".to_string()))?;
        let entry = self
            .state
            .entries
            .iter_mut()
            .find(|e| e.id == EntryId::Pending(token))
            .ok_or_else(|| LinkError::Validation("Message is no longer pending".to_string()))?;
        if entry.status != Some(DeliveryStatus::Failed) {
            return Err(LinkError::Validation(
                "Only failed messages can be retried".to_string(),
            ));
        }
        entry.status = Some(DeliveryStatus::Sending);
        Ok(PendingSend {
            ticket,
            token,
            content: entry.content.clone(),
        })
    }

    /// Resolve a send: `sent` on success, `failed` otherwise. Returns the new
    /// status, or `None` when the entry is gone (view left or already confirmed).
    pub fn finish_send(
        &mut self,
        send: &PendingSend,
        result: &Result<Option<Message>>,
    ) -> Option<DeliveryStatus> {
        if !self.is_current(send.ticket) {
            return None;
        }
        let pos = self
            .state
            .entries
            .iter()
            .position(|e| e.id == EntryId::Pending(send.token))?;
        let status = match result {
            Ok(echoed) => {
                if let Some(msg) = echoed {
                    // A poll already rendered the server copy
                    if self
                        .state
                        .entries
                        .iter()
                        .any(|e| e.id == EntryId::Server(msg.id))
                    {
                        self.state.entries.remove(pos);
                        return Some(DeliveryStatus::Sent);
                    }
                    self.state.entries[pos].confirmed_id = Some(msg.id);
                }
                DeliveryStatus::Sent
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                DeliveryStatus::Failed
            }
        };
        self.state.entries[pos].status = Some(status);
        Some(status)
    }

    /// State for another window. Sends in flight resolve only here, so over
    /// there they show as failed and can be retried.
    pub fn handoff_state(&self) -> ChatState {
        let mut state = self.state.clone();
        for entry in &mut state.entries {
            if entry.status == Some(DeliveryStatus::Sending) {
                entry.status = Some(DeliveryStatus::Failed);
            }
        }
        state
    }

    /// The n-th failed entry in render order (1-based), for `/retry <n>`
    pub fn failed_entry(&self, n: usize) -> Option<Uuid> {
        self.state
            .entries
            .iter()
            .filter(|e| e.status == Some(DeliveryStatus::Failed))
            .nth(n.checked_sub(1)?)
            .and_then(ThreadEntry::pending_id)
    }

    pub fn begin_delete(&self) -> Result<(ThreadTicket, Uuid)> {
        let ticket = self
            .ticket()
            .ok_or_else(|| LinkError::Validation("No conversation selected".to_string()))?;
        Ok((ticket, Uuid::new_v4()))
    }

    pub fn finish_delete(&mut self, ticket: ThreadTicket, result: &Result<()>) -> DeleteOutcome {
        if !self.is_current(ticket) {
            return DeleteOutcome::Stale;
        }
        match result {
            Ok(()) => {
                self.state.entries.clear();
                self.state.phase = ThreadPhase::Loaded;
                DeleteOutcome::Cleared
            }
            Err(e) => {
                warn!("Delete failed: {}", e);
                DeleteOutcome::Refetch
            }
        }
    }

    // ─── Direct (non-session) drivers ───────────────────────────────────────

    /// Fetch the open thread and apply it
    pub async fn refresh(&mut self, api: &ChatApi) -> PollOutcome {
        let Some(ticket) = self.ticket() else {
            return PollOutcome::Stale;
        };
        let result = api.get_messages(ticket.conversation_id).await;
        self.apply_messages(ticket, result)
    }

    pub async fn send(&mut self, api: &ChatApi, content: &str) -> Result<DeliveryStatus> {
        let send = self.begin_send(content)?;
        let result = api
            .send_message(send.ticket.conversation_id, send.content.clone(), send.token)
            .await;
        let status = self.finish_send(&send, &result);
        result?;
        Ok(status.unwrap_or(DeliveryStatus::Sent))
    }

    /// Ask, then clear. Returns `false` when the user declined.
    pub async fn delete_all(&mut self, api: &ChatApi, prompt: &dyn Prompt) -> Result<bool> {
        let (ticket, token) = self.begin_delete()?;
        if !prompt.confirm(DELETE_QUESTION).await {
            return Ok(false);
        }
        let result = api.delete_messages(ticket.conversation_id, token).await;
        if self.finish_delete(ticket, &result) == DeleteOutcome::Refetch {
            self.refresh(api).await;
        }
        result.map(|_| true)
    }
}

fn within(skew: chrono::Duration, window: chrono::Duration) -> bool {
    skew <= window && skew >= -window
}
