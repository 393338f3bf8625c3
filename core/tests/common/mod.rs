#![allow(dead_code)]
// Shared fixtures for integration tests: a scripted backend and recording
// front-end ports

use async_trait::async_trait;
use rxlink_core::config::PollIntervals;
use rxlink_core::ui::{DesktopNotifier, Prompt};
use rxlink_core::{Config, LinkError, Operation, Result, Transport};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory backend. Each operation name answers with its configured
/// payload, `{"success": true}` by default, or a transport error when failed.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<&'static str, Value>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, op: &'static str, payload: Value) {
        self.failing.lock().unwrap().remove(op);
        self.routes.lock().unwrap().insert(op, payload);
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls_to(&self, op: &str) -> Vec<Operation> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name() == op)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, op: Operation) -> Result<Value> {
        let name = op.name();
        self.calls.lock().unwrap().push(op);
        if self.failing.lock().unwrap().contains(name) {
            return Err(LinkError::Transport(format!("{}: connection refused", name)));
        }
        let mut body = self
            .routes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!({}));
        body["success"] = json!(true);
        Ok(body)
    }
}

/// Prompt that records alerts and answers every confirm with `answer`
pub struct RecordingPrompt {
    pub alerts: Mutex<Vec<String>>,
    pub questions: Mutex<Vec<String>>,
    answer: bool,
}

impl RecordingPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            questions: Mutex::new(Vec::new()),
            answer,
        }
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompt for RecordingPrompt {
    async fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }

    async fn confirm(&self, question: &str) -> bool {
        self.questions.lock().unwrap().push(question.to_string());
        self.answer
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

impl DesktopNotifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

/// Viewer 1 with polling fast enough for tests
pub fn test_config() -> Config {
    Config {
        user_id: 1,
        polling: PollIntervals {
            directory: Duration::from_millis(50),
            thread: Duration::from_millis(50),
            notifications: Duration::from_millis(50),
            alerts: Duration::from_millis(50),
            chat_unread: Duration::from_millis(50),
        },
        replica_ready_timeout: Duration::from_millis(300),
        replica_ready_poll: Duration::from_millis(10),
        ..Config::default()
    }
}

pub fn message(id: i64, sender_id: i64, content: &str, sent_at: &str) -> Value {
    json!({
        "id": id,
        "conversation_id": 5,
        "sender_id": sender_id,
        "content": content,
        "sent_at": sent_at,
    })
}

pub fn conversation(id: i64, name: &str, branch: &str, unread: u32, last_at: &str) -> Value {
    json!({
        "id": id,
        "participants": [{"name": name, "role": "pharmacist", "branch": branch}],
        "last_message": "see you",
        "last_message_at": last_at,
        "unread_count": unread,
    })
}
