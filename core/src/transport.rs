/// Transport client: named request/response operations against the branch server
///
/// Endpoints (relative to `Config::api_base`):
///   GET    /api/chat/conversations
///   GET    /api/chat/users
///   GET    /api/chat/conversations/:id/messages
///   POST   /api/chat/conversations/:id/messages   body: {"content":"...","client_token":"<uuid>"}
///   POST   /api/chat/conversations                body: {"recipient_id":N}
///   DELETE /api/chat/conversations/:id/messages   body: {"client_token":"<uuid>"}
///   GET    /api/notifications
///   GET    /api/inventory/alerts
///   POST   /api/notifications/:id/read
///   POST   /api/notifications/read-all
///
/// Every response carries `{"success": bool, "error"?: string}` next to its payload.
use crate::config::Config;
use crate::error::{LinkError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// One named server operation with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    GetConversations,
    GetUsers,
    GetMessages {
        conversation_id: i64,
    },
    SendMessage {
        conversation_id: i64,
        content: String,
        client_token: Uuid,
    },
    CreateConversation {
        recipient_id: i64,
    },
    DeleteMessages {
        conversation_id: i64,
        client_token: Uuid,
    },
    GetNotifications,
    GetInventoryAlerts,
    MarkRead {
        notification_id: i64,
    },
    MarkAllRead,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetConversations => "get_conversations",
            Operation::GetUsers => "get_users",
            Operation::GetMessages { .. } => "get_messages",
            Operation::SendMessage { .. } => "send_message",
            Operation::CreateConversation { .. } => "create_conversation",
            Operation::DeleteMessages { .. } => "delete_messages",
            Operation::GetNotifications => "get_notifications",
            Operation::GetInventoryAlerts => "get_inventory_alerts",
            Operation::MarkRead { .. } => "mark_read",
            Operation::MarkAllRead => "mark_all_read",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Operation::GetConversations
            | Operation::GetUsers
            | Operation::GetMessages { .. }
            | Operation::GetNotifications
            | Operation::GetInventoryAlerts => Method::GET,
            Operation::DeleteMessages { .. } => Method::DELETE,
            Operation::SendMessage { .. }
            | Operation::CreateConversation { .. }
            | Operation::MarkRead { .. }
            | Operation::MarkAllRead => Method::POST,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Operation::GetConversations | Operation::CreateConversation { .. } => {
                "/api/chat/conversations".to_string()
            }
            Operation::GetUsers => "/api/chat/users".to_string(),
            Operation::GetMessages { conversation_id }
            | Operation::SendMessage {
                conversation_id, ..
            }
            | Operation::DeleteMessages {
                conversation_id, ..
            } => format!("/api/chat/conversations/{}/messages", conversation_id),
            Operation::GetNotifications => "/api/notifications".to_string(),
            Operation::GetInventoryAlerts => "/api/inventory/alerts".to_string(),
            Operation::MarkRead { notification_id } => {
                format!("/api/notifications/{}/read", notification_id)
            }
            Operation::MarkAllRead => "/api/notifications/read-all".to_string(),
        }
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            Operation::SendMessage {
                content,
                client_token,
                ..
            } => Some(serde_json::json!({
                "content": content,
                "client_token": client_token,
            })),
            Operation::CreateConversation { recipient_id } => {
                Some(serde_json::json!({ "recipient_id": recipient_id }))
            }
            Operation::DeleteMessages { client_token, .. } => {
                Some(serde_json::json!({ "client_token": client_token }))
            }
            _ => None,
        }
    }

    /// Token the server can use to collapse retried writes
    pub fn idempotency_key(&self) -> Option<Uuid> {
        match self {
            Operation::SendMessage { client_token, .. }
            | Operation::DeleteMessages { client_token, .. } => Some(*client_token),
            _ => None,
        }
    }
}

/// Request/response access to the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the whole JSON object of a successful response
    async fn call(&self, op: Operation) -> Result<Value>;
}

/// Validate the `{success, error?}` envelope of a response body
pub fn check_envelope(op: &str, body: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| LinkError::Transport(format!("{}: invalid JSON response: {}", op, e)))?;

    match value.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(value),
        _ => {
            let reason = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("server reported failure");
            Err(LinkError::Transport(format!("{}: {}", op, reason)))
        }
    }
}

/// HTTP implementation over hyper
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    base: String,
    cookie: Option<String>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            cookie: config.session_cookie.clone(),
            request_timeout: config.request_timeout,
        }
    }

    fn build_request(&self, op: &Operation) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(op.method())
            .uri(format!("{}{}", self.base, op.path()))
            .header(ACCEPT, "application/json");

        if let Some(cookie) = &self.cookie {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(key) = op.idempotency_key() {
            builder = builder.header("Idempotency-Key", key.to_string());
        }

        let body = match op.body() {
            Some(v) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(&v)?)
            }
            None => Bytes::new(),
        };

        builder
            .body(Full::new(body))
            .map_err(|e| LinkError::Transport(format!("{}: {}", op.name(), e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, op: Operation) -> Result<Value> {
        let name = op.name();
        let req = self.build_request(&op)?;
        debug!("{} {} {}", name, req.method(), req.uri());

        let resp = timeout(self.request_timeout, self.client.request(req))
            .await
            .map_err(|_| LinkError::Transport(format!("{}: request timed out", name)))?
            .map_err(|e| LinkError::Transport(format!("{}: {}", name, e)))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| LinkError::Transport(format!("{}: body read error: {}", name, e)))?
            .to_bytes();

        if !status.is_success() {
            // Keep the server's reason when it sent one
            let reason = check_envelope(name, &body)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(LinkError::Transport(format!(
                "{}: HTTP {} {}",
                name,
                status.as_u16(),
                reason
            )));
        }

        check_envelope(name, &body)
    }
}
