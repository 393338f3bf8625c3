/// HTTP transport tests against a loopback hyper server
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rxlink_core::api::ChatApi;
use rxlink_core::{Config, HttpTransport, LinkError};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

/// What the server saw: method, path, idempotency key, cookie, JSON body
type Seen = Arc<Mutex<Vec<(Method, String, Option<String>, Option<String>, Value)>>>;

fn json_resp(status: StatusCode, value: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(value.to_string())))
        .unwrap()
}

async fn route(req: Request<hyper::body::Incoming>, seen: Seen) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let key = header("Idempotency-Key");
    let cookie = header("Cookie");
    let body = req.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    seen.lock()
        .unwrap()
        .push((method.clone(), path.clone(), key, cookie, body));

    match (method, path.as_str()) {
        (Method::GET, "/api/chat/conversations") => json_resp(
            StatusCode::OK,
            json!({
                "success": true,
                "conversations": [{
                    "ConversationID": 5,
                    "Participants": [{"Name": "Ana", "Branch": "North"}],
                    "LastMessage": "see you",
                    "LastMessageTime": "2026-03-01 09:00:00",
                    "UnreadCount": 2
                }]
            }),
        ),
        (Method::POST, "/api/chat/conversations/5/messages") => json_resp(
            StatusCode::OK,
            json!({
                "success": true,
                "message": {
                    "id": 10, "conversation_id": 5, "sender_id": 1,
                    "content": "hello", "sent_at": "2026-03-01T09:01:00Z"
                }
            }),
        ),
        (Method::GET, "/api/notifications") => json_resp(
            StatusCode::OK,
            json!({ "success": false, "error": "Session expired" }),
        ),
        (Method::GET, "/api/inventory/alerts") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("<b>Fatal error</b>")))
            .unwrap(),
        (Method::GET, "/api/chat/users") => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            json_resp(StatusCode::OK, json!({ "success": true, "users": [] }))
        }
        _ => json_resp(
            StatusCode::NOT_FOUND,
            json!({ "success": false, "error": "Not found" }),
        ),
    }
}

async fn spawn_server() -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let server_seen = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let io = TokioIo::new(stream);
            let seen = server_seen.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let seen = seen.clone();
                    async move { Ok::<_, Infallible>(route(req, seen).await) }
                });
                let _ = http1::Builder::new().serve_connection(io, svc).await;
            });
        }
    });
    (addr, seen)
}

fn api_for(addr: SocketAddr) -> ChatApi {
    let config = Config {
        api_base: format!("http://{}/", addr),
        user_id: 1,
        session_cookie: Some("PHPSESSID=abc123".to_string()),
        request_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    ChatApi::new(Arc::new(HttpTransport::new(&config)))
}

#[tokio::test]
async fn test_reads_legacy_field_names_and_forwards_cookie() {
    let (addr, seen) = spawn_server().await;
    let api = api_for(addr);

    let conversations = api.get_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, 5);
    assert_eq!(conversations[0].label(), "Ana");
    assert_eq!(conversations[0].unread_count, 2);
    assert!(conversations[0].last_message_at.is_some());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].3.as_deref(), Some("PHPSESSID=abc123"));
}

#[tokio::test]
async fn test_send_carries_idempotency_key() {
    let (addr, seen) = spawn_server().await;
    let api = api_for(addr);
    let token = Uuid::new_v4();

    let sent = api
        .send_message(5, "hello".to_string(), token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.id, 10);

    let seen = seen.lock().unwrap();
    let (method, path, key, _, body) = &seen[0];
    assert_eq!(*method, Method::POST);
    assert_eq!(path, "/api/chat/conversations/5/messages");
    assert_eq!(key.as_deref(), Some(token.to_string().as_str()));
    assert_eq!(body["content"], "hello");
    assert_eq!(body["client_token"], token.to_string());
}

#[tokio::test]
async fn test_every_failure_is_a_transport_error() {
    let (addr, _) = spawn_server().await;
    let api = api_for(addr);

    // success: false
    let err = api.get_notifications().await.unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    assert!(err.to_string().contains("Session expired"));

    // Non-JSON body
    assert!(matches!(
        api.get_inventory_alerts().await,
        Err(LinkError::Transport(_))
    ));

    // Non-success status
    assert!(matches!(
        api.mark_read(42).await,
        Err(LinkError::Transport(_))
    ));

    // Timed out
    assert!(matches!(api.get_users().await, Err(LinkError::Transport(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    // Bind then drop so nothing listens on the port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = api_for(addr);
    assert!(matches!(
        api.get_conversations().await,
        Err(LinkError::Transport(_))
    ));
}
