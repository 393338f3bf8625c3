/// Session integration tests
/// Drive a full session against a scripted backend and watch the views it publishes
mod common;

use chrono::Utc;
use common::*;
use rxlink_core::marker_store::MarkerStore;
use rxlink_core::render::{DirectoryPanel, Screen, SessionView, ThreadPanel, EMPTY_DIRECTORY};
use rxlink_core::replica::{ReplicaEndpoint, ReplicaLauncher, ReplicaLink};
use rxlink_core::types::DeliveryStatus;
use rxlink_core::{ChatSession, Config, Operation, SessionCommand, SessionContext, SessionHandle};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct Harness {
    transport: Arc<ScriptedTransport>,
    prompt: Arc<RecordingPrompt>,
    notifier: Arc<RecordingNotifier>,
    markers: MarkerStore,
}

impl Harness {
    fn new(confirm: bool) -> Self {
        Self {
            transport: Arc::new(ScriptedTransport::new()),
            prompt: Arc::new(RecordingPrompt::answering(confirm)),
            notifier: Arc::new(RecordingNotifier::default()),
            markers: MarkerStore::temporary().unwrap(),
        }
    }

    fn context(&self) -> SessionContext {
        self.context_with(test_config())
    }

    fn context_with(&self, config: Config) -> SessionContext {
        SessionContext::with_markers(
            config,
            self.transport.clone(),
            self.prompt.clone(),
            self.notifier.clone(),
            self.markers.clone(),
        )
    }

    fn start(&self) -> SessionHandle {
        ChatSession::new(self.context()).spawn()
    }
}

async fn wait_for<F>(view: &mut watch::Receiver<SessionView>, mut pred: F) -> SessionView
where
    F: FnMut(&SessionView) -> bool,
{
    timeout(Duration::from_secs(3), async {
        loop {
            let current = view.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            if view.changed().await.is_err() {
                panic!("session stopped while waiting");
            }
        }
    })
    .await
    .expect("view never reached the expected state")
}

fn thread_panel(view: &SessionView) -> Option<&ThreadPanel> {
    match &view.screen {
        Screen::Thread(panel) => Some(panel),
        Screen::Directory(_) => None,
    }
}

fn loaded_thread(view: &SessionView) -> bool {
    thread_panel(view).map(|p| !p.loading).unwrap_or(false)
}

#[tokio::test]
async fn test_failed_send_keeps_single_entry_and_alerts_once() {
    let h = Harness::new(true);
    h.transport.respond("get_messages", json!({ "messages": [] }));
    h.transport.fail("send_message");

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: Some("Ana".to_string()),
        })
        .await
        .unwrap();
    wait_for(&mut view, loaded_thread).await;

    session
        .send(SessionCommand::Send("hello".to_string()))
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v)
            .map(|p| p.messages.iter().any(|m| m.status == Some(DeliveryStatus::Failed)))
            .unwrap_or(false)
    })
    .await;

    // Several thread polls later the failed entry is still the only one
    sleep(Duration::from_millis(200)).await;
    let current = view.borrow().clone();
    let panel = thread_panel(&current).unwrap();
    let hellos: Vec<_> = panel.messages.iter().filter(|m| m.content == "hello").collect();
    assert_eq!(hellos.len(), 1);
    assert_eq!(hellos[0].status, Some(DeliveryStatus::Failed));
    assert_eq!(h.prompt.alerts().len(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_retry_reuses_idempotency_token() {
    let h = Harness::new(true);
    h.transport.respond("get_messages", json!({ "messages": [] }));
    h.transport.fail("send_message");

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: None,
        })
        .await
        .unwrap();
    wait_for(&mut view, loaded_thread).await;
    session
        .send(SessionCommand::Send("hello".to_string()))
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v)
            .map(|p| p.messages.iter().any(|m| m.status == Some(DeliveryStatus::Failed)))
            .unwrap_or(false)
    })
    .await;

    h.transport.respond("send_message", json!({}));
    session.send(SessionCommand::Retry(1)).await.unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v)
            .map(|p| p.messages.iter().any(|m| m.status == Some(DeliveryStatus::Sent)))
            .unwrap_or(false)
    })
    .await;

    let sends = h.transport.calls_to("send_message");
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].idempotency_key(), sends[1].idempotency_key());
    assert!(sends[0].idempotency_key().is_some());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_optimistic_entry_is_replaced_by_server_copy() {
    let h = Harness::new(true);
    h.transport.respond("get_messages", json!({ "messages": [] }));

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: None,
        })
        .await
        .unwrap();
    wait_for(&mut view, loaded_thread).await;

    // Server clock three minutes ahead of ours
    let now = (Utc::now() + chrono::Duration::minutes(3)).to_rfc3339();
    h.transport.respond(
        "send_message",
        json!({ "message": message(10, 1, "hello", &now) }),
    );
    session
        .send(SessionCommand::Send("hello".to_string()))
        .await
        .unwrap();
    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(10, 1, "hello", &now)] }),
    );

    let current = wait_for(&mut view, |v| {
        thread_panel(v)
            .map(|p| p.messages.len() == 1 && p.messages[0].status.is_none())
            .unwrap_or(false)
    })
    .await;
    let panel = thread_panel(&current).unwrap();
    assert_eq!(panel.messages[0].content, "hello");
    assert!(panel.messages[0].mine);

    // Later polls never add a second copy
    sleep(Duration::from_millis(200)).await;
    assert_eq!(thread_panel(&view.borrow().clone()).unwrap().messages.len(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_conversation_rows_collapse() {
    let h = Harness::new(true);
    let at = "2026-03-01T09:00:00Z";
    h.transport.respond(
        "get_conversations",
        json!({ "conversations": [
            conversation(5, "Ana", "North", 0, at),
            conversation(5, "Ana", "North", 0, at),
            conversation(6, "Ben", "South", 0, at),
        ]}),
    );

    let session = h.start();
    let mut view = session.view();
    let current = wait_for(&mut view, |v| {
        matches!(&v.screen, Screen::Directory(DirectoryPanel::Conversations { .. }))
    })
    .await;
    match &current.screen {
        Screen::Directory(DirectoryPanel::Conversations { rows }) => {
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![5, 6]);
        }
        other => panic!("unexpected screen {:?}", other),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_directory_falls_back_to_users() {
    let h = Harness::new(true);
    h.transport
        .respond("get_conversations", json!({ "conversations": [] }));
    h.transport.respond(
        "get_users",
        json!({ "users": [
            {"id": 1, "name": "Me", "role": "admin", "branch": "HQ"},
            {"id": 2, "name": "Ana", "role": "pharmacist", "branch": "North"},
            {"id": 2, "name": "Ana", "role": "pharmacist", "branch": "North"},
        ]}),
    );

    let session = h.start();
    let mut view = session.view();
    let current = wait_for(&mut view, |v| {
        matches!(&v.screen, Screen::Directory(DirectoryPanel::Users { .. }))
    })
    .await;
    match &current.screen {
        Screen::Directory(DirectoryPanel::Users { rows }) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].id, 2);
        }
        other => panic!("unexpected screen {:?}", other),
    }

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_directory_failure_shows_friendly_empty_state() {
    let h = Harness::new(true);
    h.transport.fail("get_conversations");
    h.transport.fail("get_users");

    let session = h.start();
    let mut view = session.view();
    let current = wait_for(&mut view, |v| {
        matches!(&v.screen, Screen::Directory(DirectoryPanel::Empty { .. }))
    })
    .await;
    match &current.screen {
        Screen::Directory(DirectoryPanel::Empty { message }) => {
            assert_eq!(message, EMPTY_DIRECTORY)
        }
        other => panic!("unexpected screen {:?}", other),
    }
    // Background polls never raise alerts
    assert!(h.prompt.alerts().is_empty());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_badge_overflows_past_ceiling() {
    let h = Harness::new(true);
    h.transport.respond(
        "get_notifications",
        json!({ "notifications": [], "unread_count": 150 }),
    );

    let session = h.start();
    let mut view = session.view();
    let current = wait_for(&mut view, |v| v.badge.count > 0).await;
    assert_eq!(current.badge.count, 150);
    assert!(current.badge.overflow);
    assert_eq!(current.badge.label.as_deref(), Some("99+"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unread_chat_pushes_once_across_polls_and_windows() {
    let h = Harness::new(true);
    h.transport.respond(
        "get_conversations",
        json!({ "conversations": [conversation(7, "Ben", "South", 2, "2026-03-01T09:00:00Z")] }),
    );

    let session = h.start();
    let mut view = session.view();
    wait_for(&mut view, |v| v.badge.count >= 2).await;
    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.notifier.shown().len(), 1);
    assert_eq!(h.notifier.shown()[0].0, "Ben");

    // A second window over the same markers stays quiet
    let other = ChatSession::new(h.context()).spawn();
    sleep(Duration::from_millis(250)).await;
    assert_eq!(h.notifier.shown().len(), 1);

    other.close().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_all_respects_confirmation() {
    let h = Harness::new(false);
    let now = Utc::now().to_rfc3339();
    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(3, 2, "hi", &now)] }),
    );

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: None,
        })
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.len() == 1).unwrap_or(false)
    })
    .await;

    session.send(SessionCommand::DeleteAll).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(h.transport.calls_to("delete_messages").is_empty());
    assert_eq!(h.prompt.questions.lock().unwrap().len(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_all_clears_thread() {
    let h = Harness::new(true);
    let now = Utc::now().to_rfc3339();
    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(3, 2, "hi", &now)] }),
    );

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: None,
        })
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.len() == 1).unwrap_or(false)
    })
    .await;

    h.transport.respond("get_messages", json!({ "messages": [] }));
    session.send(SessionCommand::DeleteAll).await.unwrap();
    let current = wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.is_empty()).unwrap_or(false)
    })
    .await;
    assert!(thread_panel(&current).unwrap().empty_state.is_some());
    assert_eq!(h.transport.calls_to("delete_messages").len(), 1);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_zoom_opens_replica_with_open_thread() {
    let h = Harness::new(true);
    let now = Utc::now().to_rfc3339();
    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(3, 2, "hi", &now)] }),
    );

    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: Some("Ana".to_string()),
        })
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.len() == 1).unwrap_or(false)
    })
    .await;

    session.send(SessionCommand::ToggleReplica).await.unwrap();
    let link = session
        .replica()
        .await
        .unwrap()
        .expect("replica should be open");
    let mut replica = link.view();
    let zoomed = wait_for(&mut replica, |v| v.zoomed && thread_panel(v).is_some()).await;
    let panel = thread_panel(&zoomed).unwrap();
    assert_eq!(panel.conversation_id, 5);
    assert_eq!(panel.title, "Ana");

    // Toggling again closes it
    session.send(SessionCommand::ToggleReplica).await.unwrap();
    assert!(session.replica().await.unwrap().is_none());
    assert!(h.prompt.alerts().is_empty());

    session.close().await.unwrap();
}

async fn open_zoomed(h: &Harness) -> (SessionHandle, ReplicaLink) {
    let session = h.start();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: Some("Ana".to_string()),
        })
        .await
        .unwrap();
    wait_for(&mut view, loaded_thread).await;
    session.send(SessionCommand::ToggleReplica).await.unwrap();
    let link = session
        .replica()
        .await
        .unwrap()
        .expect("replica should be open");
    (session, link)
}

#[tokio::test]
async fn test_zoomed_window_takes_its_own_input() {
    let h = Harness::new(true);
    h.transport.respond("get_messages", json!({ "messages": [] }));
    let (session, link) = open_zoomed(&h).await;

    link.send(SessionCommand::Send("from zoom".to_string()))
        .await
        .unwrap();
    let mut zoomed = link.view();
    wait_for(&mut zoomed, |v| {
        thread_panel(v)
            .map(|p| {
                p.messages
                    .iter()
                    .any(|m| m.content == "from zoom" && m.status == Some(DeliveryStatus::Sent))
            })
            .unwrap_or(false)
    })
    .await;

    let sends = h.transport.calls_to("send_message");
    assert_eq!(sends.len(), 1);
    assert!(matches!(
        &sends[0],
        Operation::SendMessage { conversation_id: 5, content, .. } if content == "from zoom"
    ));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_zoom_inside_replica_closes_it() {
    let h = Harness::new(true);
    h.transport.respond("get_messages", json!({ "messages": [] }));
    let (session, link) = open_zoomed(&h).await;

    link.send(SessionCommand::ToggleReplica).await.unwrap();
    let mut zoomed = link.view();
    timeout(Duration::from_secs(2), async {
        while zoomed.changed().await.is_ok() {}
    })
    .await
    .expect("zoomed window never closed");
    assert!(link.is_closed());
    assert!(session.replica().await.unwrap().is_none());
    assert!(!session.is_finished());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_delete_refetches_thread() {
    let mut config = test_config();
    // Only the refetch, not a scheduled poll, may bring in the new list
    config.polling.thread = Duration::from_secs(60);
    let h = Harness::new(true);
    let now = Utc::now().to_rfc3339();
    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(3, 2, "hi", &now)] }),
    );

    let session = ChatSession::new(h.context_with(config)).spawn();
    let mut view = session.view();
    session
        .send(SessionCommand::Open {
            conversation_id: 5,
            label: None,
        })
        .await
        .unwrap();
    wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.len() == 1).unwrap_or(false)
    })
    .await;
    let loads = h.transport.calls_to("get_messages").len();

    h.transport.respond(
        "get_messages",
        json!({ "messages": [message(3, 2, "hi", &now), message(4, 2, "still here?", &now)] }),
    );
    h.transport.fail("delete_messages");
    session.send(SessionCommand::DeleteAll).await.unwrap();

    wait_for(&mut view, |v| {
        thread_panel(v).map(|p| p.messages.len() == 2).unwrap_or(false)
    })
    .await;
    assert!(h.transport.calls_to("get_messages").len() > loads);
    assert_eq!(h.prompt.alerts().len(), 1);

    session.close().await.unwrap();
}

/// Never signals readiness
struct StuckLauncher;

impl ReplicaLauncher for StuckLauncher {
    fn launch(&self, endpoint: ReplicaEndpoint) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _endpoint = endpoint;
            std::future::pending::<()>().await;
        })
    }
}

#[tokio::test]
async fn test_replica_timeout_alerts_and_session_survives() {
    let h = Harness::new(true);
    let session = ChatSession::with_launcher(h.context(), Arc::new(StuckLauncher)).spawn();

    session.send(SessionCommand::ToggleReplica).await.unwrap();
    assert!(session.replica().await.unwrap().is_none());
    let alerts = h.prompt.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("zoomed window"));

    // Still serving commands
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.viewer_id, 1);
    assert!(!session.is_finished());

    session.close().await.unwrap();
}
