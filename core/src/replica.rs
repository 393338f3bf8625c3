/// Cross-window replica: a second, zoomed session seeded from a snapshot of
/// the first. The two never share memory; the host waits for the replica to
/// report ready, hands the snapshot over once, then keeps only its channels.
use crate::error::{LinkError, Result};
use crate::render::SessionView;
use crate::session::{ChatSession, ChatSnapshot, SessionCommand, SessionContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Replica side of the handshake
pub struct ReplicaEndpoint {
    /// Set to `true` once the replica can take the snapshot
    pub ready: watch::Sender<bool>,
    /// Serialized `ChatSnapshot`, sent exactly once
    pub handoff: oneshot::Receiver<String>,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub view: watch::Sender<SessionView>,
}

/// Starts whatever runs the replica window
pub trait ReplicaLauncher: Send + Sync {
    fn launch(&self, endpoint: ReplicaEndpoint) -> JoinHandle<()>;
}

/// Runs the replica as another session task on the same runtime
pub struct SessionLauncher {
    ctx: SessionContext,
}

impl SessionLauncher {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }
}

impl ReplicaLauncher for SessionLauncher {
    fn launch(&self, endpoint: ReplicaEndpoint) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_replica(ctx, endpoint).await {
                warn!("Replica window stopped: {}", e);
            }
        })
    }
}

/// Signal ready, wait for the snapshot and run a zoomed session from it
pub async fn run_replica(ctx: SessionContext, endpoint: ReplicaEndpoint) -> Result<()> {
    let ReplicaEndpoint {
        ready,
        handoff,
        commands,
        view,
    } = endpoint;
    ready
        .send(true)
        .map_err(|_| LinkError::Replica("host went away before handoff".to_string()))?;
    let raw = handoff
        .await
        .map_err(|_| LinkError::Replica("handoff channel closed".to_string()))?;
    let snapshot = ChatSnapshot::decode(&raw)?;
    debug!(
        "Replica seeded with conversation {:?}",
        snapshot.chat.conversation_id
    );
    ChatSession::restore(ctx, snapshot, view).run(commands).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaToggle {
    Opened,
    Closed,
}

/// Front-end side of a running replica window: drive it and watch it
#[derive(Debug, Clone)]
pub struct ReplicaLink {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl ReplicaLink {
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::Replica("zoomed window has closed".to_string()))
    }

    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

struct LiveReplica {
    task: JoinHandle<()>,
    link: ReplicaLink,
}

pub struct ReplicaHost {
    launcher: Option<Arc<dyn ReplicaLauncher>>,
    live: Option<LiveReplica>,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl ReplicaHost {
    pub fn new(
        launcher: Option<Arc<dyn ReplicaLauncher>>,
        ready_timeout: Duration,
        ready_poll: Duration,
    ) -> Self {
        Self {
            launcher,
            live: None,
            ready_timeout,
            ready_poll,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.live
            .as_ref()
            .map(|live| !live.task.is_finished())
            .unwrap_or(false)
    }

    pub fn link(&self) -> Option<ReplicaLink> {
        self.live
            .as_ref()
            .filter(|live| !live.task.is_finished())
            .map(|live| live.link.clone())
    }

    /// Close the replica if it is open, open one otherwise
    pub async fn toggle(&mut self, snapshot: &ChatSnapshot) -> Result<ReplicaToggle> {
        if self.is_alive() {
            self.close().await;
            return Ok(ReplicaToggle::Closed);
        }
        // A replica that ended on its own leaves only its handle behind
        self.live = None;
        self.open(snapshot).await?;
        Ok(ReplicaToggle::Opened)
    }

    async fn open(&mut self, snapshot: &ChatSnapshot) -> Result<()> {
        let launcher = self
            .launcher
            .clone()
            .ok_or_else(|| LinkError::Replica("this window cannot open a replica".to_string()))?;
        let payload = snapshot.encode()?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let (handoff_tx, handoff_rx) = oneshot::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let task = launcher.launch(ReplicaEndpoint {
            ready: ready_tx,
            handoff: handoff_rx,
            commands: cmd_rx,
            view: view_tx,
        });

        let poll = self.ready_poll;
        let waited = timeout(self.ready_timeout, async {
            loop {
                let is_ready = *ready_rx.borrow();
                if is_ready {
                    return Ok(());
                }
                if task.is_finished() {
                    return Err(LinkError::Replica(
                        "replica window exited before it was ready".to_string(),
                    ));
                }
                sleep(poll).await;
            }
        })
        .await;

        let handshake = match waited {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout(format!(
                "replica window not ready after {:?}",
                self.ready_timeout
            ))),
        };
        if let Err(e) = handshake {
            task.abort();
            warn!("Replica handshake failed: {}", e);
            return Err(e);
        }

        if handoff_tx.send(payload).is_err() {
            task.abort();
            return Err(LinkError::Replica(
                "replica window closed during handoff".to_string(),
            ));
        }
        info!("Replica window received snapshot");
        self.live = Some(LiveReplica {
            task,
            link: ReplicaLink {
                commands: cmd_tx,
                view: view_rx,
            },
        });
        Ok(())
    }

    /// Ask the replica to stop; abort it if it does not within the grace period
    pub async fn close(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        let _ = live.link.send(SessionCommand::Close).await;
        let mut task = live.task;
        if timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
}
