/// Chat session: the single owner of the directory, the open thread, the
/// notification feed and the replica host.
///
/// A session runs as one task. Poll ticks, fetch results and user commands
/// all arrive over channels and are handled one at a time, so component
/// state is never shared. Fetches run in their own tasks and come back
/// tagged with the ticket they were issued under; the components drop the
/// ones that no longer match the view.
use crate::api::ChatApi;
use crate::config::Config;
use crate::directory::{ConversationDirectory, DirectoryListing, RefreshOutcome, RefreshTicket};
use crate::error::{LinkError, Result};
use crate::marker_store::MarkerStore;
use crate::notifications::{FeedSnapshot, FeedTab, FeedTicket, NotificationAggregator, Partition, PushGate};
use crate::render::{render_directory, render_feed, render_thread, Screen, SessionView};
use crate::replica::{ReplicaHost, ReplicaLauncher, ReplicaLink, ReplicaToggle, SessionLauncher};
use crate::scheduler::{PollScheduler, PollSource, FEED_SOURCES};
use crate::thread::{ChatState, DeleteOutcome, DELETE_QUESTION, PendingSend, PollOutcome, ThreadController, ThreadTicket};
use crate::transport::Transport;
use crate::types::{timestamp, Conversation, InventoryAlert, Message, NotificationsPayload, UserDescriptor};
use crate::ui::{DesktopNotifier, Prompt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

/// What a front end can ask of a session
#[derive(Debug)]
pub enum SessionCommand {
    ShowDirectory,
    Open {
        conversation_id: i64,
        label: Option<String>,
    },
    /// Create (or reuse) a conversation with a user and open it
    StartWith {
        user_id: i64,
        label: String,
    },
    Send(String),
    /// Retry the n-th failed entry (1-based) of the open thread
    Retry(usize),
    DeleteAll,
    SetTab(FeedTab),
    MarkRead(i64),
    MarkAllRead,
    /// Open the replica window, or close it if it is open
    ToggleReplica,
    /// Link to the open replica window, if any
    Replica(oneshot::Sender<Option<ReplicaLink>>),
    Snapshot(oneshot::Sender<ChatSnapshot>),
    Close,
}

/// Fetch results coming back into the loop
enum FetchResult {
    Conversations(RefreshTicket, Result<Vec<Conversation>>),
    Users(RefreshTicket, Result<Vec<UserDescriptor>>),
    Messages(ThreadTicket, Result<Vec<Message>>),
    Sent(PendingSend, Result<Option<Message>>),
    Created { label: String, result: Result<i64> },
    Deleted(ThreadTicket, Result<()>),
    Notifications(FeedTicket, Result<NotificationsPayload>),
    Alerts(FeedTicket, Result<Vec<InventoryAlert>>),
    ChatUnread(FeedTicket, Result<Vec<Conversation>>),
    MarkedRead(Option<i64>, Result<()>),
}

/// Serialized state handed to a replica window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub viewer_id: i64,
    pub directory: DirectoryListing,
    pub chat: ChatState,
    pub feed: FeedSnapshot,
    #[serde(with = "timestamp")]
    pub taken_at: DateTime<Utc>,
}

impl ChatSnapshot {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Collaborators every session needs. Cloned into the replica, so both
/// windows talk to the same backend and share the notified markers.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Config,
    pub api: ChatApi,
    pub prompt: Arc<dyn Prompt>,
    pub push: PushGate,
}

impl SessionContext {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
        notifier: Arc<dyn DesktopNotifier>,
    ) -> Result<Self> {
        let markers = MarkerStore::open(&config.data_dir)?;
        Ok(Self::with_markers(config, transport, prompt, notifier, markers))
    }

    pub fn with_markers(
        config: Config,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
        notifier: Arc<dyn DesktopNotifier>,
        markers: MarkerStore,
    ) -> Self {
        let push = PushGate::new(markers, notifier, config.desktop_push);
        Self {
            api: ChatApi::new(transport),
            config,
            prompt,
            push,
        }
    }
}

/// Front-end side of a running session
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::Replica("session has stopped".to_string()))
    }

    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub async fn snapshot(&self) -> Result<ChatSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| LinkError::Replica("session has stopped".to_string()))
    }

    pub async fn replica(&self) -> Result<Option<ReplicaLink>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Replica(tx)).await?;
        rx.await
            .map_err(|_| LinkError::Replica("session has stopped".to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and wait for it to wind down
    pub async fn close(self) -> Result<()> {
        let _ = self.commands.send(SessionCommand::Close).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(LinkError::Replica(format!("session task failed: {}", e))),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct ChatSession {
    ctx: SessionContext,
    directory: ConversationDirectory,
    thread: ThreadController,
    feed: NotificationAggregator,
    replica: ReplicaHost,
    view_tx: watch::Sender<SessionView>,
    results_tx: mpsc::UnboundedSender<FetchResult>,
    results_rx: Option<mpsc::UnboundedReceiver<FetchResult>>,
}

impl ChatSession {
    /// Primary window with the default replica launcher
    pub fn new(ctx: SessionContext) -> Self {
        let launcher: Arc<dyn ReplicaLauncher> = Arc::new(SessionLauncher::new(ctx.clone()));
        Self::with_launcher(ctx, launcher)
    }

    pub fn with_launcher(ctx: SessionContext, launcher: Arc<dyn ReplicaLauncher>) -> Self {
        let (view_tx, _) = watch::channel(SessionView::default());
        let viewer_id = ctx.config.user_id;
        let directory = ConversationDirectory::new(viewer_id);
        let thread = ThreadController::new(viewer_id, ctx.config.reconcile_window);
        let feed = NotificationAggregator::new(ctx.config.badge_ceiling);
        Self::build(ctx, directory, thread, feed, Some(launcher), view_tx)
    }

    /// Replica window seeded from a snapshot. It renders zoomed and cannot
    /// open replicas of its own.
    pub fn restore(
        ctx: SessionContext,
        snapshot: ChatSnapshot,
        view_tx: watch::Sender<SessionView>,
    ) -> Self {
        let viewer_id = snapshot.viewer_id;
        let directory = ConversationDirectory::restore(viewer_id, snapshot.directory);
        let mut thread =
            ThreadController::restore(viewer_id, ctx.config.reconcile_window, snapshot.chat);
        thread.set_zoomed(true);
        let feed = NotificationAggregator::restore(snapshot.feed, ctx.config.badge_ceiling);
        Self::build(ctx, directory, thread, feed, None, view_tx)
    }

    fn build(
        ctx: SessionContext,
        directory: ConversationDirectory,
        thread: ThreadController,
        feed: NotificationAggregator,
        launcher: Option<Arc<dyn ReplicaLauncher>>,
        view_tx: watch::Sender<SessionView>,
    ) -> Self {
        let replica = ReplicaHost::new(
            launcher,
            ctx.config.replica_ready_timeout,
            ctx.config.replica_ready_poll,
        );
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            directory,
            thread,
            feed,
            replica,
            view_tx,
            results_tx,
            results_rx: Some(results_rx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            viewer_id: self.thread.viewer_id(),
            directory: self.directory.listing().clone(),
            chat: self.thread.handoff_state(),
            feed: self.feed.snapshot(),
            taken_at: Utc::now(),
        }
    }

    /// Run on its own task
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let view = self.subscribe();
        let task = tokio::spawn(self.run(rx));
        SessionHandle {
            commands,
            view,
            task,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        let mut results = self
            .results_rx
            .take()
            .ok_or_else(|| LinkError::Replica("session is already running".to_string()))?;
        let mut scheduler = PollScheduler::new(self.ctx.config.polling.clone());

        scheduler.start_feeds();
        for source in FEED_SOURCES {
            self.on_tick(source);
        }
        if let Some(ticket) = self.thread.ticket() {
            scheduler.enter_thread();
            self.fetch_messages(ticket);
        } else {
            scheduler.enter_directory();
            self.on_tick(PollSource::Directory);
        }
        self.publish();
        info!(
            "💬 Session started for user {} (zoomed: {})",
            self.thread.viewer_id(),
            self.thread.state().zoomed
        );

        loop {
            tokio::select! {
                source = scheduler.next_tick() => self.on_tick(source),
                Some(result) = results.recv() => self.on_result(result, &mut scheduler).await,
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if let Flow::Stop = self.on_command(command, &mut scheduler).await {
                        break;
                    }
                }
            }
        }

        scheduler.shutdown();
        self.replica.close().await;
        info!("Session for user {} stopped", self.thread.viewer_id());
        Ok(())
    }

    fn spawn_fetch<F>(&self, fetch: F)
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            // Loop gone means the session closed; nothing left to update
            let _ = tx.send(fetch.await);
        });
    }

    fn fetch_messages(&self, ticket: ThreadTicket) {
        let api = self.ctx.api.clone();
        self.spawn_fetch(async move {
            let result = api.get_messages(ticket.conversation_id).await;
            FetchResult::Messages(ticket, result)
        });
    }

    fn on_tick(&mut self, source: PollSource) {
        let api = self.ctx.api.clone();
        match source {
            PollSource::Directory => {
                if self.thread.is_open() {
                    return;
                }
                let ticket = self.directory.begin_refresh();
                self.spawn_fetch(async move {
                    FetchResult::Conversations(ticket, api.get_conversations().await)
                });
            }
            PollSource::Thread => {
                if let Some(ticket) = self.thread.ticket() {
                    self.fetch_messages(ticket);
                }
            }
            PollSource::Notifications => {
                let ticket = self.feed.begin(Partition::Generic);
                self.spawn_fetch(async move {
                    FetchResult::Notifications(ticket, api.get_notifications().await)
                });
            }
            PollSource::Alerts => {
                let ticket = self.feed.begin(Partition::Alerts);
                self.spawn_fetch(async move {
                    FetchResult::Alerts(ticket, api.get_inventory_alerts().await)
                });
            }
            PollSource::ChatUnread => {
                let ticket = self.feed.begin(Partition::Chat);
                self.spawn_fetch(async move {
                    FetchResult::ChatUnread(ticket, api.get_conversations().await)
                });
            }
        }
    }

    async fn on_result(&mut self, result: FetchResult, scheduler: &mut PollScheduler) {
        let now = Utc::now();
        match result {
            FetchResult::Conversations(ticket, result) => {
                match self.directory.apply_conversations(ticket, result) {
                    RefreshOutcome::Rendered => self.publish(),
                    RefreshOutcome::NeedsUserFallback => {
                        let api = self.ctx.api.clone();
                        self.spawn_fetch(async move {
                            FetchResult::Users(ticket, api.get_users().await)
                        });
                    }
                    RefreshOutcome::Failed | RefreshOutcome::Stale => {}
                }
            }
            FetchResult::Users(ticket, result) => {
                if self.directory.apply_users(ticket, result) != RefreshOutcome::Stale {
                    self.publish();
                }
            }
            FetchResult::Messages(ticket, result) => {
                if self.thread.apply_messages(ticket, result) == PollOutcome::Rendered {
                    self.publish();
                }
            }
            FetchResult::Sent(send, result) => {
                self.thread.finish_send(&send, &result);
                self.publish();
                if let Err(e) = result {
                    self.report(&e).await;
                }
            }
            FetchResult::Created { label, result } => match result {
                Ok(conversation_id) => self.open(conversation_id, label, scheduler),
                Err(e) => {
                    warn!("Could not start conversation: {}", e);
                    self.report(&e).await;
                }
            },
            FetchResult::Deleted(ticket, result) => {
                match self.thread.finish_delete(ticket, &result) {
                    DeleteOutcome::Cleared => self.publish(),
                    DeleteOutcome::Refetch => self.fetch_messages(ticket),
                    DeleteOutcome::Stale => {}
                }
                if let Err(e) = result {
                    self.report(&e).await;
                }
            }
            FetchResult::Notifications(ticket, result) => {
                if self.feed.apply_generic(ticket, result) {
                    self.publish();
                }
            }
            FetchResult::Alerts(ticket, result) => {
                if self.feed.apply_alerts(ticket, result, now) {
                    self.publish();
                }
            }
            FetchResult::ChatUnread(ticket, result) => {
                let conversations = match result {
                    Ok(list) => list,
                    Err(e) => {
                        self.feed.apply_chat(ticket, Err(e), now);
                        return;
                    }
                };
                if self.feed.apply_chat(ticket, Ok(conversations.as_slice()), now) {
                    let open = self.thread.state().conversation_id;
                    let shown = self.ctx.push.push_unread(&conversations, open);
                    if shown > 0 {
                        debug!("Raised {} desktop notification(s)", shown);
                    }
                    self.publish();
                }
            }
            FetchResult::MarkedRead(target, result) => match result {
                Ok(()) => {
                    match target {
                        Some(id) => {
                            self.feed.apply_mark_read(id);
                        }
                        None => self.feed.apply_mark_all_read(),
                    }
                    self.publish();
                }
                Err(e) => self.report(&e).await,
            },
        }
    }

    async fn on_command(&mut self, command: SessionCommand, scheduler: &mut PollScheduler) -> Flow {
        match command {
            SessionCommand::ShowDirectory => {
                self.thread.close();
                scheduler.enter_directory();
                self.on_tick(PollSource::Directory);
                self.publish();
            }
            SessionCommand::Open {
                conversation_id,
                label,
            } => {
                let label = label
                    .or_else(|| self.directory.label_for(conversation_id))
                    .unwrap_or_else(|| format!("Conversation #{}", conversation_id));
                self.open(conversation_id, label, scheduler);
            }
            SessionCommand::StartWith { user_id, label } => {
                let api = self.ctx.api.clone();
                self.spawn_fetch(async move {
                    let result = api.create_conversation(user_id).await;
                    FetchResult::Created { label, result }
                });
            }
            SessionCommand::Send(content) => {
                let begun = self.thread.begin_send(&content);
                self.dispatch_send(begun).await;
            }
            SessionCommand::Retry(n) => {
                let begun = self
                    .thread
                    .failed_entry(n)
                    .ok_or_else(|| LinkError::Validation(format!("No failed message #{}", n)))
                    .and_then(|token| self.thread.begin_retry(token));
                self.dispatch_send(begun).await;
            }
            SessionCommand::DeleteAll => match self.thread.begin_delete() {
                Ok((ticket, token)) => {
                    if self.ctx.prompt.confirm(DELETE_QUESTION).await {
                        let api = self.ctx.api.clone();
                        self.spawn_fetch(async move {
                            let result = api.delete_messages(ticket.conversation_id, token).await;
                            FetchResult::Deleted(ticket, result)
                        });
                    }
                }
                Err(e) => self.report(&e).await,
            },
            SessionCommand::SetTab(tab) => {
                self.feed.set_tab(tab);
                self.publish();
            }
            SessionCommand::MarkRead(id) => {
                let api = self.ctx.api.clone();
                self.spawn_fetch(async move {
                    FetchResult::MarkedRead(Some(id), api.mark_read(id).await)
                });
            }
            SessionCommand::MarkAllRead => {
                let api = self.ctx.api.clone();
                self.spawn_fetch(async move {
                    FetchResult::MarkedRead(None, api.mark_all_read().await)
                });
            }
            SessionCommand::ToggleReplica => {
                // The zoom control inside the replica closes the replica itself
                if self.thread.state().zoomed {
                    return Flow::Stop;
                }
                let snapshot = self.snapshot();
                match self.replica.toggle(&snapshot).await {
                    Ok(ReplicaToggle::Opened) => info!("🔍 Replica window opened"),
                    Ok(ReplicaToggle::Closed) => info!("Replica window closed"),
                    Err(e) => {
                        warn!("Replica window failed: {}", e);
                        self.ctx
                            .prompt
                            .alert(&format!("Could not open the zoomed window: {}", e))
                            .await;
                    }
                }
            }
            SessionCommand::Replica(reply) => {
                let _ = reply.send(self.replica.link());
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Close => return Flow::Stop,
        }
        Flow::Continue
    }

    async fn dispatch_send(&mut self, begun: Result<PendingSend>) {
        match begun {
            Ok(send) => {
                self.publish();
                let api = self.ctx.api.clone();
                self.spawn_fetch(async move {
                    let result = api
                        .send_message(send.ticket.conversation_id, send.content.clone(), send.token)
                        .await;
                    FetchResult::Sent(send, result)
                });
            }
            Err(e) => self.report(&e).await,
        }
    }

    /// Transport and validation errors reach the user once; anything else is logged
    async fn report(&self, e: &LinkError) {
        if e.is_user_facing() {
            self.ctx.prompt.alert(&e.to_string()).await;
        } else {
            warn!("{}", e);
        }
    }

    fn open(&mut self, conversation_id: i64, label: String, scheduler: &mut PollScheduler) {
        let ticket = self.directory.open(&mut self.thread, conversation_id, label);
        scheduler.enter_thread();
        self.fetch_messages(ticket);
        self.publish();
    }

    fn publish(&self) {
        let now = Utc::now();
        let state = self.thread.state();
        let screen = match render_thread(state, self.thread.viewer_id(), now) {
            Some(panel) => Screen::Thread(panel),
            None => Screen::Directory(render_directory(self.directory.listing(), now)),
        };
        let view = SessionView {
            screen,
            badge: self.feed.badge(),
            feed: render_feed(&self.feed, now),
            zoomed: state.zoomed,
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}
