/// Polling scheduler: one interval task and one tick channel per source. The
/// directory source is stopped while a thread is open and the thread source
/// is restarted on every view change.
use crate::config::PollIntervals;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollSource {
    Directory,
    Thread,
    Notifications,
    Alerts,
    ChatUnread,
}

pub const FEED_SOURCES: [PollSource; 3] = [
    PollSource::Notifications,
    PollSource::Alerts,
    PollSource::ChatUnread,
];

/// Ticks for one source. Capacity one: a tick that finds the previous one
/// still queued is dropped.
struct Lane {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
    task: Option<JoinHandle<()>>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx, task: None }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Drop a tick queued before the stop
        while self.rx.try_recv().is_ok() {}
    }
}

pub struct PollScheduler {
    intervals: PollIntervals,
    directory: Lane,
    thread: Lane,
    notifications: Lane,
    alerts: Lane,
    chat_unread: Lane,
}

impl PollScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            directory: Lane::new(),
            thread: Lane::new(),
            notifications: Lane::new(),
            alerts: Lane::new(),
            chat_unread: Lane::new(),
        }
    }

    pub fn period(&self, source: PollSource) -> Duration {
        match source {
            PollSource::Directory => self.intervals.directory,
            PollSource::Thread => self.intervals.thread,
            PollSource::Notifications => self.intervals.notifications,
            PollSource::Alerts => self.intervals.alerts,
            PollSource::ChatUnread => self.intervals.chat_unread,
        }
    }

    fn lane(&mut self, source: PollSource) -> &mut Lane {
        match source {
            PollSource::Directory => &mut self.directory,
            PollSource::Thread => &mut self.thread,
            PollSource::Notifications => &mut self.notifications,
            PollSource::Alerts => &mut self.alerts,
            PollSource::ChatUnread => &mut self.chat_unread,
        }
    }

    /// (Re)start a source. The first tick comes one period from now; callers
    /// fetch right away themselves when they need to.
    pub fn start(&mut self, source: PollSource) {
        let period = self.period(source);
        let lane = self.lane(source);
        lane.stop();
        let tx = lane.tx.clone();
        lane.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tx.try_send(()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("Skipping {:?} tick", source),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }));
    }

    pub fn stop(&mut self, source: PollSource) {
        self.lane(source).stop();
    }

    pub fn is_running(&mut self, source: PollSource) -> bool {
        self.lane(source)
            .task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn start_feeds(&mut self) {
        for source in FEED_SOURCES {
            self.start(source);
        }
    }

    /// A thread was opened: directory polling is suppressed
    pub fn enter_thread(&mut self) {
        self.stop(PollSource::Directory);
        self.start(PollSource::Thread);
    }

    pub fn enter_directory(&mut self) {
        self.stop(PollSource::Thread);
        self.start(PollSource::Directory);
    }

    /// Next tick from any running source
    pub async fn next_tick(&mut self) -> PollSource {
        // Every lane keeps its own sender, so no channel ever closes
        tokio::select! {
            Some(()) = self.thread.rx.recv() => PollSource::Thread,
            Some(()) = self.directory.rx.recv() => PollSource::Directory,
            Some(()) = self.chat_unread.rx.recv() => PollSource::ChatUnread,
            Some(()) = self.notifications.rx.recv() => PollSource::Notifications,
            Some(()) = self.alerts.rx.recv() => PollSource::Alerts,
        }
    }

    pub fn shutdown(&mut self) {
        for lane in [
            &mut self.directory,
            &mut self.thread,
            &mut self.notifications,
            &mut self.alerts,
            &mut self.chat_unread,
        ] {
            lane.stop();
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
