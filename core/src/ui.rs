/// Ports to whoever is in front of the session: blocking alerts and
/// confirmations, and platform (desktop) notifications
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

#[async_trait]
pub trait Prompt: Send + Sync {
    /// Show an error or notice; shown once per call
    async fn alert(&self, message: &str);

    /// Ask a yes/no question; anything but an explicit yes is a no
    async fn confirm(&self, question: &str) -> bool;
}

pub trait DesktopNotifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Prompt traffic handed to a front end
#[derive(Debug)]
pub enum PromptRequest {
    Alert(String),
    Confirm {
        question: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Forwards prompts over a channel so the front end owns the terminal
#[derive(Clone)]
pub struct ChannelPrompt {
    tx: mpsc::UnboundedSender<PromptRequest>,
}

impl ChannelPrompt {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Prompt for ChannelPrompt {
    async fn alert(&self, message: &str) {
        let _ = self.tx.send(PromptRequest::Alert(message.to_string()));
    }

    async fn confirm(&self, question: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        if self
            .tx
            .send(PromptRequest::Confirm {
                question: question.to_string(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// Notifier for headless runs: notifications go to the log
pub struct LogNotifier;

impl DesktopNotifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("🔔 {}: {}", title, body);
    }
}
