/// RxLink - branch messaging and notification client
use rxlink_core::cli_app::{self, TerminalNotifier};
use rxlink_core::ui::{ChannelPrompt, LogNotifier};
use rxlink_core::{ChatSession, Config, HttpTransport, SessionContext};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they stay out of the rendered views
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("🚀 Starting RxLink");
    info!("   Server: {}", config.api_base);
    info!("   User: {}", config.user_id);
    info!("   Data dir: {}", config.data_dir.display());

    let transport = Arc::new(HttpTransport::new(&config));
    let (prompt, prompts) = ChannelPrompt::new();
    let notifier: Arc<dyn rxlink_core::ui::DesktopNotifier> = if config.desktop_push {
        Arc::new(TerminalNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let ctx = SessionContext::new(config, transport, Arc::new(prompt), notifier)
        .map_err(|e| anyhow::anyhow!("Startup error: {}", e))?;

    let handle = ChatSession::new(ctx).spawn();
    cli_app::run(handle, prompts).await
}
