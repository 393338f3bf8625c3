/// Configuration management
use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = ".rxlink";
const DEFAULT_BADGE_CEILING: u32 = 99;

/// Poll periods, one per source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollIntervals {
    /// Conversation list, only while no thread is open
    pub directory: Duration,

    /// Open thread
    pub thread: Duration,

    /// Generic notifications feed
    pub notifications: Duration,

    /// Inventory alerts feed
    pub alerts: Duration,

    /// Conversations scanned for unread chat
    pub chat_unread: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            directory: Duration::from_secs(5),
            thread: Duration::from_secs(3),
            notifications: Duration::from_secs(30),
            alerts: Duration::from_secs(60),
            chat_unread: Duration::from_secs(10),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the branch server API, e.g. `http://10.0.0.5:8080`
    pub api_base: String,

    /// Identifier of the signed-in user
    pub user_id: i64,

    /// Session cookie forwarded to the server's session gate
    pub session_cookie: Option<String>,

    /// Directory for the notified-marker store
    pub data_dir: PathBuf,

    /// Polling periods
    pub polling: PollIntervals,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// How long the replica may take to signal readiness
    pub replica_ready_timeout: Duration,

    /// How often readiness is checked during the handshake
    pub replica_ready_poll: Duration,

    /// Badge count above which the overflow marker is shown
    pub badge_ceiling: u32,

    /// Max clock skew between an optimistic entry and its server copy
    pub reconcile_window: Duration,

    /// Raise desktop notifications for unread chat
    pub desktop_push: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".to_string(),
            user_id: 0,
            session_cookie: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            polling: PollIntervals::default(),
            request_timeout: Duration::from_secs(10),
            replica_ready_timeout: Duration::from_secs(5),
            replica_ready_poll: Duration::from_millis(100),
            badge_ceiling: DEFAULT_BADGE_CEILING,
            reconcile_window: Duration::from_secs(120),
            desktop_push: true,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            return Err(LinkError::Config(format!(
                "Usage: {} <api-base-url> <user-id> [--data-dir <path>] [--thread-poll-ms <n>] [--directory-poll-ms <n>] [--no-desktop-push]",
                args.first().map(String::as_str).unwrap_or("rxlink")
            )));
        }

        let api_base = args[1].trim_end_matches('/').to_string();
        if !api_base.starts_with("http://") {
            return Err(LinkError::Config(
                "API base URL must start with http://".to_string(),
            ));
        }

        let user_id = args[2]
            .parse::<i64>()
            .map_err(|_| LinkError::Config("User id must be a number".to_string()))?;

        let mut config = Self {
            api_base,
            user_id,
            ..Default::default()
        };

        let mut i = 3;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        LinkError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = PathBuf::from(path);
                    i += 2;
                }
                "--thread-poll-ms" => {
                    config.polling.thread = parse_millis(args.get(i + 1), "--thread-poll-ms")?;
                    i += 2;
                }
                "--directory-poll-ms" => {
                    config.polling.directory =
                        parse_millis(args.get(i + 1), "--directory-poll-ms")?;
                    i += 2;
                }
                "--no-desktop-push" => {
                    config.desktop_push = false;
                    i += 1;
                }
                other => {
                    return Err(LinkError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides
        if let Ok(cookie) = std::env::var("RXLINK_SESSION_COOKIE") {
            if !cookie.is_empty() {
                config.session_cookie = Some(cookie);
            }
        }
        if let Ok(dir) = std::env::var("RXLINK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(ms) = std::env::var("RXLINK_THREAD_POLL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.polling.thread = Duration::from_millis(ms.max(1));
        }

        Ok(config)
    }
}

fn parse_millis(value: Option<&String>, flag: &str) -> Result<Duration> {
    let raw = value.ok_or_else(|| LinkError::Config(format!("{} requires a value", flag)))?;
    let ms = raw
        .parse::<u64>()
        .map_err(|_| LinkError::Config(format!("{} must be a number of milliseconds", flag)))?;
    if ms == 0 {
        return Err(LinkError::Config(format!("{} must be greater than zero", flag)));
    }
    Ok(Duration::from_millis(ms))
}
