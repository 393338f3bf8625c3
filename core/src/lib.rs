/// RxLink - messaging and notification layer for multi-branch pharmacies
///
/// Branch staff chat one-to-one through a central server; inventory alerts,
/// server notifications and unread chat are merged into one feed with a
/// badge. Everything is polled over HTTP, and a zoomed replica window can be
/// opened from a snapshot of the main one.

pub mod api;
pub mod cli_app;
pub mod config;
pub mod directory;
pub mod error;
pub mod marker_store;
pub mod notifications;
pub mod render;
pub mod replica;
pub mod scheduler;
pub mod session;
pub mod thread;
pub mod transport;
pub mod types;
pub mod ui;

pub use api::ChatApi;
pub use config::Config;
pub use error::{LinkError, Result};
pub use session::{ChatSession, ChatSnapshot, SessionCommand, SessionContext, SessionHandle};
pub use transport::{HttpTransport, Operation, Transport};
