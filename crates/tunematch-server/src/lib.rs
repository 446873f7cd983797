//! tunematch server - live identification over websockets

pub mod config;
pub mod pool;
pub mod server;
pub mod session_task;
pub mod watcher;

pub use config::ServerConfig;
pub use pool::{SessionPermit, SessionPool};
pub use server::{router, serve, serve_listener, AppState};
pub use session_task::{run_session, EventSink, Inbound, SessionEnd, SessionSettings, SessionSummary};
pub use watcher::IndexWatcher;
