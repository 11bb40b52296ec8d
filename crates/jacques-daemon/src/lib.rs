//! The jacques daemon: a local session-observability service for AI coding
//! assistants.
//!
//! Assistant hooks push lifecycle events over a Unix socket; a startup scan
//! and per-transcript watchers fill the gaps; the fused session state fans
//! out to UI clients over a websocket, and an HTTP API answers queries and
//! catalog-extraction requests.

pub mod activator;
pub mod broadcast;
pub mod daemon;
pub mod error;
pub mod focus;
pub mod http;
pub mod ingress;
pub mod logging;
pub mod pidfile;
pub mod pipeline;
pub mod scanner;
pub mod settings;
pub mod state;
pub mod transcript_watcher;
pub mod ws_server;

pub use daemon::Daemon;
pub use error::DaemonError;
pub use state::DaemonConfig;
