//! Shared daemon state and configuration.

use jacques_core::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The registry behind the daemon's single coarse lock. Mutations take the
/// write half; enumeration takes the read half. Never held across awaits.
pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

pub fn new_shared_registry() -> SharedRegistry {
    Arc::new(RwLock::new(SessionRegistry::new()))
}

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/jacques.sock";
pub const DEFAULT_WS_PORT: u16 = 4242;
pub const DEFAULT_HTTP_PORT: u16 = 4243;
pub const DEFAULT_MAX_IDLE_MINUTES: u64 = 60;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub ws_port: u16,
    pub http_port: u16,
    pub max_idle_minutes: u64,
    pub focus_poll_interval: Duration,
    pub transcript_poll_interval: Duration,
    pub sweep_interval: Duration,
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            ws_port: DEFAULT_WS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            max_idle_minutes: DEFAULT_MAX_IDLE_MINUTES,
            focus_poll_interval: Duration::from_millis(1000),
            transcript_poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            pid_file: default_pid_file(),
        }
    }
}

/// `~/.jacques/server.pid`; falls back to a temp path when the home
/// directory cannot be resolved.
pub fn default_pid_file() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".jacques").join("server.pid"))
        .unwrap_or_else(|| std::env::temp_dir().join("jacques-server.pid"))
}
