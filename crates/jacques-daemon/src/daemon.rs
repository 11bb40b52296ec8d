//! Daemon assembly: owns every component and runs the task set.
//!
//! All shared state is explicit fields here, threaded into components at
//! construction; there are no globals. Shutdown is cooperative through one
//! cancellation token.

use crate::broadcast::Broadcaster;
use crate::error::DaemonError;
use crate::focus::{ForegroundProbe, FocusWatcher};
use crate::http::{AppState, HttpServer};
use crate::ingress::IngressServer;
use crate::pidfile::PidFile;
use crate::pipeline::EventPipeline;
use crate::scanner::ProcessScanner;
use crate::settings;
use crate::state::{DaemonConfig, SharedRegistry, new_shared_registry};
use crate::transcript_watcher::TranscriptWatchers;
use crate::ws_server::WsServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const INGRESS_CHANNEL_CAPACITY: usize = 256;

pub struct Daemon {
    config: DaemonConfig,
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry.clone());
        Self {
            config,
            registry,
            broadcaster,
            cancel: CancellationToken::new(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bring the daemon up, run until the cancellation token fires (ctrl-c
    /// in `main`), then shut everything down.
    pub async fn run(self) -> Result<(), DaemonError> {
        let pid_file = PidFile::acquire(&self.config.pid_file)?;
        info!(pid_file = %pid_file.path().display(), "jacques daemon starting");

        // Bind all three listeners before serving anything: startup must
        // fail fast, with a distinct error, while nothing is half-running.
        let (event_tx, event_rx) = mpsc::channel(INGRESS_CHANNEL_CAPACITY);
        let ingress = IngressServer::new(&self.config.socket_path, event_tx, self.cancel.clone());
        let ingress_listener = match ingress.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                pid_file.release();
                return Err(e);
            }
        };

        let ws = WsServer::new(
            self.config.ws_port,
            self.registry.clone(),
            self.broadcaster.clone(),
            settings::default_settings_path(),
            self.cancel.clone(),
        );
        let ws_listener = match ws.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                pid_file.release();
                return Err(e);
            }
        };

        let http = HttpServer::new(
            self.config.http_port,
            AppState {
                registry: self.registry.clone(),
                broadcaster: self.broadcaster.clone(),
                projects_root: jacques_catalog::paths::claude_projects_root(),
                archive_settings_path: dirs::home_dir()
                    .map(|home| home.join(".jacques").join("archive-settings.json")),
            },
            self.cancel.clone(),
        );
        let http_listener = match http.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                pid_file.release();
                return Err(e);
            }
        };

        // Task set.
        let watchers = Arc::new(TranscriptWatchers::new(
            self.registry.clone(),
            self.broadcaster.clone(),
            self.config.transcript_poll_interval,
            self.cancel.clone(),
        ));
        let pipeline = EventPipeline::new(
            event_rx,
            self.registry.clone(),
            self.broadcaster.clone(),
            watchers,
            self.cancel.clone(),
        );
        let focus = FocusWatcher::new(
            self.registry.clone(),
            self.broadcaster.clone(),
            ForegroundProbe::for_platform(),
            self.config.focus_poll_interval,
            self.cancel.clone(),
        );

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(ingress.run(ingress_listener)));
        tasks.push(tokio::spawn(pipeline.run()));
        tasks.push(tokio::spawn(ws.run(ws_listener)));
        tasks.push(tokio::spawn(http.run(http_listener)));
        tasks.push(tokio::spawn(focus.run()));
        tasks.push(tokio::spawn(sweeper(
            self.registry.clone(),
            self.broadcaster.clone(),
            self.config.max_idle_minutes,
            self.config.sweep_interval,
            self.cancel.clone(),
        )));

        // With transports listening, pick up sessions that predate us.
        self.boot_scan().await;
        self.broadcaster.broadcast_server_status("running").await;

        self.cancel.cancelled().await;
        info!("shutdown requested, stopping tasks");
        self.broadcaster.broadcast_server_status("stopping").await;
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task terminated abnormally during shutdown");
            }
        }
        pid_file.release();
        info!("jacques daemon stopped");
        Ok(())
    }

    /// One synchronous scan of the process table for assistants that were
    /// already running; every hit is registered as a discovered session.
    async fn boot_scan(&self) {
        let detected = tokio::task::spawn_blocking(|| ProcessScanner::new().scan())
            .await
            .unwrap_or_default();
        if detected.is_empty() {
            info!("startup scan found no running assistant processes");
            return;
        }
        info!(count = detected.len(), "startup scan recovered running sessions");
        for record in detected {
            let registered = self
                .registry
                .write()
                .await
                .register_discovered_session(&record);
            if let Some(session) = registered {
                self.broadcaster.broadcast_session_with_focus(session).await;
            }
        }
    }
}

/// Periodic stale-session sweep: idle sessions older than the threshold are
/// unregistered and their removal is broadcast.
async fn sweeper(
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    max_idle_minutes: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let max_idle_ms = (max_idle_minutes * 60 * 1000) as i64;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                info!("stale-session sweeper: cancellation requested");
                return;
            }
        }
        let now = chrono::Utc::now().timestamp_millis();
        let removed = registry.write().await.sweep_stale(max_idle_ms, now);
        for session_id in removed {
            info!(session_id = %session_id, "swept stale idle session");
            broadcaster
                .broadcast_session_removed_with_focus(&session_id)
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
