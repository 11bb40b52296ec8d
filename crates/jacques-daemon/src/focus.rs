//! Focus watcher: maps the OS foreground terminal to a session.
//!
//! A fixed-interval poller asks the platform probe for the foreground
//! terminal's identity as a terminal-key candidate, resolves it through the
//! registry, and moves focus (with a bare `focus_changed` broadcast) when
//! it lands on a different session.

use crate::broadcast::Broadcaster;
use crate::state::SharedRegistry;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Platform strategy for reading the foreground terminal identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundProbe {
    /// macOS: ask the scripting bridge which terminal is frontmost.
    Osascript,
    /// No strategy on this platform; the watcher idles.
    Disabled,
}

impl ForegroundProbe {
    pub fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            Self::Osascript
        } else {
            Self::Disabled
        }
    }

    /// Current foreground terminal as a terminal-key candidate.
    pub async fn poll(&self) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::Osascript => poll_osascript().await,
        }
    }
}

/// Resolve the frontmost app; for known terminals, fetch the identity of
/// the active tab/session and phrase it as a terminal key.
async fn poll_osascript() -> Option<String> {
    let front = run_osascript(
        r#"tell application "System Events" to get name of first process whose frontmost is true"#,
    )
    .await?;
    match front.as_str() {
        "iTerm2" => {
            let id = run_osascript(
                r#"tell application "iTerm2" to get id of current session of current tab of current window"#,
            )
            .await?;
            Some(format!("ITERM:{id}"))
        }
        "Terminal" => {
            let tty = run_osascript(
                r#"tell application "Terminal" to get tty of selected tab of front window"#,
            )
            .await?;
            Some(format!("TTY:{tty}"))
        }
        _ => None,
    }
}

async fn run_osascript(script: &str) -> Option<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new("osascript").args(["-e", script]).output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

// ─── Watcher ──────────────────────────────────────────────────────

pub struct FocusWatcher {
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    probe: ForegroundProbe,
    interval: Duration,
    cancel: CancellationToken,
}

impl FocusWatcher {
    pub fn new(
        registry: SharedRegistry,
        broadcaster: Broadcaster,
        probe: ForegroundProbe,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            probe,
            interval,
            cancel,
        }
    }

    pub async fn run(self) {
        if self.probe == ForegroundProbe::Disabled {
            info!("focus watcher: no foreground probe on this platform, idling");
            self.cancel.cancelled().await;
            return;
        }
        info!(interval_ms = self.interval.as_millis() as u64, "focus watcher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => {
                    info!("focus watcher: cancellation requested, shutting down");
                    return;
                }
            }
            if let Some(candidate) = self.probe.poll().await {
                if apply_focus_candidate(&self.registry, &candidate).await {
                    self.broadcaster.force_broadcast_focus_change().await;
                }
            }
        }
    }
}

/// Point focus at the session owning `candidate`, if any and not already
/// focused. Returns whether focus moved.
pub async fn apply_focus_candidate(registry: &SharedRegistry, candidate: &str) -> bool {
    let mut reg = registry.write().await;
    let Some(session_id) = reg
        .find_by_terminal_key(candidate)
        .map(|s| s.session_id.clone())
    else {
        return false;
    };
    if reg.focused_session_id() == Some(session_id.as_str()) {
        return false;
    }
    debug!(session_id = %session_id, candidate, "foreground terminal changed focus");
    reg.set_focus(&session_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
