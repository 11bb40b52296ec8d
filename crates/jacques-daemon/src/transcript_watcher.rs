//! Per-session transcript watchers.
//!
//! A watcher is armed the first time a session's transcript path becomes
//! known. It polls the file's mtime (the transcript source is append-only,
//! so mtime is the whole signal), reparses on change, folds fresh token
//! statistics into the session, and broadcasts an update. It also notices
//! the appearance of the adjacent handoff file.

use crate::broadcast::Broadcaster;
use crate::state::SharedRegistry;
use jacques_core::messages::ServerMessage;
use jacques_transcript::{TranscriptStats, parse_file};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct TranscriptWatchers {
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    poll_interval: Duration,
    cancel: CancellationToken,
    armed: Mutex<HashSet<String>>,
}

impl TranscriptWatchers {
    pub fn new(
        registry: SharedRegistry,
        broadcaster: Broadcaster,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            poll_interval,
            cancel,
            armed: Mutex::new(HashSet::new()),
        }
    }

    /// Arm a watcher for a session's transcript. Idempotent per session.
    pub fn arm(&self, session_id: &str, transcript_path: &Path) {
        {
            let Ok(mut armed) = self.armed.lock() else {
                return;
            };
            if !armed.insert(session_id.to_string()) {
                return;
            }
        }
        debug!(
            session_id,
            path = %transcript_path.display(),
            "arming transcript watcher"
        );
        tokio::spawn(watch_transcript(
            self.registry.clone(),
            self.broadcaster.clone(),
            session_id.to_string(),
            transcript_path.to_path_buf(),
            self.poll_interval,
            self.cancel.clone(),
        ));
    }
}

async fn watch_transcript(
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    session_id: String,
    path: PathBuf,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_mtime: i64 = 0;
    let mut handoff_announced = false;
    let handoff = handoff_path(&path);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => {
                debug!(session_id, "transcript watcher cancelled");
                return;
            }
        }

        // Stop once the session is gone.
        if registry.read().await.get(&session_id).is_none() {
            debug!(session_id, "session unregistered, stopping transcript watcher");
            return;
        }

        if !handoff_announced && handoff.exists() {
            handoff_announced = true;
            broadcaster.send(ServerMessage::HandoffReady {
                session_id: session_id.clone(),
                path: handoff.display().to_string(),
            });
        }

        let mtime = match jacques_catalog::paths::mtime_ms(&path) {
            Ok(mtime) => mtime,
            Err(_) => continue, // transcript not written yet
        };
        if mtime == last_mtime {
            continue;
        }
        last_mtime = mtime;

        let parsed = match parse_file(&path) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(session_id, error = %e, "failed to reparse transcript");
                continue;
            }
        };
        let stats = TranscriptStats::from_entries(&parsed.entries);
        let updated = {
            let mut reg = registry.write().await;
            apply_stats(&mut reg, &session_id, &stats)
        };
        if let Some(session) = updated {
            broadcaster.send(ServerMessage::SessionUpdate { session });
        }
    }
}

/// Fold transcript statistics into the session's context metrics. The
/// percentages are whatever the hooks last reported; only token totals are
/// refreshed here, and they are always estimates.
fn apply_stats(
    registry: &mut jacques_core::SessionRegistry,
    session_id: &str,
    stats: &TranscriptStats,
) -> Option<jacques_core::Session> {
    let current = registry.get(session_id)?.clone();
    let mut metrics = current.context_metrics.clone().unwrap_or_default();
    metrics.total_input_tokens = stats.total_input_tokens();
    metrics.total_output_tokens = stats.total_output_tokens();
    metrics.is_estimate = true;
    registry.set_context_metrics(session_id, metrics)
}

fn handoff_path(transcript: &Path) -> PathBuf {
    let stem = transcript
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    transcript.with_file_name(format!("{stem}.handoff.md"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
