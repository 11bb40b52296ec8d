//! Event pipeline: applies ingress events to the registry and triggers
//! broadcasts.
//!
//! A single dispatch task consumes the merged event stream from all ingress
//! connections, so per-session mutation order matches arrival order. The
//! focus watcher needs no separate key map: it resolves candidates against
//! the registry, which this pipeline keeps current.

use crate::broadcast::Broadcaster;
use crate::state::SharedRegistry;
use crate::transcript_watcher::TranscriptWatchers;
use jacques_core::events::IngressEvent;
use jacques_core::messages::ServerMessage;
use jacques_core::types::Session;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct EventPipeline {
    rx: mpsc::Receiver<IngressEvent>,
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    watchers: Arc<TranscriptWatchers>,
    cancel: CancellationToken,
}

impl EventPipeline {
    pub fn new(
        rx: mpsc::Receiver<IngressEvent>,
        registry: SharedRegistry,
        broadcaster: Broadcaster,
        watchers: Arc<TranscriptWatchers>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            registry,
            broadcaster,
            watchers,
            cancel,
        }
    }

    pub async fn run(mut self) {
        info!("event pipeline started");
        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("event pipeline: ingress channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("event pipeline: cancellation requested, shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: IngressEvent) {
        match event {
            IngressEvent::SessionStart(ev) => {
                debug!(session_id = %ev.session_id, "session_start");
                let session = self.registry.write().await.register_session(&ev);
                self.arm_watcher(&session);
                self.broadcaster.broadcast_session_with_focus(session).await;
            }
            IngressEvent::Activity(ev) => {
                let updated = self.registry.write().await.update_activity(&ev);
                match updated {
                    Some(session) => {
                        debug!(session_id = %ev.session_id, tool = %ev.tool_name, "activity");
                        self.arm_watcher(&session);
                        self.broadcaster.broadcast_session_with_focus(session).await;
                    }
                    None => {
                        warn!(session_id = %ev.session_id, "activity for unknown session, dropping");
                    }
                }
            }
            IngressEvent::ContextUpdate(ev) => {
                debug!(session_id = %ev.session_id, "context_update");
                let session = self.registry.write().await.update_context(&ev);
                self.arm_watcher(&session);
                self.broadcaster.broadcast_session_with_focus(session).await;
            }
            IngressEvent::Idle(ev) => {
                let updated = self.registry.write().await.set_session_idle(&ev.session_id);
                match updated {
                    Some(session) => {
                        debug!(session_id = %ev.session_id, "idle");
                        // Status only: no focus message for idle transitions.
                        self.broadcaster.send(ServerMessage::SessionUpdate { session });
                    }
                    None => {
                        warn!(session_id = %ev.session_id, "idle for unknown session, dropping");
                    }
                }
            }
            IngressEvent::SessionEnd(ev) => {
                let removed = self.registry.write().await.unregister_session(&ev.session_id);
                if removed.is_some() {
                    info!(session_id = %ev.session_id, "session ended");
                    self.broadcaster
                        .broadcast_session_removed_with_focus(&ev.session_id)
                        .await;
                } else {
                    warn!(session_id = %ev.session_id, "session_end for unknown session");
                }
            }
        }
    }

    fn arm_watcher(&self, session: &Session) {
        if let Some(path) = &session.transcript_path {
            self.watchers.arm(&session.session_id, Path::new(path));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_shared_registry;
    use jacques_core::events::decode_event;
    use jacques_core::types::SessionStatus;
    use std::time::Duration;

    struct Harness {
        tx: mpsc::Sender<IngressEvent>,
        registry: SharedRegistry,
        rx: tokio::sync::broadcast::Receiver<ServerMessage>,
        cancel: CancellationToken,
    }

    fn spawn_pipeline() -> Harness {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let rx = broadcaster.subscribe();
        let cancel = CancellationToken::new();
        let watchers = Arc::new(TranscriptWatchers::new(
            registry.clone(),
            broadcaster.clone(),
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        let (tx, event_rx) = mpsc::channel(32);
        let pipeline = EventPipeline::new(
            event_rx,
            registry.clone(),
            broadcaster,
            watchers,
            cancel.clone(),
        );
        tokio::spawn(pipeline.run());
        Harness {
            tx,
            registry,
            rx,
            cancel,
        }
    }

    async fn send_line(harness: &Harness, line: &str) {
        harness
            .tx
            .send(decode_event(line).expect("decode"))
            .await
            .expect("send");
    }

    async fn next(harness: &mut Harness) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), harness.rx.recv())
            .await
            .expect("message within deadline")
            .expect("channel open")
    }

    // Scenario S1: the exact broadcast sequence for start/activity/start.
    #[tokio::test]
    async fn s1_broadcast_sequence() {
        let mut h = spawn_pipeline();

        send_line(&h, r#"{"event":"session_start","timestamp":1000,"session_id":"A","cwd":"/u/a","project":"a","terminal_key":"TTY:/dev/ttys1"}"#).await;
        send_line(&h, r#"{"event":"activity","timestamp":1100,"session_id":"A","tool_name":"Read"}"#).await;
        send_line(&h, r#"{"event":"session_start","timestamp":1200,"session_id":"B","cwd":"/u/b","project":"b","terminal_key":"TTY:/dev/ttys2"}"#).await;

        // session_update(A), focus_changed(A)
        assert!(matches!(next(&mut h).await,
            ServerMessage::SessionUpdate { session } if session.session_id == "A"));
        assert!(matches!(next(&mut h).await,
            ServerMessage::FocusChanged { session_id: Some(id), .. } if id == "A"));

        // session_update(A, working), focus_changed(A)
        match next(&mut h).await {
            ServerMessage::SessionUpdate { session } => {
                assert_eq!(session.session_id, "A");
                assert_eq!(session.status, SessionStatus::Working);
            }
            other => panic!("expected working update, got {other:?}"),
        }
        assert!(matches!(next(&mut h).await,
            ServerMessage::FocusChanged { session_id: Some(id), .. } if id == "A"));

        // session_update(B), focus_changed(B)
        assert!(matches!(next(&mut h).await,
            ServerMessage::SessionUpdate { session } if session.session_id == "B"));
        assert!(matches!(next(&mut h).await,
            ServerMessage::FocusChanged { session_id: Some(id), .. } if id == "B"));

        // Enumeration: [B, A].
        let sessions = h.registry.read().await.sessions();
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        h.cancel.cancel();
    }

    // Scenario S3: ending the focused session shifts focus to the survivor.
    #[tokio::test]
    async fn s3_session_end_broadcasts_removal_then_survivor_focus() {
        let mut h = spawn_pipeline();

        send_line(&h, r#"{"event":"session_start","timestamp":900,"session_id":"B","cwd":"/u/b","project":"b","terminal_key":"TTY:/dev/ttys2"}"#).await;
        send_line(&h, r#"{"event":"session_start","timestamp":1000,"session_id":"A","cwd":"/u/a","project":"a","terminal_key":"TTY:/dev/ttys1"}"#).await;
        for _ in 0..4 {
            next(&mut h).await;
        }

        send_line(&h, r#"{"event":"session_end","timestamp":2000,"session_id":"A"}"#).await;
        assert!(matches!(next(&mut h).await,
            ServerMessage::SessionRemoved { session_id } if session_id == "A"));
        assert!(matches!(next(&mut h).await,
            ServerMessage::FocusChanged { session_id: Some(id), .. } if id == "B"));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn idle_updates_status_without_focus_message() {
        let mut h = spawn_pipeline();
        send_line(&h, r#"{"event":"session_start","timestamp":1000,"session_id":"A","cwd":"/u/a","project":"a","terminal_key":"TTY:/dev/ttys1"}"#).await;
        next(&mut h).await;
        next(&mut h).await;

        send_line(&h, r#"{"event":"idle","timestamp":1100,"session_id":"A"}"#).await;
        match next(&mut h).await {
            ServerMessage::SessionUpdate { session } => {
                assert_eq!(session.status, SessionStatus::Idle);
            }
            other => panic!("expected session_update, got {other:?}"),
        }

        // Nothing further: idle does not emit focus_changed. Prove it by
        // pushing another event and seeing its update arrive next.
        send_line(&h, r#"{"event":"activity","timestamp":1200,"session_id":"A","tool_name":"Bash"}"#).await;
        assert!(matches!(next(&mut h).await, ServerMessage::SessionUpdate { .. }));
        h.cancel.cancel();
    }

    // Scenario S2 end-to-end: context_update auto-registers.
    #[tokio::test]
    async fn context_update_before_start_auto_registers() {
        let mut h = spawn_pipeline();
        send_line(&h, r#"{"event":"context_update","timestamp":500,"session_id":"C","used_percentage":42,"remaining_percentage":58,"context_window_size":200000,"project_dir":"/u/x/proj"}"#).await;

        match next(&mut h).await {
            ServerMessage::SessionUpdate { session } => {
                assert_eq!(session.session_id, "C");
                assert_eq!(session.terminal_key, "AUTO:C");
                assert_eq!(session.project, "proj");
            }
            other => panic!("expected session_update, got {other:?}"),
        }
        assert!(matches!(next(&mut h).await,
            ServerMessage::FocusChanged { session_id: Some(id), .. } if id == "C"));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn activity_for_unknown_session_is_dropped() {
        let h = spawn_pipeline();
        send_line(&h, r#"{"event":"activity","timestamp":1,"session_id":"ghost","tool_name":"Read"}"#).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.registry.read().await.is_empty());
        h.cancel.cancel();
    }
}
