//! Broadcast service.
//!
//! Turns registry mutations into ordered outbound message sequences on a
//! single broadcast channel. Websocket client tasks subscribe; the channel
//! keeps client addition/removal atomic relative to sends. Messages are
//! emitted in mutation order and never coalesced; a lagging client is
//! dropped by its own task, which never stalls the rest.

use crate::state::SharedRegistry;
use jacques_core::messages::ServerMessage;
use jacques_core::types::Session;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<ServerMessage>,
    registry: SharedRegistry,
}

impl Broadcaster {
    pub fn new(registry: SharedRegistry) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, registry }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    /// Raw sender handle, for the log-interception layer.
    pub fn sender(&self) -> broadcast::Sender<ServerMessage> {
        self.tx.clone()
    }

    /// Raw send. A send with no connected clients is not an error.
    pub fn send(&self, message: ServerMessage) {
        let _ = self.tx.send(message);
    }

    /// `session_update` followed by `focus_changed`. The focus message
    /// always carries the registry's *current* focus, which may name a
    /// different session than the one that mutated.
    pub async fn broadcast_session_with_focus(&self, session: Session) {
        self.send(ServerMessage::SessionUpdate { session });
        self.force_broadcast_focus_change().await;
    }

    /// `session_removed` followed by `focus_changed`.
    pub async fn broadcast_session_removed_with_focus(&self, session_id: &str) {
        self.send(ServerMessage::SessionRemoved {
            session_id: session_id.to_string(),
        });
        self.force_broadcast_focus_change().await;
    }

    /// Bare `focus_changed` carrying the current focus (nullable).
    pub async fn force_broadcast_focus_change(&self) {
        let (session_id, session) = {
            let registry = self.registry.read().await;
            (
                registry.focused_session_id().map(str::to_string),
                registry.focused_session().cloned(),
            )
        };
        self.send(ServerMessage::FocusChanged {
            session_id,
            session,
        });
    }

    pub async fn broadcast_server_status(&self, status: &str) {
        let session_count = self.registry.read().await.len();
        self.send(ServerMessage::ServerStatus {
            status: status.to_string(),
            session_count,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_shared_registry;
    use jacques_core::events::SessionStartEvent;

    fn start_event(id: &str, ts: i64) -> SessionStartEvent {
        SessionStartEvent {
            timestamp: ts,
            session_id: id.into(),
            cwd: "/u/p".into(),
            project: "p".into(),
            terminal_key: Some(format!("TTY:/dev/ttys-{id}")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn session_update_then_focus_changed_in_order() {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let mut rx = broadcaster.subscribe();

        let session = registry.write().await.register_session(&start_event("A", 1000));
        broadcaster.broadcast_session_with_focus(session).await;

        match rx.recv().await.unwrap() {
            ServerMessage::SessionUpdate { session } => assert_eq!(session.session_id, "A"),
            other => panic!("expected session_update first, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ServerMessage::FocusChanged { session_id, .. } => {
                assert_eq!(session_id.as_deref(), Some("A"));
            }
            other => panic!("expected focus_changed second, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn removal_broadcast_carries_survivor_focus() {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry.clone());

        {
            let mut reg = registry.write().await;
            reg.register_session(&start_event("A", 1000));
            reg.register_session(&start_event("B", 900));
            reg.set_focus("A");
            reg.unregister_session("A");
        }

        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast_session_removed_with_focus("A").await;

        match rx.recv().await.unwrap() {
            ServerMessage::SessionRemoved { session_id } => assert_eq!(session_id, "A"),
            other => panic!("expected session_removed, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ServerMessage::FocusChanged { session_id, session } => {
                assert_eq!(session_id.as_deref(), Some("B"));
                assert_eq!(session.unwrap().session_id, "B");
            }
            other => panic!("expected focus_changed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn focus_change_on_empty_registry_is_null() {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry);
        let mut rx = broadcaster.subscribe();

        broadcaster.force_broadcast_focus_change().await;
        match rx.recv().await.unwrap() {
            ServerMessage::FocusChanged { session_id, session } => {
                assert!(session_id.is_none());
                assert!(session.is_none());
            }
            other => panic!("expected focus_changed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_without_clients_does_not_error() {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry);
        // No subscriber exists; this must be a quiet no-op.
        broadcaster.broadcast_server_status("running").await;
    }
}
