//! Log interception.
//!
//! A `tracing` layer that mirrors daemon log records to websocket clients
//! as `server_log` messages, so the dashboard can show the daemon's own
//! logs without tailing files.

use chrono::Utc;
use jacques_core::messages::ServerMessage;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub struct WsLogLayer {
    tx: broadcast::Sender<ServerMessage>,
}

impl WsLogLayer {
    pub fn new(tx: broadcast::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for WsLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        // Forwarding the websocket layer's own send errors would feed back
        // into itself.
        if target.contains("ws_server") {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }
        let _ = self.tx.send(ServerMessage::ServerLog {
            level: event.metadata().level().to_string(),
            message: visitor.message,
            timestamp: Utc::now().timestamp_millis(),
            source: target.to_string(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_are_mirrored_as_server_log_messages() {
        let (tx, mut rx) = broadcast::channel(16);
        let subscriber = tracing_subscriber::registry().with(WsLogLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(port = 4242, "listener ready");
        });

        match rx.try_recv().expect("one mirrored message") {
            ServerMessage::ServerLog { level, message, .. } => {
                assert_eq!(level, "INFO");
                assert!(message.contains("listener ready"));
            }
            other => panic!("expected server_log, got {other:?}"),
        }
    }

    #[test]
    fn ws_server_target_is_suppressed() {
        let (tx, mut rx) = broadcast::channel(16);
        let subscriber = tracing_subscriber::registry().with(WsLogLayer::new(tx));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "jacques_daemon::ws_server", "client lagged");
        });
        assert!(rx.try_recv().is_err());
    }
}
