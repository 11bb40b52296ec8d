//! Websocket fan-out server.
//!
//! Every new client receives one `initial_state` snapshot, then the
//! ordered broadcast stream. Inbound client commands are handled inline;
//! request-scoped replies (activation results, handoff context) go only to
//! the requesting client, everything else re-enters the broadcast channel.

use crate::activator::activate_terminal;
use crate::broadcast::Broadcaster;
use crate::error::DaemonError;
use crate::settings;
use crate::state::SharedRegistry;
use futures_util::{SinkExt, StreamExt};
use jacques_core::messages::{ClientMessage, ServerMessage};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct WsServer {
    port: u16,
    registry: SharedRegistry,
    broadcaster: Broadcaster,
    settings_path: Option<PathBuf>,
    notification_settings: Arc<RwLock<Value>>,
    cancel: CancellationToken,
}

impl WsServer {
    pub fn new(
        port: u16,
        registry: SharedRegistry,
        broadcaster: Broadcaster,
        settings_path: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            registry,
            broadcaster,
            settings_path,
            notification_settings: Arc::new(RwLock::new(Value::Object(Default::default()))),
            cancel,
        }
    }

    /// Bind the websocket port; fails fast when it is already taken.
    pub async fn bind(&self) -> Result<TcpListener, DaemonError> {
        TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|source| DaemonError::PortBusy {
                name: "websocket",
                port: self.port,
                source,
            })
    }

    /// Accept clients until cancelled.
    pub async fn run(self, listener: TcpListener) {
        info!(port = self.port, "websocket server listening");
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "ws: TCP connection accepted");
                            let server = self.clone();
                            tokio::spawn(async move {
                                match tokio_tungstenite::accept_async(stream).await {
                                    Ok(ws_stream) => {
                                        if let Err(e) = server.handle_client(ws_stream).await {
                                            debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("websocket server: cancellation requested, shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_client(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut broadcast_rx = self.broadcaster.subscribe();

        // One full snapshot, newest session first, then deltas forever.
        let initial = {
            let registry = self.registry.read().await;
            ServerMessage::InitialState {
                sessions: registry.sessions(),
                focused_session_id: registry.focused_session_id().map(str::to_string),
            }
        };
        ws_tx
            .send(Message::Text(serde_json::to_string(&initial)?))
            .await?;

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            debug!(error = %e, "ws read error, dropping client");
                            return Err(e.into());
                        }
                        None => {
                            debug!("ws client disconnected (stream ended)");
                            return Ok(());
                        }
                    };
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => {
                            debug!("ws client sent close frame");
                            return Ok(());
                        }
                        Message::Ping(data) => {
                            ws_tx.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };
                    let client_msg: ClientMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "unknown or malformed client message, dropping");
                            continue;
                        }
                    };
                    if let Some(reply) = self.handle_client_message(client_msg).await {
                        ws_tx.send(Message::Text(serde_json::to_string(&reply)?)).await?;
                    }
                }

                outbound = broadcast_rx.recv() => {
                    match outbound {
                        Ok(message) => {
                            ws_tx.send(Message::Text(serde_json::to_string(&message)?)).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "ws client lagged, dropping it");
                            return Ok(());
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("broadcast channel closed, dropping client");
                            return Ok(());
                        }
                    }
                }

                _ = self.cancel.cancelled() => {
                    debug!("ws client handler: cancellation requested");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Handle one inbound command. `Some(reply)` goes only to the
    /// requesting client; broadcasts happen as side effects.
    async fn handle_client_message(&self, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::SelectSession { session_id } => {
                let moved = self.registry.write().await.set_focus(&session_id);
                if moved {
                    self.broadcaster.force_broadcast_focus_change().await;
                } else {
                    warn!(session_id = %session_id, "select_session for unknown session");
                }
                None
            }
            ClientMessage::FocusTerminal { session_id } => {
                let terminal_key = {
                    let registry = self.registry.read().await;
                    registry.get(&session_id).map(|s| s.terminal_key.clone())
                };
                let result = match terminal_key {
                    Some(key) => activate_terminal(&key).await,
                    None => crate::activator::ActivationResult {
                        success: false,
                        method: "unsupported".into(),
                        error: Some(format!("unknown session {session_id}")),
                    },
                };
                Some(ServerMessage::FocusTerminalResult {
                    session_id,
                    success: result.success,
                    method: result.method,
                    error: result.error,
                })
            }
            ClientMessage::ToggleAutocompact { enabled } => {
                let Some(path) = self.settings_path.clone() else {
                    return Some(ServerMessage::AutocompactToggled {
                        enabled,
                        warning: Some("assistant settings path is unavailable".into()),
                    });
                };
                match settings::toggle_autocompact(&path, enabled) {
                    Ok(warning) => {
                        self.broadcaster
                            .send(ServerMessage::AutocompactToggled { enabled, warning });
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to toggle auto-compact");
                        Some(ServerMessage::AutocompactToggled {
                            enabled: !enabled,
                            warning: Some(e.to_string()),
                        })
                    }
                }
            }
            ClientMessage::GetHandoffContext { session_id } => {
                Some(self.handoff_context(&session_id).await)
            }
            ClientMessage::UpdateNotificationSettings { settings } => {
                *self.notification_settings.write().await = settings.clone();
                self.broadcaster
                    .send(ServerMessage::NotificationSettings { settings });
                None
            }
            ClientMessage::TileWindows { .. } => Some(ServerMessage::TileWindowsResult {
                success: false,
                error: Some("window tiling is not supported on this host".into()),
            }),
            ClientMessage::ChatSend { .. } | ClientMessage::ChatAbort { .. } => {
                Some(ServerMessage::ChatError {
                    error: "chat backend is not configured".into(),
                })
            }
            ClientMessage::TriggerAction { action, session_id } => {
                info!(action = %action, session_id = ?session_id, "client triggered action");
                None
            }
        }
    }

    async fn handoff_context(&self, session_id: &str) -> ServerMessage {
        let transcript = {
            let registry = self.registry.read().await;
            registry.get(session_id).and_then(|s| s.transcript_path.clone())
        };
        let Some(transcript) = transcript else {
            return ServerMessage::HandoffContextError {
                session_id: session_id.to_string(),
                error: "session has no known transcript".into(),
            };
        };
        let stem = transcript
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let handoff = transcript.with_file_name(format!("{stem}.handoff.md"));
        match tokio::fs::read_to_string(&handoff).await {
            Ok(context) => {
                // Rough byte-based token estimate; good enough for a gauge.
                let token_estimate = (context.len() / 4) as u64;
                ServerMessage::HandoffContext {
                    session_id: session_id.to_string(),
                    context,
                    token_estimate,
                    data: serde_json::json!({ "path": handoff.display().to_string() }),
                }
            }
            Err(e) => ServerMessage::HandoffContextError {
                session_id: session_id.to_string(),
                error: format!("no handoff file at {}: {e}", handoff.display()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
