//! Ingress socket: newline-delimited JSON events from assistant hooks.
//!
//! One Unix stream listener; each connection is a stream of zero or more
//! events until EOF. Malformed events are logged and skipped, never
//! tearing down the connection.

use crate::error::DaemonError;
use jacques_core::events::{EventDecodeError, IngressEvent, decode_event};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct IngressServer {
    socket_path: PathBuf,
    tx: mpsc::Sender<IngressEvent>,
    cancel: CancellationToken,
}

impl IngressServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        tx: mpsc::Sender<IngressEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            tx,
            cancel,
        }
    }

    /// Bind the ingress socket, failing fast when another process already
    /// listens on it. A socket file nobody listens on is stale debris from
    /// a crashed run and is unlinked.
    pub async fn bind(&self) -> Result<UnixListener, DaemonError> {
        if self.socket_path.exists() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => {
                    return Err(DaemonError::SocketBusy {
                        path: self.socket_path.display().to_string(),
                    });
                }
                Err(_) => {
                    info!(path = %self.socket_path.display(), "removing stale ingress socket");
                    tokio::fs::remove_file(&self.socket_path).await?;
                }
            }
        }
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "ingress socket listening");
        Ok(listener)
    }

    /// Accept connections until cancelled.
    pub async fn run(self, listener: UnixListener) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let tx = self.tx.clone();
                            tokio::spawn(handle_connection(stream, tx));
                        }
                        Err(e) => {
                            warn!(error = %e, "ingress accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    info!("ingress server: cancellation requested, shutting down");
                    break;
                }
            }
        }
        cleanup_socket(&self.socket_path).await;
    }
}

async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<IngressEvent>) {
    let mut lines = BufReader::new(stream).lines();
    debug!("ingress connection opened");

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_event(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    debug!("event pipeline closed, dropping ingress connection");
                    return;
                }
            }
            Err(e) => log_decode_error(&e, line),
        }
    }
    debug!("ingress connection closed (EOF)");
}

fn log_decode_error(error: &EventDecodeError, line: &str) {
    match error {
        EventDecodeError::UnknownEvent { event } => {
            warn!(event = %event, "unknown ingress event type, dropping");
        }
        EventDecodeError::MissingSessionId { event } => {
            warn!(event = %event, "ingress event without session_id, dropping");
        }
        other => {
            warn!(error = %other, line, "malformed ingress event, dropping");
        }
    }
}

async fn cleanup_socket(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove ingress socket");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn temp_socket(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("jacques-test-{}-{name}.sock", std::process::id()))
    }

    #[tokio::test]
    async fn events_flow_from_socket_to_channel() {
        let path = temp_socket("flow");
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let server = IngressServer::new(&path, tx, cancel.clone());
        let listener = server.bind().await.expect("bind");
        let run = tokio::spawn(server.run(listener));

        let mut stream = UnixStream::connect(&path).await.expect("connect");
        stream
            .write_all(
                b"{\"event\":\"session_start\",\"timestamp\":1,\"session_id\":\"A\",\"cwd\":\"/p\",\"project\":\"p\"}\nnot json\n{\"event\":\"idle\",\"timestamp\":2,\"session_id\":\"A\"}\n",
            )
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let first = rx.recv().await.expect("first event");
        assert_eq!(first.session_id(), "A");
        assert!(matches!(first, IngressEvent::SessionStart(_)));

        // The garbage line was dropped; the idle event still arrives.
        let second = rx.recv().await.expect("second event");
        assert!(matches!(second, IngressEvent::Idle(_)));

        cancel.cancel();
        let _ = run.await;
        assert!(!path.exists(), "socket removed on shutdown");
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let path = temp_socket("stale");
        // Fabricate a stale socket file nobody listens on.
        let _ = std::fs::remove_file(&path);
        {
            let listener = UnixListener::bind(&path).expect("bind throwaway");
            drop(listener);
        }
        assert!(path.exists());

        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let server = IngressServer::new(&path, tx, cancel.clone());
        let listener = server.bind().await.expect("stale file should be replaced");
        drop(listener);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn live_socket_is_a_distinct_startup_error() {
        let path = temp_socket("live");
        let _ = std::fs::remove_file(&path);
        let _holder = UnixListener::bind(&path).expect("holder");

        let (tx, _rx) = mpsc::channel(4);
        let server = IngressServer::new(&path, tx, CancellationToken::new());
        match server.bind().await {
            Err(DaemonError::SocketBusy { path: p }) => {
                assert!(p.contains("jacques-test"));
            }
            other => panic!("expected SocketBusy, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }
}
