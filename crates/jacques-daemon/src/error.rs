use thiserror::Error;

/// Fatal startup/runtime errors. Each maps to a distinct exit code so
/// supervisors can tell "another instance is running" apart from "port
/// taken elsewhere".
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("another instance holds the PID file {path} (pid {pid})")]
    PidFileHeld { path: String, pid: u32 },
    #[error("another process is listening on the ingress socket {path}")]
    SocketBusy { path: String },
    #[error("{name} port {port} is already bound: {source}")]
    PortBusy {
        name: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("listener startup failed: {0}")]
    Listener(#[from] std::io::Error),
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PidFileHeld { .. } => 2,
            Self::SocketBusy { .. } => 3,
            Self::PortBusy { .. } => 4,
            Self::Listener(_) => 5,
        }
    }
}
