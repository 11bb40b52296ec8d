//! Terminal activator: bring a session's terminal window to the front.
//!
//! Dispatch is by terminal-key prefix. Every attempt returns a structured
//! result; external commands carry per-call timeouts so a wedged scripting
//! host can never hang the daemon. Failures are reported to the requesting
//! client and never touch registry state.

use jacques_core::terminal_key::{TerminalKeyKind, key_body};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Timeout for programmatic terminals (kitty, wezterm remote control).
const PROGRAMMATIC_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for scriptable host applications (osascript-driven).
const SCRIPTABLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationResult {
    pub success: bool,
    pub method: String,
    pub error: Option<String>,
}

impl ActivationResult {
    fn ok(method: &str) -> Self {
        Self {
            success: true,
            method: method.to_string(),
            error: None,
        }
    }

    fn fail(method: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            method: method.to_string(),
            error: Some(error.into()),
        }
    }

    fn unsupported(error: impl Into<String>) -> Self {
        Self::fail("unsupported", error)
    }
}

/// Activate the terminal behind a stored terminal key.
pub async fn activate_terminal(terminal_key: &str) -> ActivationResult {
    match TerminalKeyKind::of(terminal_key) {
        TerminalKeyKind::Iterm => activate_iterm(key_body(terminal_key)).await,
        TerminalKeyKind::Kitty => activate_kitty(key_body(terminal_key)).await,
        TerminalKeyKind::Wezterm => activate_wezterm(key_body(terminal_key)).await,
        TerminalKeyKind::Tty => activate_terminal_app(key_body(terminal_key)).await,
        TerminalKeyKind::Pid => activate_by_pid(key_body(terminal_key)).await,
        TerminalKeyKind::Discovered => {
            let inner = key_body(terminal_key);
            match unwrap_discovered(inner) {
                Some(unwrapped) => Box::pin(activate_terminal(&unwrapped)).await,
                None => ActivationResult::unsupported(format!(
                    "unrecognized discovered identity: {inner}"
                )),
            }
        }
        TerminalKeyKind::Term | TerminalKeyKind::Auto | TerminalKeyKind::Unknown => {
            ActivationResult::unsupported(format!(
                "terminal key {terminal_key:?} carries no activatable identity"
            ))
        }
        TerminalKeyKind::Malformed => ActivationResult::unsupported(format!(
            "malformed terminal key {terminal_key:?}"
        )),
    }
}

/// Rewrite a `DISCOVERED:` inner identity to a concrete key.
///
/// Inner formats: `iTerm2:w0t0p0:UUID`, `TTY:<path>:<pid>`, `PID:<pid>`.
fn unwrap_discovered(inner: &str) -> Option<String> {
    if let Some(rest) = inner.strip_prefix("iTerm2:") {
        return Some(format!("ITERM:{rest}"));
    }
    if let Some(rest) = inner.strip_prefix("TTY:") {
        // Trailing `:<pid>` is scanner bookkeeping, not part of the path.
        let path = match rest.rsplit_once(':') {
            Some((path, maybe_pid)) if maybe_pid.chars().all(|c| c.is_ascii_digit()) => path,
            _ => rest,
        };
        return Some(format!("TTY:{path}"));
    }
    if let Some(rest) = inner.strip_prefix("PID:") {
        return Some(format!("PID:{rest}"));
    }
    None
}

// ─── Strategies ───────────────────────────────────────────────────

async fn activate_iterm(session_id: &str) -> ActivationResult {
    // Strip any window/tab/pane coordinates down to the UUID suffix.
    let uuid = session_id.rsplit(':').next().unwrap_or(session_id);
    let script = format!(
        r#"tell application "iTerm2"
    activate
    repeat with w in windows
        repeat with t in tabs of w
            repeat with s in sessions of t
                if id of s contains "{uuid}" then
                    select s
                    select t
                    set index of w to 1
                end if
            end repeat
        end repeat
    end repeat
end tell"#
    );
    run_activation("iterm", "osascript", &["-e", &script], SCRIPTABLE_TIMEOUT).await
}

async fn activate_kitty(window_id: &str) -> ActivationResult {
    run_activation(
        "kitty",
        "kitty",
        &["@", "focus-window", "--match", &format!("id:{window_id}")],
        PROGRAMMATIC_TIMEOUT,
    )
    .await
}

async fn activate_wezterm(pane_id: &str) -> ActivationResult {
    run_activation(
        "wezterm",
        "wezterm",
        &["cli", "activate-pane", "--pane-id", pane_id],
        PROGRAMMATIC_TIMEOUT,
    )
    .await
}

async fn activate_terminal_app(tty: &str) -> ActivationResult {
    let tty_path = normalize_tty(tty);
    let script = format!(
        r#"tell application "Terminal"
    activate
    repeat with w in windows
        repeat with t in tabs of w
            if tty of t is "{tty_path}" then
                set selected of t to true
                set index of w to 1
            end if
        end repeat
    end repeat
end tell"#
    );
    run_activation(
        "terminal_app",
        "osascript",
        &["-e", &script],
        SCRIPTABLE_TIMEOUT,
    )
    .await
}

async fn activate_by_pid(pid: &str) -> ActivationResult {
    if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_digit()) {
        return ActivationResult::fail("process", format!("invalid pid {pid:?}"));
    }
    // App-level raise only; no tab granularity at this level.
    let script = format!(
        r#"tell application "System Events"
    set frontmost of (first process whose unix id is {pid}) to true
end tell"#
    );
    run_activation("process", "osascript", &["-e", &script], SCRIPTABLE_TIMEOUT).await
}

/// Normalize a tty identifier to its `/dev/...` path.
fn normalize_tty(tty: &str) -> String {
    if tty.starts_with("/dev/") {
        tty.to_string()
    } else {
        format!("/dev/{}", tty.trim_start_matches('/'))
    }
}

async fn run_activation(
    method: &str,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> ActivationResult {
    debug!(method, program, "running terminal activation");
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) if output.status.success() => ActivationResult::ok(method),
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            ActivationResult::fail(method, stderr.trim().to_string())
        }
        Ok(Err(e)) => ActivationResult::fail(method, format!("failed to run {program}: {e}")),
        Err(_) => ActivationResult::fail(
            method,
            format!("{program} timed out after {}s", timeout.as_secs()),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
