//! Startup process scanner.
//!
//! One synchronous pass over the process table, run right after the
//! transports start listening, to pick up assistant processes that were
//! already running before the daemon. Every recovery step is best-effort:
//! failures are logged and swallowed, a partial `DetectedSession` is still
//! worth registering.

use jacques_catalog::paths::dash_encode;
use jacques_core::types::DetectedSession;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Command-line patterns that identify assistant processes.
const ASSISTANT_PATTERNS: &[&str] = &["claude"];

pub struct ProcessScanner {
    proc_root: PathBuf,
    /// `~/.claude/projects`, parameterized for tests.
    projects_root: Option<PathBuf>,
}

impl ProcessScanner {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            projects_root: jacques_catalog::paths::claude_projects_root(),
        }
    }

    #[cfg(test)]
    fn with_roots(proc_root: PathBuf, projects_root: Option<PathBuf>) -> Self {
        Self {
            proc_root,
            projects_root,
        }
    }

    /// Scan the process table for already-running assistant sessions.
    pub fn scan(&self) -> Vec<DetectedSession> {
        let Ok(entries) = std::fs::read_dir(&self.proc_root) else {
            warn!(root = %self.proc_root.display(), "process table is unreadable");
            return Vec::new();
        };

        let mut detected = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Some(session) = self.inspect_process(pid) {
                debug!(pid, session_id = %session.session_id, "recovered running session");
                detected.push(session);
            }
        }
        detected
    }

    fn inspect_process(&self, pid: u32) -> Option<DetectedSession> {
        let proc_dir = self.proc_root.join(pid.to_string());
        let cmdline = std::fs::read(proc_dir.join("cmdline")).ok()?;
        if !cmdline_matches(&cmdline) {
            return None;
        }

        let cwd = std::fs::read_link(proc_dir.join("cwd"))
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let project = jacques_core::types::project_from_cwd(&cwd);
        let environ = std::fs::read(proc_dir.join("environ")).unwrap_or_default();
        let terminal_session_id = env_value(&environ, "ITERM_SESSION_ID")
            .or_else(|| env_value(&environ, "TERM_SESSION_ID"));
        let tty = std::fs::read_link(proc_dir.join("fd").join("0"))
            .ok()
            .map(|p| p.display().to_string())
            .filter(|p| p.starts_with("/dev/"));

        let transcript = self
            .transcript_from_fds(&proc_dir)
            .or_else(|| self.newest_transcript_for_cwd(&cwd));
        let (session_id, last_activity) = match &transcript {
            Some(path) => (
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("pid-{pid}")),
                jacques_catalog::paths::mtime_ms(path).unwrap_or(0),
            ),
            None => {
                debug!(pid, "assistant process without a recoverable transcript");
                (format!("pid-{pid}"), chrono::Utc::now().timestamp_millis())
            }
        };

        Some(DetectedSession {
            session_id,
            transcript_path: transcript,
            cwd,
            project,
            last_activity,
            context_metrics: None,
            terminal_session_id,
            tty,
            pid: Some(pid),
            title: None,
        })
    }

    /// JSONL transcript among the process's open file descriptors.
    fn transcript_from_fds(&self, proc_dir: &Path) -> Option<PathBuf> {
        let fds = std::fs::read_dir(proc_dir.join("fd")).ok()?;
        for fd in fds.filter_map(Result::ok) {
            let Ok(target) = std::fs::read_link(fd.path()) else {
                continue;
            };
            let text = target.display().to_string();
            if text.ends_with(".jsonl") && text.contains(".claude/projects") {
                return Some(target);
            }
        }
        None
    }

    /// Newest transcript in the project's transcript directory, as a
    /// fallback when no fd gives it away.
    fn newest_transcript_for_cwd(&self, cwd: &str) -> Option<PathBuf> {
        if cwd.is_empty() {
            return None;
        }
        let dir = self.projects_root.as_ref()?.join(dash_encode(cwd));
        let entries = std::fs::read_dir(dir).ok()?;
        entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "jsonl"))
            .max_by_key(|p| jacques_catalog::paths::mtime_ms(p).unwrap_or(0))
    }
}

impl Default for ProcessScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Match the null-separated cmdline against the assistant patterns: the
/// basename of argv[0] (or of a script run by node/bun) must name the
/// assistant binary.
fn cmdline_matches(cmdline: &[u8]) -> bool {
    let args: Vec<&str> = cmdline
        .split(|b| *b == 0)
        .filter_map(|part| std::str::from_utf8(part).ok())
        .filter(|s| !s.is_empty())
        .collect();
    let Some(first) = args.first() else {
        return false;
    };
    if ASSISTANT_PATTERNS.contains(&basename(first)) {
        return true;
    }
    // Script runtimes: the assistant binary is argv[1].
    if matches!(basename(first), "node" | "bun") {
        if let Some(second) = args.get(1) {
            return ASSISTANT_PATTERNS.contains(&basename(second));
        }
    }
    false
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn env_value(environ: &[u8], key: &str) -> Option<String> {
    environ
        .split(|b| *b == 0)
        .filter_map(|part| std::str::from_utf8(part).ok())
        .find_map(|entry| entry.strip_prefix(&format!("{key}=")))
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn cmdline_matching() {
        assert!(cmdline_matches(b"claude\0--continue\0"));
        assert!(cmdline_matches(b"/usr/local/bin/claude\0"));
        assert!(cmdline_matches(b"node\0/home/u/.local/bin/claude\0"));
        assert!(!cmdline_matches(b"vim\0notes-about-claude.md\0"));
        assert!(!cmdline_matches(b"claudette\0"));
        assert!(!cmdline_matches(b""));
    }

    #[test]
    fn environ_parsing() {
        let environ = b"HOME=/home/u\0ITERM_SESSION_ID=w0t0p0:ABCD\0TERM=xterm\0";
        assert_eq!(
            env_value(environ, "ITERM_SESSION_ID").as_deref(),
            Some("w0t0p0:ABCD")
        );
        assert_eq!(env_value(environ, "KITTY_WINDOW_ID"), None);
    }

    #[test]
    fn scan_recovers_session_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let projects_root = dir.path().join("projects");
        let transcripts = projects_root.join(dash_encode("/home/u/proj"));
        fs::create_dir_all(&transcripts).unwrap();
        fs::write(transcripts.join("sess-42.jsonl"), "{}\n").unwrap();

        let pid_dir = proc_root.join("1234");
        fs::create_dir_all(pid_dir.join("fd")).unwrap();
        fs::write(pid_dir.join("cmdline"), b"claude\0").unwrap();
        fs::write(
            pid_dir.join("environ"),
            b"ITERM_SESSION_ID=w0t0p0:XYZ\0",
        )
        .unwrap();
        // A cwd symlink pointing at the project directory.
        let project_dir = dir.path().join("home-proj");
        fs::create_dir_all(&project_dir).unwrap();
        std::os::unix::fs::symlink("/home/u/proj", pid_dir.join("cwd")).unwrap();

        let scanner = ProcessScanner::with_roots(proc_root, Some(projects_root));
        let detected = scanner.scan();
        assert_eq!(detected.len(), 1);
        let session = &detected[0];
        assert_eq!(session.session_id, "sess-42");
        assert_eq!(session.cwd, "/home/u/proj");
        assert_eq!(session.project, "proj");
        assert_eq!(session.pid, Some(1234));
        assert_eq!(
            session.terminal_session_id.as_deref(),
            Some("w0t0p0:XYZ")
        );
        assert!(session.transcript_path.is_some());
    }

    #[test]
    fn non_matching_processes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let pid_dir = proc_root.join("77");
        fs::create_dir_all(&pid_dir).unwrap();
        fs::write(pid_dir.join("cmdline"), b"bash\0").unwrap();

        let scanner = ProcessScanner::with_roots(proc_root, None);
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn unreadable_proc_root_yields_empty() {
        let scanner = ProcessScanner::with_roots(PathBuf::from("/nonexistent-proc"), None);
        assert!(scanner.scan().is_empty());
    }
}
