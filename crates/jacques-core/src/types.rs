use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ─── Source & Status ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionSource {
    #[default]
    ClaudeCode,
    Cursor,
    Unknown,
}

impl SessionSource {
    /// Normalize a raw ingress tag. Claude Code hooks leak the "source of
    /// session start" (`startup`/`resume`/`clear`/`compact`) into this field;
    /// those all collapse to [`SessionSource::ClaudeCode`]. The raw value is
    /// carried separately as `hook_source` on the session.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "claude_code" | "claude-code" | "claude" => Self::ClaudeCode,
            "startup" | "resume" | "clear" | "compact" => Self::ClaudeCode,
            "cursor" => Self::Cursor,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude_code",
            Self::Cursor => "cursor",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity status of a session.
///
/// `Working` means a tool-activity event arrived recently, `Idle` means the
/// assistant emitted a stop event, `Active` means registered but neither.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Working,
    Idle,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Working => "working",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Model & Context ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

/// Context-window metrics for a session.
///
/// `is_estimate` is false only when the numbers came from a ground-truth
/// source such as a pre-compaction hook.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextMetrics {
    pub used_percentage: f64,
    pub remaining_percentage: f64,
    pub window_size: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub is_estimate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompactStatus {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_threshold_percent: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
}

impl GitInfo {
    pub fn is_empty(&self) -> bool {
        self.branch.is_none() && self.worktree.is_none() && self.repo_root.is_none()
    }
}

// ─── Terminal identity ────────────────────────────────────────────

/// Capability bag of optional terminal identifiers captured from the
/// caller's environment. Different emulators populate different subsets.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterm_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitty_window_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wezterm_pane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
}

impl TerminalIdentity {
    pub fn is_empty(&self) -> bool {
        self.tty.is_none()
            && self.term_program.is_none()
            && self.terminal_pid.is_none()
            && self.iterm_session_id.is_none()
            && self.term_session_id.is_none()
            && self.kitty_window_id.is_none()
            && self.wezterm_pane.is_none()
            && self.window_id.is_none()
    }
}

// ─── Session ──────────────────────────────────────────────────────

/// The runtime state of a single AI-assistant conversation on this host.
///
/// Timestamps (`last_activity`, `registered_at`) are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub source: SessionSource,
    pub status: SessionStatus,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    pub cwd: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    #[serde(default)]
    pub terminal: TerminalIdentity,
    pub terminal_key: String,
    pub last_activity: i64,
    pub registered_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_metrics: Option<ContextMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocompact: Option<AutocompactStatus>,
    #[serde(default, skip_serializing_if = "GitInfo::is_empty")]
    pub git: GitInfo,
    /// Raw "source of session start" from the hook (`startup`/`resume`/...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_source: Option<String>,
}

/// Derive a short project name from a working directory: the last
/// non-empty path component.
pub fn project_from_cwd(cwd: &str) -> String {
    cwd.trim_end_matches('/')
        .rsplit('/')
        .find(|c| !c.is_empty())
        .unwrap_or(cwd)
        .to_string()
}

/// Project-derived fallback title, used until a better title is observed.
pub fn fallback_title(project: &str) -> String {
    if project.is_empty() {
        "Claude session".to_string()
    } else {
        format!("Claude session in {project}")
    }
}

// ─── Discovered sessions ──────────────────────────────────────────

/// A session recovered by the startup process scanner rather than reported
/// by a hook. Registered via `register_discovered_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSession {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    pub cwd: String,
    pub project: String,
    pub last_activity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_metrics: Option<ContextMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_normalization_collapses_start_tags() {
        for raw in ["startup", "resume", "clear", "compact", "claude_code"] {
            assert_eq!(
                SessionSource::normalize(raw),
                SessionSource::ClaudeCode,
                "raw tag {raw} should normalize to claude_code"
            );
        }
        assert_eq!(SessionSource::normalize("cursor"), SessionSource::Cursor);
        assert_eq!(
            SessionSource::normalize("some-new-editor"),
            SessionSource::Unknown
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Working).unwrap(),
            "\"working\""
        );
        let back: SessionStatus = serde_json::from_str("\"idle\"").unwrap();
        assert_eq!(back, SessionStatus::Idle);
    }

    #[test]
    fn project_from_cwd_takes_last_component() {
        assert_eq!(project_from_cwd("/u/x/proj"), "proj");
        assert_eq!(project_from_cwd("/u/x/proj/"), "proj");
        assert_eq!(project_from_cwd("proj"), "proj");
        assert_eq!(project_from_cwd("/"), "/");
    }

    #[test]
    fn session_serde_roundtrip() {
        let session = Session {
            session_id: "sess-1".into(),
            source: SessionSource::ClaudeCode,
            status: SessionStatus::Active,
            title: "Fix the parser".into(),
            transcript_path: Some(PathBuf::from("/home/u/.claude/projects/p/s.jsonl")),
            cwd: "/home/u/proj".into(),
            project: "proj".into(),
            model: Some(ModelInfo {
                id: "claude-opus-4".into(),
                display_name: "Opus".into(),
            }),
            terminal: TerminalIdentity {
                tty: Some("/dev/ttys001".into()),
                ..Default::default()
            },
            terminal_key: "TTY:/dev/ttys001".into(),
            last_activity: 1_700_000_000_000,
            registered_at: 1_700_000_000_000,
            context_metrics: Some(ContextMetrics {
                used_percentage: 42.0,
                remaining_percentage: 58.0,
                window_size: 200_000,
                total_input_tokens: 84_000,
                total_output_tokens: 9_000,
                is_estimate: true,
            }),
            autocompact: None,
            git: GitInfo {
                branch: Some("main".into()),
                ..Default::default()
            },
            hook_source: Some("startup".into()),
        };
        let json = serde_json::to_string(&session).expect("serialize");
        let back: Session = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(session, back);
    }

    #[test]
    fn empty_git_info_is_omitted() {
        let session = Session {
            session_id: "s".into(),
            source: SessionSource::ClaudeCode,
            status: SessionStatus::Active,
            title: "t".into(),
            transcript_path: None,
            cwd: "/tmp".into(),
            project: "tmp".into(),
            model: None,
            terminal: TerminalIdentity::default(),
            terminal_key: "AUTO:s".into(),
            last_activity: 0,
            registered_at: 0,
            context_metrics: None,
            autocompact: None,
            git: GitInfo::default(),
            hook_source: None,
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("\"git\""));
        assert!(!json.contains("\"model\""));
    }
}
