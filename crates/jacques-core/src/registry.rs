//! Session registry.
//!
//! Owns every live [`Session`] record plus the single focused-id slot.
//! Pure synchronous state machine; the daemon serializes access behind one
//! mutex and turns the returned snapshots into broadcasts.
//!
//! Invariants maintained here:
//! - session ids are unique;
//! - focus is null only when the registry is empty, and never dangles;
//! - `last_activity` never decreases across a mutation;
//! - enumeration is strictly descending by `last_activity`;
//! - a partial session (`AUTO:`/`DISCOVERED:` key) is upgraded in place by
//!   the first concrete hook event, never duplicated.

use crate::events::{ActivityEvent, ContextUpdateEvent, SessionStartEvent};
use crate::terminal_key;
use crate::types::{
    DetectedSession, ModelInfo, Session, SessionSource, SessionStatus, fallback_title,
    project_from_cwd,
};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    focused: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn focused_session_id(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn focused_session(&self) -> Option<&Session> {
        self.focused.as_deref().and_then(|id| self.sessions.get(id))
    }

    /// All sessions, most recently active first. Ties break on session id so
    /// the order is deterministic.
    pub fn sessions(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.values().cloned().collect();
        all.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        all
    }

    // ─── Registration ─────────────────────────────────────────────

    /// Register a session from an explicit `session_start` event.
    ///
    /// Idempotent with respect to the id. An existing *partial* record
    /// (`AUTO:`/`DISCOVERED:` key) is upgraded in place: terminal identity
    /// and key are overwritten, empty fields are filled, `last_activity`
    /// advances. An existing concrete record only advances non-decreasing
    /// fields. A fresh id inserts a new record and takes focus.
    pub fn register_session(&mut self, event: &SessionStartEvent) -> Session {
        if let Some(existing) = self.sessions.get_mut(&event.session_id) {
            let partial = terminal_key::is_partial(&existing.terminal_key);
            if partial {
                existing.terminal = event.terminal.clone();
                existing.terminal_key = event
                    .terminal_key
                    .clone()
                    .unwrap_or_else(|| terminal_key::derive_terminal_key(&event.terminal));
                existing.source = event
                    .source
                    .as_deref()
                    .map(SessionSource::normalize)
                    .unwrap_or(SessionSource::ClaudeCode);
                existing.hook_source = existing
                    .hook_source
                    .take()
                    .or_else(|| hook_source_of(event));
            }
            fill_empty_fields(existing, event);
            existing.last_activity = existing.last_activity.max(event.timestamp);
            return existing.clone();
        }

        let session = session_from_start(event);
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        self.focused = Some(session.session_id.clone());
        session
    }

    /// Register a session recovered by the startup scanner. No-op when the
    /// id already exists (a hook got there first).
    pub fn register_discovered_session(&mut self, record: &DetectedSession) -> Option<Session> {
        if self.sessions.contains_key(&record.session_id) {
            return None;
        }
        let project = if record.project.is_empty() {
            project_from_cwd(&record.cwd)
        } else {
            record.project.clone()
        };
        let session = Session {
            session_id: record.session_id.clone(),
            source: SessionSource::ClaudeCode,
            status: SessionStatus::Active,
            title: record
                .title
                .clone()
                .unwrap_or_else(|| fallback_title(&project)),
            transcript_path: record.transcript_path.clone(),
            cwd: record.cwd.clone(),
            project,
            model: None,
            terminal: crate::types::TerminalIdentity {
                tty: record.tty.clone(),
                terminal_pid: record.pid,
                ..Default::default()
            },
            terminal_key: terminal_key::discovered_key(&discovered_inner(record)),
            last_activity: record.last_activity,
            registered_at: record.last_activity,
            context_metrics: record.context_metrics.clone(),
            autocompact: None,
            git: Default::default(),
            hook_source: None,
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        self.focused = Some(session.session_id.clone());
        Some(session)
    }

    // ─── Mutation ─────────────────────────────────────────────────

    /// Apply a tool-activity event. Unknown ids return `None`; the caller
    /// logs and drops.
    pub fn update_activity(&mut self, event: &ActivityEvent) -> Option<Session> {
        let session = self.sessions.get_mut(&event.session_id)?;
        session.status = SessionStatus::Working;
        session.last_activity = session.last_activity.max(event.timestamp);
        if let Some(title) = &event.session_title {
            if !title.is_empty() {
                session.title = title.clone();
            }
        }
        if let Some(metrics) = &event.context_metrics {
            session.context_metrics = Some(metrics.clone());
        }
        self.focused = Some(event.session_id.clone());
        self.sessions.get(&event.session_id).cloned()
    }

    /// Apply a context event, auto-registering the session when unknown.
    ///
    /// An auto-registered session gets a project-derived fallback title and
    /// an `AUTO:` terminal key; a later concrete `session_start` upgrades it
    /// in place. `terminal_key` from the event is applied only while the
    /// session is still partial, so an `AUTO:` re-send never regresses a
    /// concrete key.
    pub fn update_context(&mut self, event: &ContextUpdateEvent) -> Session {
        let session = self
            .sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| {
                let project = event.project().unwrap_or_default();
                Session {
                    session_id: event.session_id.clone(),
                    source: SessionSource::ClaudeCode,
                    status: SessionStatus::Active,
                    title: event
                        .session_title
                        .clone()
                        .unwrap_or_else(|| fallback_title(&project)),
                    transcript_path: event.transcript_path.clone().map(Into::into),
                    cwd: event.cwd.clone().unwrap_or_default(),
                    project,
                    model: None,
                    terminal: Default::default(),
                    terminal_key: terminal_key::auto_key(&event.session_id),
                    last_activity: event.timestamp,
                    registered_at: event.timestamp,
                    context_metrics: None,
                    autocompact: None,
                    git: Default::default(),
                    hook_source: None,
                }
            });
        session.context_metrics = Some(event.metrics());
        session.last_activity = session.last_activity.max(event.timestamp);
        if let Some(model) = &event.model {
            session.model = Some(ModelInfo {
                id: model.clone(),
                display_name: event
                    .model_display_name
                    .clone()
                    .unwrap_or_else(|| model.clone()),
            });
        }
        if let Some(cwd) = &event.cwd {
            session.cwd = cwd.clone();
        }
        if let Some(project) = event.project() {
            session.project = project;
        }
        if let Some(title) = &event.session_title {
            if !title.is_empty() {
                session.title = title.clone();
            }
        }
        if session.transcript_path.is_none() {
            session.transcript_path = event.transcript_path.clone().map(Into::into);
        }
        if let Some(autocompact) = &event.autocompact {
            session.autocompact = Some(autocompact.clone());
        }
        merge_git(session, &event.git_branch, &event.git_worktree, &event.git_repo_root);
        if terminal_key::is_partial(&session.terminal_key) {
            if let Some(key) = &event.terminal_key {
                session.terminal_key = key.clone();
            }
        }
        self.focused = Some(event.session_id.clone());
        session.clone()
    }

    /// Replace a session's context metrics without touching focus or
    /// recency. Used by transcript watchers folding in reparsed stats.
    pub fn set_context_metrics(
        &mut self,
        session_id: &str,
        metrics: crate::types::ContextMetrics,
    ) -> Option<Session> {
        let session = self.sessions.get_mut(session_id)?;
        session.context_metrics = Some(metrics);
        Some(session.clone())
    }

    /// Mark a session idle. Status only; focus and recency are untouched.
    pub fn set_session_idle(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.get_mut(session_id)?;
        session.status = SessionStatus::Idle;
        Some(session.clone())
    }

    /// Remove a session. When it held focus, focus shifts to the most
    /// recently active survivor, or null when none remain.
    pub fn unregister_session(&mut self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.remove(session_id)?;
        if self.focused.as_deref() == Some(session_id) {
            self.focused = self.most_recent_id();
        }
        Some(removed)
    }

    /// Point focus at an existing session. Returns false for unknown ids so
    /// focus can never dangle.
    pub fn set_focus(&mut self, session_id: &str) -> bool {
        if self.sessions.contains_key(session_id) {
            self.focused = Some(session_id.to_string());
            true
        } else {
            false
        }
    }

    // ─── Lookup ───────────────────────────────────────────────────

    /// Find a session by terminal key, honoring the iTerm UUID-suffix rule.
    pub fn find_by_terminal_key(&self, key: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| terminal_key::keys_match(&s.terminal_key, key))
    }

    // ─── Sweeping ─────────────────────────────────────────────────

    /// Unregister every idle session whose `last_activity` is older than
    /// `max_idle_ms` relative to `now_ms`. Returns the removed ids.
    pub fn sweep_stale(&mut self, max_idle_ms: i64, now_ms: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::Idle && now_ms - s.last_activity > max_idle_ms
            })
            .map(|s| s.session_id.clone())
            .collect();
        for id in &stale {
            self.unregister_session(id);
        }
        stale
    }

    fn most_recent_id(&self) -> Option<String> {
        self.sessions
            .values()
            .max_by(|a, b| {
                a.last_activity
                    .cmp(&b.last_activity)
                    .then_with(|| b.session_id.cmp(&a.session_id))
            })
            .map(|s| s.session_id.clone())
    }
}

// ─── Construction helpers ─────────────────────────────────────────

fn hook_source_of(event: &SessionStartEvent) -> Option<String> {
    event.hook_source.clone().or_else(|| {
        event
            .source
            .as_deref()
            .filter(|s| matches!(*s, "startup" | "resume" | "clear" | "compact"))
            .map(str::to_string)
    })
}

fn session_from_start(event: &SessionStartEvent) -> Session {
    let project = if event.project.is_empty() {
        project_from_cwd(&event.cwd)
    } else {
        event.project.clone()
    };
    Session {
        session_id: event.session_id.clone(),
        source: event
            .source
            .as_deref()
            .map(SessionSource::normalize)
            .unwrap_or(SessionSource::ClaudeCode),
        status: SessionStatus::Active,
        title: event
            .session_title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_title(&project)),
        transcript_path: event.transcript_path.clone().map(Into::into),
        cwd: event.cwd.clone(),
        project,
        model: None,
        terminal: event.terminal.clone(),
        terminal_key: event
            .terminal_key
            .clone()
            .unwrap_or_else(|| terminal_key::derive_terminal_key(&event.terminal)),
        last_activity: event.timestamp,
        registered_at: event.timestamp,
        context_metrics: None,
        autocompact: event.autocompact.clone(),
        git: crate::types::GitInfo {
            branch: event.git_branch.clone(),
            worktree: event.git_worktree.clone(),
            repo_root: event.git_repo_root.clone(),
        },
        hook_source: hook_source_of(event),
    }
}

fn fill_empty_fields(session: &mut Session, event: &SessionStartEvent) {
    if let Some(title) = &event.session_title {
        if session.title.is_empty() || session.title == fallback_title(&session.project) {
            if !title.is_empty() {
                session.title = title.clone();
            }
        }
    }
    if session.transcript_path.is_none() {
        session.transcript_path = event.transcript_path.clone().map(Into::into);
    }
    if session.cwd.is_empty() {
        session.cwd = event.cwd.clone();
    }
    if session.project.is_empty() {
        session.project = if event.project.is_empty() {
            project_from_cwd(&event.cwd)
        } else {
            event.project.clone()
        };
    }
    if session.autocompact.is_none() {
        session.autocompact = event.autocompact.clone();
    }
    merge_git(session, &event.git_branch, &event.git_worktree, &event.git_repo_root);
}

fn merge_git(
    session: &mut Session,
    branch: &Option<String>,
    worktree: &Option<String>,
    repo_root: &Option<String>,
) {
    if session.git.branch.is_none() {
        session.git.branch = branch.clone();
    }
    if session.git.worktree.is_none() {
        session.git.worktree = worktree.clone();
    }
    if session.git.repo_root.is_none() {
        session.git.repo_root = repo_root.clone();
    }
}

fn discovered_inner(record: &DetectedSession) -> String {
    if let Some(id) = &record.terminal_session_id {
        return format!("iTerm2:{id}");
    }
    if let Some(tty) = &record.tty {
        return match record.pid {
            Some(pid) => format!("TTY:{tty}:{pid}"),
            None => format!("TTY:{tty}"),
        };
    }
    if let Some(pid) = record.pid {
        return format!("PID:{pid}");
    }
    record.session_id.clone()
}

// ─── Tests ────────────────────────────────────────────────────────
