//! Subagent artifact extraction.
//!
//! A session references subagents through agent-progress entries and
//! tool-result metadata. Each user-visible subagent has its own transcript
//! (`<transcript_dir>/<agent_id>.jsonl`); when its final assistant message
//! has substance, it becomes a markdown artifact in the catalog.

use crate::error::CatalogError;
use crate::manifest::SubagentIndexEntry;
use crate::paths::atomic_write;
use crate::slug::slugify;
use chrono::{TimeZone, Utc};
use jacques_transcript::{EntryKind, ParsedEntry, TranscriptStats, parse_file};
use std::path::Path;
use tracing::debug;

/// Agent-id prefixes of internal helpers that never become artifacts.
const INTERNAL_AGENT_PREFIXES: &[&str] = &["aprompt_suggestion-", "acompact-"];

/// A subagent reference found in the main transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRef {
    pub agent_id: String,
    pub agent_type: Option<String>,
    /// Entry index of the first reference, for plan grouping.
    pub message_index: usize,
}

/// Collect user-visible subagent references in order of first appearance.
pub fn collect_agent_refs(entries: &[ParsedEntry]) -> Vec<AgentRef> {
    let mut refs: Vec<AgentRef> = Vec::new();
    for entry in entries {
        let (agent_id, agent_type) = match &entry.kind {
            EntryKind::AgentProgress {
                agent_id: Some(id),
                agent_type,
                ..
            } => (id.clone(), agent_type.clone()),
            EntryKind::ToolResult {
                agent_id: Some(id), ..
            } => (id.clone(), None),
            _ => continue,
        };
        if is_internal_agent(&agent_id) {
            continue;
        }
        match refs.iter_mut().find(|r| r.agent_id == agent_id) {
            Some(existing) => {
                if existing.agent_type.is_none() {
                    existing.agent_type = agent_type;
                }
            }
            None => refs.push(AgentRef {
                agent_id,
                agent_type,
                message_index: entry.index,
            }),
        }
    }
    refs
}

pub fn is_internal_agent(agent_id: &str) -> bool {
    INTERNAL_AGENT_PREFIXES
        .iter()
        .any(|prefix| agent_id.starts_with(prefix))
}

/// Outcome of mining one subagent transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct SubagentArtifact {
    pub index_entry: SubagentIndexEntry,
    /// Final assistant text, for Plan-type agents to run plan detection on.
    pub final_text: String,
}

/// Parse a subagent transcript and, when its final assistant message is
/// non-empty, write `subagents/explore_<agent_id>_<slug>.md`.
///
/// Returns `Ok(None)` when the transcript is missing or produced nothing
/// worth keeping; those cases are expected, not errors.
pub fn extract_subagent(
    transcript_dir: &Path,
    agent_ref: &AgentRef,
    session_id: &str,
    out_dir: &Path,
) -> Result<Option<SubagentArtifact>, CatalogError> {
    let transcript = transcript_dir.join(format!("{}.jsonl", agent_ref.agent_id));
    if !transcript.exists() {
        debug!(agent_id = %agent_ref.agent_id, "no transcript for referenced subagent");
        return Ok(None);
    }
    let parsed = match parse_file(&transcript) {
        Ok(p) => p,
        Err(e) => {
            debug!(agent_id = %agent_ref.agent_id, error = %e, "unreadable subagent transcript");
            return Ok(None);
        }
    };

    let Some(final_text) = last_assistant_text(&parsed.entries) else {
        return Ok(None);
    };
    let stats = TranscriptStats::from_entries(&parsed.entries);
    let description = parsed
        .entries
        .iter()
        .find_map(ParsedEntry::user_question)
        .unwrap_or("Subagent task")
        .to_string();
    let title = first_line(&description);

    let date = stats
        .last_timestamp
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d")
        .to_string();
    let token_estimate = stats.total_input_tokens() + stats.total_output_tokens();

    let file_name = format!("explore_{}_{}.md", agent_ref.agent_id, slugify(&title));
    let body = format!(
        "# {title}\n\n- Session: {session_id}\n- Date: {date}\n- Estimated tokens: {token_estimate}\n\n---\n\n{final_text}\n"
    );
    let path = out_dir.join(&file_name);
    atomic_write(&path, body.as_bytes()).map_err(|source| CatalogError::Write {
        path: path.display().to_string(),
        source,
    })?;

    Ok(Some(SubagentArtifact {
        index_entry: SubagentIndexEntry {
            agent_id: agent_ref.agent_id.clone(),
            session_id: session_id.to_string(),
            file: file_name,
            title,
            token_estimate,
        },
        final_text,
    }))
}

/// Last assistant message with non-empty text.
fn last_assistant_text(entries: &[ParsedEntry]) -> Option<String> {
    entries
        .iter()
        .rev()
        .find_map(|e| e.assistant_text().map(str::to_string))
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("Subagent task")
        .trim()
        .to_string()
}

// ─── Tests ────────────────────────────────────────────────────────
