//! On-disk catalog record types.
//!
//! The session manifest is the last artifact written by an extraction, so a
//! manifest on disk always refers to artifacts that exist.

use serde::{Deserialize, Serialize};

// ─── Plans ────────────────────────────────────────────────────────

/// Where a plan was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Embedded,
    Write,
    Agent,
}

impl PlanSource {
    /// Representative priority within a dedup group, highest first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Write => 2,
            Self::Embedded => 1,
            Self::Agent => 0,
        }
    }
}

/// A deduplicated plan reference on the session manifest.
///
/// This is the canonical (richer) schema: the representative `source` plus
/// the merged `sources` of the whole group, and whichever ids the group
/// members contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReference {
    pub source: PlanSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<PlanSource>,
    #[serde(rename = "messageIndex")]
    pub message_index: usize,
    #[serde(rename = "filePath", default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(rename = "agentId", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "catalogId", default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// ─── Manifest ─────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Planning,
    #[default]
    Executing,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Per-session summary, `sessions/<session_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: String,
    pub title: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub message_count: usize,
    pub tool_call_count: usize,
    pub user_question_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technologies: Vec<String>,
    pub tokens: TokenTotals,
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subagent_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<PlanReference>,
    /// Source transcript mtime (epoch ms); the incremental-skip gate.
    pub jsonl_modified_at: i64,
}

// ─── Artifact indexes ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentIndexEntry {
    pub agent_id: String,
    pub session_id: String,
    pub file: String,
    pub title: String,
    pub token_estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub query: String,
    pub session_id: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
}

/// Project-level index, `index.json`, describing every artifact in the
/// catalog folder.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectIndex {
    pub project_path: String,
    pub generated_at: i64,
    #[serde(default)]
    pub sessions: Vec<ProjectIndexSession>,
    #[serde(default)]
    pub subagents: Vec<SubagentIndexEntry>,
    #[serde(default)]
    pub searches: Vec<SearchIndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectIndexSession {
    pub session_id: String,
    pub title: String,
    pub file: String,
    pub jsonl_modified_at: i64,
}

// ─── Extraction report ────────────────────────────────────────────

/// Outcome of one session extraction, returned to HTTP callers.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    pub session_id: String,
    pub skipped: bool,
    pub extracted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub plans_extracted: usize,
    pub subagents_extracted: usize,
    pub searches_extracted: usize,
}

impl ExtractionReport {
    pub fn skipped(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            skipped: true,
            ..Default::default()
        }
    }

    pub fn failed(session_id: &str, error: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
