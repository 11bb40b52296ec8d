//! Line-by-line transcript decoding.

use crate::entry::{EntryKind, ParsedEntry, TokenUsage, WebSearchPhase};
use crate::schema::{ContentBlock, MessageRecord, ProgressRecord, RawRecord, SystemRecord};
use chrono::DateTime;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("failed to read transcript {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of decoding a whole transcript.
#[derive(Debug, Default, Clone)]
pub struct ParsedTranscript {
    pub entries: Vec<ParsedEntry>,
    /// Lines that failed to decode as JSON at all.
    pub skipped_lines: usize,
    /// Working directory recorded on the earliest message line, when any.
    pub project_cwd: Option<String>,
    /// True when the file is a sidechain (subagent) transcript: its first
    /// message line carries the sidechain marker.
    pub is_sidechain: bool,
}

/// Parse a transcript file. Fails only when the file itself is unreadable;
/// individual bad lines are skipped and counted.
pub fn parse_file(path: &Path) -> Result<ParsedTranscript, TranscriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| TranscriptError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    let parsed = parse_str(&text);
    if parsed.skipped_lines > 0 {
        warn!(
            path = %path.display(),
            skipped = parsed.skipped_lines,
            "transcript contained undecodable lines"
        );
    }
    Ok(parsed)
}

/// Parse transcript text. Deterministic: the same input yields the same
/// entry sequence.
pub fn parse_str(text: &str) -> ParsedTranscript {
    let mut out = ParsedTranscript::default();
    let mut seen_message = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => {
                if let RawRecord::User(rec) | RawRecord::Assistant(rec) = &record {
                    if out.project_cwd.is_none() {
                        out.project_cwd = rec.cwd.clone();
                    }
                    if !seen_message {
                        out.is_sidechain = rec.is_sidechain;
                        seen_message = true;
                    }
                }
                append_record(record, &mut out.entries);
            }
            Err(_) => out.skipped_lines += 1,
        }
    }
    out
}

fn append_record(record: RawRecord, entries: &mut Vec<ParsedEntry>) {
    match record {
        RawRecord::User(rec) => append_user(rec, entries),
        RawRecord::Assistant(rec) => append_assistant(rec, entries),
        RawRecord::System(rec) => append_system(rec, entries),
        RawRecord::Summary(rec) => push(entries, 0, EntryKind::Summary { summary: rec.summary }),
        RawRecord::Progress(rec) => append_progress(rec, entries),
        RawRecord::Unknown => {}
    }
}

fn append_user(rec: MessageRecord, entries: &mut Vec<ParsedEntry>) {
    let ts = parse_timestamp(rec.timestamp.as_deref());
    let agent_id = rec
        .tool_use_result
        .as_ref()
        .and_then(|v| v.get("agentId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let Some(message) = rec.message else {
        return;
    };

    let mut text = String::new();
    for block in &message.content {
        match block {
            ContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                push(
                    entries,
                    ts,
                    EntryKind::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        is_error: *is_error,
                        agent_id: agent_id.clone(),
                        text: content.as_ref().map(content_to_text),
                    },
                );
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        push(
            entries,
            ts,
            EntryKind::UserMessage {
                text,
                is_meta: rec.is_meta,
                is_sidechain: rec.is_sidechain,
            },
        );
    }
}

fn append_assistant(rec: MessageRecord, entries: &mut Vec<ParsedEntry>) {
    let ts = parse_timestamp(rec.timestamp.as_deref());
    let Some(message) = rec.message else {
        return;
    };
    let usage = message.usage.as_ref().map(|u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        cache_creation_tokens: u.cache_creation_input_tokens,
        cache_read_tokens: u.cache_read_input_tokens,
    });

    let mut text = String::new();
    for block in &message.content {
        match block {
            ContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            ContentBlock::Thinking { thinking } => {
                push(entries, ts, EntryKind::Thinking { text: thinking.clone() });
            }
            ContentBlock::ToolUse { id, name, input } => {
                push(
                    entries,
                    ts,
                    EntryKind::ToolCall {
                        name: name.clone(),
                        id: id.clone(),
                        input: input.clone(),
                    },
                );
            }
            ContentBlock::ServerToolUse { name, input, .. } if name == "web_search" => {
                let query = input
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                push(
                    entries,
                    ts,
                    EntryKind::WebSearch {
                        phase: WebSearchPhase::Query,
                        query,
                        urls: Vec::new(),
                    },
                );
            }
            ContentBlock::WebSearchToolResult { content, .. } => {
                let urls = result_urls(content);
                // The result carries no query of its own; tie it back to the
                // most recent query entry.
                let query = entries
                    .iter()
                    .rev()
                    .find_map(|e| match &e.kind {
                        EntryKind::WebSearch {
                            phase: WebSearchPhase::Query,
                            query,
                            ..
                        } => Some(query.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                push(
                    entries,
                    ts,
                    EntryKind::WebSearch {
                        phase: WebSearchPhase::Results,
                        query,
                        urls,
                    },
                );
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        push(
            entries,
            ts,
            EntryKind::AssistantMessage {
                text,
                model: message.model.clone(),
                usage,
            },
        );
    }
}

fn append_system(rec: SystemRecord, entries: &mut Vec<ParsedEntry>) {
    let ts = parse_timestamp(rec.timestamp.as_deref());
    let subtype = rec.subtype.unwrap_or_default();
    match subtype.as_str() {
        "turn_duration" => push(
            entries,
            ts,
            EntryKind::TurnDuration {
                duration_ms: rec.duration_ms.unwrap_or(0),
            },
        ),
        "hook_progress" => push(
            entries,
            ts,
            EntryKind::HookProgress {
                hook_name: rec.hook_name.unwrap_or_default(),
            },
        ),
        _ => push(
            entries,
            ts,
            EntryKind::SystemEvent {
                subtype,
                content: rec.content.unwrap_or_default(),
            },
        ),
    }
}

fn append_progress(rec: ProgressRecord, entries: &mut Vec<ParsedEntry>) {
    let ts = parse_timestamp(rec.timestamp.as_deref());
    match rec.subtype.as_deref() {
        Some("bash") => push(
            entries,
            ts,
            EntryKind::BashProgress {
                output: rec
                    .data
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        ),
        Some("mcp") => push(
            entries,
            ts,
            EntryKind::McpProgress {
                server: rec.server,
                status: rec.status,
            },
        ),
        // Agent progress is the default: that is what the assistant emits
        // for Task subagents, with or without an explicit subtype.
        _ => push(
            entries,
            ts,
            EntryKind::AgentProgress {
                agent_id: rec.agent_id,
                agent_type: rec.agent_type,
                status: rec.status,
            },
        ),
    }
}

fn push(entries: &mut Vec<ParsedEntry>, timestamp: i64, kind: EntryKind) {
    let index = entries.len();
    entries.push(ParsedEntry {
        index,
        timestamp,
        kind,
    });
}

fn parse_timestamp(raw: Option<&str>) -> i64 {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn result_urls(content: &Value) -> Vec<String> {
    match content {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
