//! Plan detection and within-session plan-reference deduplication.
//!
//! A plan can surface three ways: pasted into a user message behind a
//! trigger phrase (`embedded`), produced by a Plan-type subagent (`agent`),
//! or written to a plan-like file path (`write`).

use crate::manifest::{PlanReference, PlanSource};
use jacques_transcript::{EntryKind, ParsedEntry};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Minimum plan body length in characters.
pub const MIN_PLAN_LEN: usize = 100;

/// One raw detection before catalog registration and dedup.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDetection {
    pub source: PlanSource,
    pub title: String,
    pub content: String,
    pub message_index: usize,
    pub file_path: Option<String>,
    pub agent_id: Option<String>,
    /// Filled in once the plan cataloger has assigned an id.
    pub catalog_id: Option<String>,
}

// ─── Trigger and signal patterns ──────────────────────────────────

fn trigger_regexes() -> &'static Vec<Regex> {
    static TRIGGERS: OnceLock<Vec<Regex>> = OnceLock::new();
    TRIGGERS.get_or_init(|| {
        [
            r"(?i)implement the following plan",
            r"(?i)here is the plan",
            r"(?i)here's the plan",
            r"(?i)follow this plan",
            r"(?i)execute this plan",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn code_signal_regex() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| {
        // A file that *starts* like source code is not a plan document.
        Regex::new(
            r"\A\s*(import |export |const |let |var |function |class |def |fn |pub |use |package |#include|<\?php|//|/\*)",
        )
        .unwrap()
    })
}

const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "rs", "py", "go", "rb", "java", "kt", "swift", "c", "h", "cpp",
    "cc", "hpp", "cs", "php", "sh", "sql",
];

/// Markdown-plan criteria shared by all three sources: enough body and at
/// least one heading.
pub fn looks_like_plan(content: &str) -> bool {
    content.trim().len() >= MIN_PLAN_LEN && has_heading(content)
}

fn has_heading(content: &str) -> bool {
    content.lines().any(|l| l.trim_start().starts_with('#'))
}

fn has_list_or_paragraphs(content: &str) -> bool {
    let has_list = content.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || starts_with_ordinal(t)
    });
    if has_list {
        return true;
    }
    content.split("\n\n").filter(|p| !p.trim().is_empty()).count() >= 2
}

fn starts_with_ordinal(line: &str) -> bool {
    let mut chars = line.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(d), Some('.' | ')')) if d.is_ascii_digit()
    )
}

/// First markdown heading text, else the first non-empty line.
pub fn plan_title(content: &str) -> String {
    content
        .lines()
        .find(|l| l.trim_start().starts_with('#'))
        .map(|l| l.trim_start().trim_start_matches('#').trim().to_string())
        .or_else(|| {
            content
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        })
        .unwrap_or_else(|| "Untitled plan".to_string())
}

// ─── Detection ────────────────────────────────────────────────────

/// Detect `embedded` and `write` plans in a parsed main transcript. Agent
/// plans are detected separately while subagent transcripts are mined.
pub fn detect_plans(entries: &[ParsedEntry]) -> Vec<PlanDetection> {
    let mut detections = Vec::new();
    for entry in entries {
        match &entry.kind {
            EntryKind::UserMessage {
                text,
                is_meta: false,
                ..
            } => {
                if let Some(detection) = detect_embedded(text, entry.index) {
                    detections.push(detection);
                }
            }
            EntryKind::ToolCall { name, input, .. } => {
                if let Some(detection) = detect_write(name, input, entry.index) {
                    detections.push(detection);
                }
            }
            _ => {}
        }
    }
    detections
}

fn detect_embedded(text: &str, message_index: usize) -> Option<PlanDetection> {
    let m = trigger_regexes().iter().find_map(|re| re.find(text))?;
    let body = text[m.end()..].trim_start_matches([':', ' ', '\n']);
    if !looks_like_plan(body) {
        return None;
    }
    Some(PlanDetection {
        source: PlanSource::Embedded,
        title: plan_title(body),
        content: body.to_string(),
        message_index,
        file_path: None,
        agent_id: None,
        catalog_id: None,
    })
}

fn detect_write(tool_name: &str, input: &Value, message_index: usize) -> Option<PlanDetection> {
    if tool_name != "Write" {
        return None;
    }
    let path = input.get("file_path").and_then(Value::as_str)?;
    let content = input.get("content").and_then(Value::as_str)?;
    if !path_suggests_plan(path) {
        return None;
    }
    if has_code_extension(path) {
        return None;
    }
    if code_signal_regex().is_match(content) {
        return None;
    }
    if !looks_like_plan(content) || !has_list_or_paragraphs(content) {
        return None;
    }
    Some(PlanDetection {
        source: PlanSource::Write,
        title: plan_title(content),
        content: content.to_string(),
        message_index,
        file_path: Some(path.to_string()),
        agent_id: None,
        catalog_id: None,
    })
}

/// Validate a Plan-subagent's final message and build an `agent` detection.
pub fn detect_agent_plan(
    content: &str,
    agent_id: &str,
    message_index: usize,
) -> Option<PlanDetection> {
    if !looks_like_plan(content) {
        return None;
    }
    Some(PlanDetection {
        source: PlanSource::Agent,
        title: plan_title(content),
        content: content.to_string(),
        message_index,
        file_path: None,
        agent_id: Some(agent_id.to_string()),
        catalog_id: None,
    })
}

fn path_suggests_plan(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".plan.md")
        || lower.contains("/plans/")
        || lower.starts_with("plans/")
        || lower
            .rsplit('/')
            .next()
            .is_some_and(|name| name.contains("plan"))
}

fn has_code_extension(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    name.contains('.') && CODE_EXTENSIONS.contains(&ext.as_str())
}

// ─── Group dedup ──────────────────────────────────────────────────

/// Collapse a session's detections into one reference per plan group.
///
/// Detections are walked in message order. Every `embedded` detection opens
/// a new group; `agent` and `write` detections join the current group (a
/// leading run before any `embedded` forms its own group). Each group emits
/// one reference: representative by source priority `write > embedded >
/// agent`, `sources` merged, ids preserved from whichever member had them.
pub fn dedup_plan_references(mut detections: Vec<PlanDetection>) -> Vec<PlanReference> {
    detections.sort_by_key(|d| d.message_index);

    let mut groups: Vec<Vec<PlanDetection>> = Vec::new();
    for detection in detections {
        let start_new = detection.source == PlanSource::Embedded || groups.is_empty();
        if start_new {
            groups.push(vec![detection]);
        } else if let Some(current) = groups.last_mut() {
            current.push(detection);
        }
    }

    groups.into_iter().filter_map(group_to_reference).collect()
}

fn group_to_reference(group: Vec<PlanDetection>) -> Option<PlanReference> {
    let representative = group
        .iter()
        .max_by_key(|d| (d.source.priority(), std::cmp::Reverse(d.message_index)))?
        .clone();

    let mut sources: Vec<PlanSource> = group.iter().map(|d| d.source).collect();
    sources.sort();
    sources.dedup();

    Some(PlanReference {
        source: representative.source,
        sources,
        message_index: representative.message_index,
        file_path: group.iter().find_map(|d| d.file_path.clone()),
        agent_id: group.iter().find_map(|d| d.agent_id.clone()),
        catalog_id: group.iter().find_map(|d| d.catalog_id.clone()),
        title: Some(representative.title),
    })
}

// ─── Tests ────────────────────────────────────────────────────────
