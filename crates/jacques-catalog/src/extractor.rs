//! Catalog extraction.
//!
//! Pull-driven: a client asks for a session, a project, or everything, and
//! reads the resulting artifacts. Extraction is incremental — a transcript
//! whose mtime matches the stored manifest is skipped unless forced — and
//! the manifest is always written last, so it never references artifacts
//! that failed to materialize.

use crate::error::CatalogError;
use crate::manifest::{
    ExtractionReport, ProjectIndex, ProjectIndexSession, SessionManifest, SessionMode, TokenTotals,
};
use crate::paths::{
    atomic_write, dash_encode, mtime_ms, plan_index_path, plans_dir, project_index_path,
    sessions_dir, subagents_dir,
};
use crate::plan_catalog::PlanCatalog;
use crate::plans::{self, PlanDetection};
use crate::session_index::{GlobalSessionIndex, SessionIndexEntry};
use crate::subagents::{self, AgentRef};
use crate::technologies::detect_technologies;
use crate::web_search;
use chrono::Utc;
use jacques_transcript::{EntryKind, ParsedEntry, TranscriptStats, parse_file};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Entries this early in the transcript count as the "early window" for
/// mode classification.
const EARLY_WINDOW: usize = 10;

/// Tools whose calls modify files.
const FILE_WRITING_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

// ─── Single session ───────────────────────────────────────────────

/// Extract the catalog artifacts for one transcript into
/// `<project_dir>/.jacques/`.
pub fn extract_session_catalog(
    transcript_path: &Path,
    project_dir: &Path,
    force: bool,
) -> ExtractionReport {
    let session_id = transcript_stem(transcript_path);

    let mtime = match mtime_ms(transcript_path) {
        Ok(mtime) => mtime,
        Err(e) => return ExtractionReport::failed(&session_id, e.to_string()),
    };

    // Incremental-skip gate.
    let manifest_path = sessions_dir(project_dir).join(format!("{session_id}.json"));
    if !force {
        if let Some(existing) = read_manifest(&manifest_path) {
            if existing.jsonl_modified_at == mtime {
                debug!(session_id = %session_id, "transcript unchanged, skipping extraction");
                return ExtractionReport::skipped(&session_id);
            }
        }
    }

    let parsed = match parse_file(transcript_path) {
        Ok(parsed) => parsed,
        Err(e) => return ExtractionReport::failed(&session_id, e.to_string()),
    };
    if parsed.entries.is_empty() {
        return ExtractionReport::skipped(&session_id);
    }

    match extract_parsed(
        transcript_path,
        project_dir,
        &session_id,
        &parsed.entries,
        mtime,
    ) {
        Ok(report) => report,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "catalog extraction failed");
            ExtractionReport::failed(&session_id, e.to_string())
        }
    }
}

fn extract_parsed(
    transcript_path: &Path,
    project_dir: &Path,
    session_id: &str,
    entries: &[ParsedEntry],
    mtime: i64,
) -> Result<ExtractionReport, CatalogError> {
    let stats = TranscriptStats::from_entries(entries);
    let transcript_dir = transcript_path.parent().unwrap_or(Path::new("."));

    // Subagent artifacts, plus agent-sourced plan detections.
    let agent_refs = subagents::collect_agent_refs(entries);
    let mut subagent_ids = Vec::new();
    let mut subagent_entries = Vec::new();
    let mut detections: Vec<PlanDetection> = plans::detect_plans(entries);
    for agent_ref in &agent_refs {
        let out_dir = subagents_dir(project_dir);
        if let Some(artifact) =
            subagents::extract_subagent(transcript_dir, agent_ref, session_id, &out_dir)?
        {
            subagent_ids.push(agent_ref.agent_id.clone());
            if agent_ref.agent_type.as_deref() == Some("Plan") {
                if let Some(detection) = plans::detect_agent_plan(
                    &artifact.final_text,
                    &agent_ref.agent_id,
                    agent_ref.message_index,
                ) {
                    detections.push(detection);
                }
            }
            subagent_entries.push(artifact.index_entry);
        }
    }

    // Register every detection with the plan cataloger.
    let plan_catalog = PlanCatalog::new(plans_dir(project_dir), plan_index_path(project_dir));
    let mut plan_ids = Vec::new();
    for detection in &mut detections {
        let id = plan_catalog.catalog_plan(&detection.title, &detection.content, session_id)?;
        if !plan_ids.contains(&id) {
            plan_ids.push(id.clone());
        }
        detection.catalog_id = Some(id);
    }
    let plans_extracted = detections.len();
    let mode = classify_mode(&detections, entries);
    let title = session_title(&detections, entries, session_id);
    let plan_refs = plans::dedup_plan_references(detections);

    // Web-search artifacts.
    let search_entries =
        web_search::extract_searches(entries, session_id, &subagents_dir(project_dir))?;
    let searches_extracted = search_entries.len();

    let files_modified = collect_files_modified(entries);
    let tools_used = collect_tools_used(entries);
    let technologies = {
        let files: Vec<&str> = files_modified.iter().map(String::as_str).collect();
        let texts: Vec<&str> = entries
            .iter()
            .filter_map(|e| match &e.kind {
                EntryKind::UserMessage { text, .. } => Some(text.as_str()),
                EntryKind::AssistantMessage { text, .. } => Some(text.as_str()),
                EntryKind::BashProgress { output } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        detect_technologies(files.iter().copied(), texts.iter().copied())
    };

    let manifest = SessionManifest {
        session_id: session_id.to_string(),
        title,
        project: crate::project_name(project_dir),
        started_at: stats.first_timestamp,
        ended_at: stats.last_timestamp,
        message_count: stats.user_messages + stats.assistant_messages,
        tool_call_count: stats.tool_calls,
        user_question_count: entries.iter().filter_map(ParsedEntry::user_question).count(),
        files_modified,
        tools_used,
        technologies,
        tokens: TokenTotals {
            total_input_tokens: stats.total_input_tokens(),
            total_output_tokens: stats.total_output_tokens(),
            cache_creation_tokens: stats.cache_creation_tokens,
            cache_read_tokens: stats.cache_read_tokens,
        },
        mode,
        plan_ids,
        subagent_ids,
        plans: plan_refs,
        jsonl_modified_at: mtime,
    };

    // The manifest commits the extraction; write it, then the index.
    let manifest_path = sessions_dir(project_dir).join(format!("{session_id}.json"));
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| CatalogError::Corrupt {
        path: manifest_path.display().to_string(),
        message: e.to_string(),
    })?;
    atomic_write(&manifest_path, &json).map_err(|source| CatalogError::Write {
        path: manifest_path.display().to_string(),
        source,
    })?;

    update_project_index(project_dir, &manifest, subagent_entries, search_entries)?;

    Ok(ExtractionReport {
        session_id: session_id.to_string(),
        skipped: false,
        extracted: true,
        error: None,
        plans_extracted,
        subagents_extracted: manifest.subagent_ids.len(),
        searches_extracted,
    })
}

// ─── Manifest helpers ─────────────────────────────────────────────

fn transcript_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_manifest(path: &Path) -> Option<SessionManifest> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn session_title(
    detections: &[PlanDetection],
    entries: &[ParsedEntry],
    session_id: &str,
) -> String {
    if let Some(detection) = detections.first() {
        return detection.title.clone();
    }
    if let Some(question) = entries.iter().find_map(ParsedEntry::user_question) {
        return truncate_title(question);
    }
    format!("Session {session_id}")
}

fn truncate_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or(text).trim();
    let mut title: String = line.chars().take(60).collect();
    if line.chars().count() > 60 {
        title.push('…');
    }
    title
}

/// `planning` when plan signals dominate the early window.
fn classify_mode(detections: &[PlanDetection], entries: &[ParsedEntry]) -> SessionMode {
    if detections.iter().any(|d| d.message_index < EARLY_WINDOW) {
        return SessionMode::Planning;
    }
    let early_plan_talk = entries
        .iter()
        .take(EARLY_WINDOW)
        .filter_map(ParsedEntry::user_question)
        .any(|q| q.to_ascii_lowercase().contains("plan"));
    if early_plan_talk {
        SessionMode::Planning
    } else {
        SessionMode::Executing
    }
}

fn collect_files_modified(entries: &[ParsedEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for entry in entries {
        let EntryKind::ToolCall { name, input, .. } = &entry.kind else {
            continue;
        };
        if !FILE_WRITING_TOOLS.contains(&name.as_str()) {
            continue;
        }
        let path = input
            .get("file_path")
            .or_else(|| input.get("notebook_path"))
            .and_then(serde_json::Value::as_str);
        if let Some(path) = path {
            if seen.insert(path.to_string()) {
                files.push(path.to_string());
            }
        }
    }
    files
}

fn collect_tools_used(entries: &[ParsedEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tools = Vec::new();
    for entry in entries {
        if let EntryKind::ToolCall { name, .. } = &entry.kind {
            if seen.insert(name.clone()) {
                tools.push(name.clone());
            }
        }
    }
    tools
}

// ─── Project index ────────────────────────────────────────────────

pub fn read_project_index(project_dir: &Path) -> Option<ProjectIndex> {
    let text = std::fs::read_to_string(project_index_path(project_dir)).ok()?;
    serde_json::from_str(&text).ok()
}

fn update_project_index(
    project_dir: &Path,
    manifest: &SessionManifest,
    subagents: Vec<crate::manifest::SubagentIndexEntry>,
    searches: Vec<crate::manifest::SearchIndexEntry>,
) -> Result<(), CatalogError> {
    let mut index = read_project_index(project_dir).unwrap_or_default();
    index.project_path = project_dir.display().to_string();
    index.generated_at = Utc::now().timestamp_millis();

    index.sessions.retain(|s| s.session_id != manifest.session_id);
    index.sessions.push(ProjectIndexSession {
        session_id: manifest.session_id.clone(),
        title: manifest.title.clone(),
        file: format!("sessions/{}.json", manifest.session_id),
        jsonl_modified_at: manifest.jsonl_modified_at,
    });
    index.sessions.sort_by(|a, b| {
        b.jsonl_modified_at
            .cmp(&a.jsonl_modified_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    index
        .subagents
        .retain(|s| s.session_id != manifest.session_id);
    index.subagents.extend(subagents);
    index
        .searches
        .retain(|s| s.session_id != manifest.session_id);
    index.searches.extend(searches);

    let path = project_index_path(project_dir);
    let json = serde_json::to_vec_pretty(&index).map_err(|e| CatalogError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    atomic_write(&path, &json).map_err(|source| CatalogError::Write {
        path: path.display().to_string(),
        source,
    })
}

// ─── Bulk extraction ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub extracted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BulkSummary {
    fn absorb(&mut self, report: &ExtractionReport) {
        if report.error.is_some() {
            self.errors += 1;
        } else if report.skipped {
            self.skipped += 1;
        } else {
            self.extracted += 1;
        }
    }
}

/// Extract every transcript of one project. `projects_root` is the
/// assistant's transcript tree (normally `~/.claude/projects`); progress is
/// reported per session.
pub fn extract_project_catalog(
    project_dir: &Path,
    projects_root: &Path,
    force: bool,
    on_report: &mut dyn FnMut(&ExtractionReport),
) -> BulkSummary {
    let transcripts_dir = projects_root.join(dash_encode(&project_dir.display().to_string()));
    let mut summary = BulkSummary::default();
    let index_path = GlobalSessionIndex::default_path().ok();
    let mut index = GlobalSessionIndex::default();
    if let Some(path) = index_path.as_deref() {
        if let Ok(existing) = GlobalSessionIndex::load(path) {
            index = existing;
        }
    }

    for transcript in project_transcripts(&transcripts_dir) {
        summary.absorb(&extract_one(
            &transcript,
            project_dir,
            force,
            &mut index,
            on_report,
        ));
    }

    if let Some(path) = index_path {
        if let Err(e) = index.store(&path) {
            warn!(error = %e, "failed to update the global session index");
        }
    }
    summary
}

/// Extract every project found under the transcript tree. Project paths are
/// recovered from the transcripts themselves (their recorded cwd).
pub fn extract_all_catalogs(
    projects_root: &Path,
    force: bool,
    on_report: &mut dyn FnMut(&ExtractionReport),
) -> BulkSummary {
    let mut summary = BulkSummary::default();
    let Ok(dir) = std::fs::read_dir(projects_root) else {
        warn!(root = %projects_root.display(), "transcript tree is unreadable");
        return summary;
    };
    let mut index = GlobalSessionIndex::default();
    let index_path = GlobalSessionIndex::default_path().ok();
    if let Some(path) = index_path.as_deref() {
        if let Ok(existing) = GlobalSessionIndex::load(path) {
            index = existing;
        }
    }

    for entry in dir.filter_map(Result::ok) {
        let project_transcript_dir = entry.path();
        if !project_transcript_dir.is_dir() {
            continue;
        }
        let Some(project_dir) = sniff_project_dir(&project_transcript_dir) else {
            debug!(
                dir = %project_transcript_dir.display(),
                "could not recover a project path, skipping"
            );
            continue;
        };
        for transcript in project_transcripts(&project_transcript_dir) {
            summary.absorb(&extract_one(
                &transcript,
                &project_dir,
                force,
                &mut index,
                on_report,
            ));
        }
    }

    if let Some(path) = index_path {
        if let Err(e) = index.store(&path) {
            warn!(error = %e, "failed to update the global session index");
        }
    }
    summary
}

fn extract_one(
    transcript: &Path,
    project_dir: &Path,
    force: bool,
    index: &mut GlobalSessionIndex,
    on_report: &mut dyn FnMut(&ExtractionReport),
) -> ExtractionReport {
    let report = extract_session_catalog(transcript, project_dir, force);
    if report.error.is_none() {
        index.record(SessionIndexEntry {
            session_id: report.session_id.clone(),
            transcript_path: transcript.display().to_string(),
            project_path: project_dir.display().to_string(),
            modified_at: mtime_ms(transcript).unwrap_or(0),
        });
    }
    on_report(&report);
    report
}

/// Main (non-sidechain) transcripts in a project transcript directory,
/// sorted for deterministic processing order.
fn project_transcripts(transcripts_dir: &Path) -> Vec<PathBuf> {
    let pattern = transcripts_dir.join("*.jsonl").display().to_string();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map(|entries| entries.filter_map(Result::ok).collect())
        .unwrap_or_default();
    paths.sort();
    paths.retain(|path| match parse_file(path) {
        Ok(parsed) => !parsed.is_sidechain,
        Err(_) => true, // surface the read error through extraction instead
    });
    paths
}

/// Recover the project directory from the first transcript that recorded a
/// working directory.
fn sniff_project_dir(transcripts_dir: &Path) -> Option<PathBuf> {
    for transcript in project_transcripts(transcripts_dir) {
        if let Ok(parsed) = parse_file(&transcript) {
            if let Some(cwd) = parsed.project_cwd {
                return Some(PathBuf::from(cwd));
            }
        }
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_transcript(dir: &Path, session_id: &str, cwd: &str) -> PathBuf {
        let path = dir.join(format!("{session_id}.jsonl"));
        let content = format!(
            r#"{{"type":"user","timestamp":"2026-03-01T10:00:00Z","cwd":"{cwd}","message":{{"role":"user","content":"Implement the following plan:\n\n# Design\n\nRework the parser for better error messages and recovery.\n\n- split the lexer\n- add recovery points\n- extend the tests"}}}}
{{"type":"assistant","timestamp":"2026-03-01T10:00:10Z","message":{{"role":"assistant","model":"claude-opus-4","content":[{{"type":"tool_use","id":"tu_1","name":"Write","input":{{"file_path":"src/parser.rs","content":"fn parse() {{}}"}}}},{{"type":"text","text":"Starting on the lexer split."}}],"usage":{{"input_tokens":900,"output_tokens":80,"cache_read_input_tokens":100}}}}}}
{{"type":"system","timestamp":"2026-03-01T10:00:20Z","subtype":"turn_duration","durationMs":9000}}
"#
        );
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn extraction_writes_manifest_plan_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("proj");
        let transcripts = dir.path().join("transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        let transcript = write_transcript(&transcripts, "sess-1", "/u/proj");

        let report = extract_session_catalog(&transcript, &project_dir, false);
        assert!(!report.skipped);
        assert!(report.extracted);
        assert_eq!(report.error, None);
        assert_eq!(report.plans_extracted, 1);

        let manifest: SessionManifest = serde_json::from_str(
            &fs::read_to_string(sessions_dir(&project_dir).join("sess-1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.session_id, "sess-1");
        assert_eq!(manifest.title, "Design");
        assert_eq!(manifest.mode, SessionMode::Planning);
        assert_eq!(manifest.files_modified, vec!["src/parser.rs"]);
        assert_eq!(manifest.tools_used, vec!["Write"]);
        assert_eq!(manifest.technologies, vec!["Rust"]);
        assert_eq!(manifest.tokens.total_input_tokens, 1000);
        assert_eq!(manifest.plan_ids.len(), 1);
        assert_eq!(manifest.plans.len(), 1);
        assert!(manifest.plans[0].catalog_id.is_some());

        let index = read_project_index(&project_dir).expect("project index");
        assert_eq!(index.sessions.len(), 1);
        assert_eq!(index.sessions[0].session_id, "sess-1");

        // The plan document itself landed in plans/.
        let plan_id = manifest.plan_ids[0].clone();
        let plan_file = plans_dir(&project_dir).join(format!("{plan_id}.md"));
        assert!(fs::read_to_string(plan_file).unwrap().contains("# Design"));
    }

    #[test]
    fn second_extraction_with_unchanged_mtime_skips() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("proj");
        let transcripts = dir.path().join("transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        let transcript = write_transcript(&transcripts, "sess-1", "/u/proj");

        let first = extract_session_catalog(&transcript, &project_dir, false);
        assert!(!first.skipped && first.extracted);

        let second = extract_session_catalog(&transcript, &project_dir, false);
        assert!(second.skipped);
        assert_eq!(second.plans_extracted, 0);
        assert_eq!(second.subagents_extracted, 0);

        // Force overrides the gate.
        let forced = extract_session_catalog(&transcript, &project_dir, true);
        assert!(!forced.skipped);
    }

    #[test]
    fn empty_transcript_skips_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("proj");
        let transcript = dir.path().join("empty.jsonl");
        fs::write(&transcript, "").unwrap();

        let report = extract_session_catalog(&transcript, &project_dir, false);
        assert!(report.skipped);
        assert!(!sessions_dir(&project_dir).join("empty.json").exists());
    }

    #[test]
    fn unreadable_transcript_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = extract_session_catalog(
            &dir.path().join("missing.jsonl"),
            &dir.path().join("proj"),
            false,
        );
        assert!(!report.skipped);
        assert!(report.error.is_some());
    }

    #[test]
    fn sidechain_transcripts_are_not_bulk_sessions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agent1.jsonl"),
            r#"{"type":"user","isSidechain":true,"message":{"role":"user","content":"sub task"}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("main.jsonl"),
            r#"{"type":"user","cwd":"/u/proj","message":{"role":"user","content":"main task"}}"#,
        )
        .unwrap();
        let transcripts = project_transcripts(dir.path());
        let names: Vec<String> = transcripts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.jsonl"]);
    }

    #[test]
    fn mode_defaults_to_executing_without_plan_signals() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("proj");
        let transcript = dir.path().join("sess-2.jsonl");
        fs::write(
            &transcript,
            r#"{"type":"user","timestamp":"2026-03-01T10:00:00Z","message":{"role":"user","content":"rename the helper"}}
{"type":"assistant","timestamp":"2026-03-01T10:00:05Z","message":{"role":"assistant","content":[{"type":"text","text":"Done."}]}}
"#,
        )
        .unwrap();

        let report = extract_session_catalog(&transcript, &project_dir, false);
        assert!(report.extracted);
        let manifest: SessionManifest = serde_json::from_str(
            &fs::read_to_string(sessions_dir(&project_dir).join("sess-2.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.mode, SessionMode::Executing);
        assert_eq!(manifest.title, "rename the helper");
        assert_eq!(manifest.user_question_count, 1);
    }
}
