//! Web-search artifact extraction.
//!
//! For every distinct search query in a session, the next substantial
//! assistant response (before the next user message or the next search)
//! is captured together with the query and its source URLs.

use crate::error::CatalogError;
use crate::manifest::SearchIndexEntry;
use crate::paths::atomic_write;
use crate::slug::{short_hash, slugify};
use jacques_transcript::{EntryKind, ParsedEntry, WebSearchPhase};
use std::collections::HashSet;
use std::path::Path;

/// Minimum length of an assistant response to count as a synthesis.
const MIN_SYNTHESIS_LEN: usize = 200;

/// Extract one markdown artifact per distinct query into `out_dir`.
pub fn extract_searches(
    entries: &[ParsedEntry],
    session_id: &str,
    out_dir: &Path,
) -> Result<Vec<SearchIndexEntry>, CatalogError> {
    let mut seen_queries: HashSet<String> = HashSet::new();
    let mut artifacts = Vec::new();

    for (pos, entry) in entries.iter().enumerate() {
        let EntryKind::WebSearch {
            phase: WebSearchPhase::Results,
            query,
            urls,
        } = &entry.kind
        else {
            continue;
        };
        if query.is_empty() || !seen_queries.insert(query.clone()) {
            continue;
        }
        let Some(synthesis) = synthesis_after(&entries[pos + 1..]) else {
            continue;
        };

        let file_name = format!("search_{}_{}.md", short_hash(query), slugify(query));
        let sources = if urls.is_empty() {
            String::new()
        } else {
            let list: String = urls.iter().map(|u| format!("- {u}\n")).collect();
            format!("## Sources\n\n{list}\n")
        };
        let body = format!("# Search: {query}\n\n{sources}## Synthesis\n\n{synthesis}\n");
        let path = out_dir.join(&file_name);
        atomic_write(&path, body.as_bytes()).map_err(|source| CatalogError::Write {
            path: path.display().to_string(),
            source,
        })?;

        artifacts.push(SearchIndexEntry {
            query: query.clone(),
            session_id: session_id.to_string(),
            file: file_name,
            urls: urls.clone(),
        });
    }
    Ok(artifacts)
}

/// The next substantial assistant message, stopping at the next user
/// message or the next search.
fn synthesis_after(entries: &[ParsedEntry]) -> Option<String> {
    for entry in entries {
        match &entry.kind {
            EntryKind::AssistantMessage { text, .. } if text.trim().len() >= MIN_SYNTHESIS_LEN => {
                return Some(text.clone());
            }
            EntryKind::UserMessage { is_meta: false, .. } => return None,
            EntryKind::WebSearch {
                phase: WebSearchPhase::Results,
                ..
            } => return None,
            _ => {}
        }
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────
