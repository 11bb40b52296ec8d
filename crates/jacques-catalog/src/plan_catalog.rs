//! Content-addressed plan storage with cross-session dedup.
//!
//! Exact duplicates are caught by a SHA-256 fingerprint over normalized
//! content; near-duplicates by Jaccard similarity over word-level shingle
//! sets. Index writes are atomic (temp file + rename).

use crate::error::CatalogError;
use crate::paths::atomic_write;
use crate::slug::content_hash;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Recommended near-duplicate threshold; tunable per catalog.
pub const DEFAULT_JACCARD_THRESHOLD: f64 = 0.9;

/// Length of the content-derived plan id (hex chars of the fingerprint).
const PLAN_ID_LEN: usize = 12;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of",
    "on", "or", "that", "the", "this", "to", "we", "will", "with",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanIndexEntry {
    pub id: String,
    pub title: String,
    pub fingerprint: String,
    pub shingles: Vec<String>,
    pub session_ids: Vec<String>,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PlanIndex {
    plans: Vec<PlanIndexEntry>,
}

/// Store of deduplicated plan documents for one project.
pub struct PlanCatalog {
    plans_dir: PathBuf,
    index_path: PathBuf,
    pub jaccard_threshold: f64,
}

impl PlanCatalog {
    pub fn new(plans_dir: PathBuf, index_path: PathBuf) -> Self {
        Self {
            plans_dir,
            index_path,
            jaccard_threshold: DEFAULT_JACCARD_THRESHOLD,
        }
    }

    /// Catalog a plan, returning its id.
    ///
    /// Identical normalized content returns the existing id without writing
    /// a new file; a near-duplicate (Jaccard at or above the threshold)
    /// resolves to the most-similar stored plan. Either way the session id
    /// joins the stored entry. Only genuinely new content allocates an id
    /// and writes `plans/<id>.md`.
    pub fn catalog_plan(
        &self,
        title: &str,
        content: &str,
        session_id: &str,
    ) -> Result<String, CatalogError> {
        let normalized = normalize_content(content);
        let fingerprint = content_hash(&normalized);
        let mut index = self.load_index()?;
        let now = Utc::now().timestamp_millis();

        if let Some(entry) = index.plans.iter_mut().find(|p| p.fingerprint == fingerprint) {
            let id = entry.id.clone();
            touch(entry, session_id, now);
            self.store_index(&index)?;
            return Ok(id);
        }

        let shingles = shingle_set(content);
        let best = index
            .plans
            .iter_mut()
            .map(|entry| {
                let stored: BTreeSet<&str> = entry.shingles.iter().map(String::as_str).collect();
                let incoming: BTreeSet<&str> = shingles.iter().map(String::as_str).collect();
                (jaccard(&incoming, &stored), entry)
            })
            .filter(|(similarity, _)| *similarity >= self.jaccard_threshold)
            .max_by(|(a, _), (b, _)| a.total_cmp(b));
        if let Some((similarity, entry)) = best {
            debug!(
                id = %entry.id,
                similarity,
                "plan resolved to near-duplicate"
            );
            let id = entry.id.clone();
            touch(entry, session_id, now);
            self.store_index(&index)?;
            return Ok(id);
        }

        let id = fingerprint[..PLAN_ID_LEN].to_string();
        let path = self.plans_dir.join(format!("{id}.md"));
        atomic_write(&path, content.as_bytes()).map_err(|source| CatalogError::Write {
            path: path.display().to_string(),
            source,
        })?;
        index.plans.push(PlanIndexEntry {
            id: id.clone(),
            title: title.to_string(),
            fingerprint,
            shingles: shingles.into_iter().collect(),
            session_ids: vec![session_id.to_string()],
            first_seen: now,
            last_seen: now,
        });
        self.store_index(&index)?;
        Ok(id)
    }

    /// Content of a stored plan.
    pub fn plan_content(&self, plan_id: &str) -> Result<String, CatalogError> {
        let path = self.plans_dir.join(format!("{plan_id}.md"));
        std::fs::read_to_string(&path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn entries(&self) -> Result<Vec<PlanIndexEntry>, CatalogError> {
        Ok(self.load_index()?.plans)
    }

    fn load_index(&self) -> Result<PlanIndex, CatalogError> {
        match std::fs::read_to_string(&self.index_path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| CatalogError::Corrupt {
                path: self.index_path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PlanIndex::default()),
            Err(source) => Err(CatalogError::Read {
                path: self.index_path.display().to_string(),
                source,
            }),
        }
    }

    fn store_index(&self, index: &PlanIndex) -> Result<(), CatalogError> {
        let json = serde_json::to_vec_pretty(index).map_err(|e| CatalogError::Corrupt {
            path: self.index_path.display().to_string(),
            message: e.to_string(),
        })?;
        atomic_write(&self.index_path, &json).map_err(|source| CatalogError::Write {
            path: self.index_path.display().to_string(),
            source,
        })
    }
}

fn touch(entry: &mut PlanIndexEntry, session_id: &str, now: i64) {
    entry.session_ids.push(session_id.to_string());
    entry.last_seen = now;
}

// ─── Normalization & similarity ───────────────────────────────────

/// Trim and collapse whitespace runs; the fingerprint input.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-level shingle set: markdown punctuation stripped, case-folded,
/// stop words removed.
pub fn shingle_set(content: &str) -> BTreeSet<String> {
    content
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

pub fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_in(dir: &Path) -> PlanCatalog {
        PlanCatalog::new(dir.join("plans"), dir.join("plans").join("index.json"))
    }

    fn plan_content() -> String {
        let steps = "- step one: rework the lexer so recovery is possible\n\
                     - step two: add parser recovery points and diagnostics\n\
                     - step three: extend the integration tests for errors\n";
        format!("# Design\n\nRework the parser for better error messages.\n\n{steps}")
    }

    #[test]
    fn identical_content_returns_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let content = plan_content();
        let id1 = catalog.catalog_plan("Design", &content, "sess-1").unwrap();
        let id2 = catalog.catalog_plan("Design", &content, "sess-2").unwrap();
        assert_eq!(id1, id2);

        let entries = catalog.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_ids, vec!["sess-1", "sess-2"]);
        assert!(entries[0].last_seen >= entries[0].first_seen);

        // Exactly one plan file was written.
        let files: Vec<_> = std::fs::read_dir(dir.path().join("plans"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn whitespace_variants_share_a_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let content = plan_content();
        let reflowed = content.replace("\n\n", " \n\n  ").replace("  ", " ");

        let id1 = catalog.catalog_plan("Design", &content, "s1").unwrap();
        let id2 = catalog.catalog_plan("Design", &reflowed, "s2").unwrap();
        assert_eq!(id1, id2, "normalization collapses whitespace differences");
    }

    #[test]
    fn near_duplicate_resolves_by_jaccard() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let content = plan_content();
        // One trailing sentence changes the fingerprint but barely moves
        // the shingle set.
        let tweaked = format!("{content}\nAlso extend the parser diagnostics tests\n");

        let id1 = catalog.catalog_plan("Design", &content, "s1").unwrap();
        let id2 = catalog.catalog_plan("Design", &tweaked, "s2").unwrap();
        assert_eq!(id1, id2, "near-duplicate should map to the stored plan");
        assert_eq!(catalog.entries().unwrap().len(), 1);
    }

    #[test]
    fn distinct_plans_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_in(dir.path());
        let other = "# Deployment\n\nStand up the staging cluster.\n\n\
                     - provision nodes with the base image\n\
                     - install the ingress controller\n\
                     - wire up DNS and certificates\n";

        let id1 = catalog.catalog_plan("Design", &plan_content(), "s1").unwrap();
        let id2 = catalog.catalog_plan("Deployment", other, "s1").unwrap();
        assert_ne!(id1, id2);
        assert_eq!(catalog.entries().unwrap().len(), 2);
        assert_eq!(catalog.plan_content(&id2).unwrap(), other);
    }

    #[test]
    fn shingles_strip_markdown_and_stop_words() {
        let shingles = shingle_set("# The Plan:\n- **Refactor** the `parser` module!");
        assert!(shingles.contains("refactor"));
        assert!(shingles.contains("parser"));
        assert!(shingles.contains("module"));
        assert!(!shingles.contains("the"));
        assert!(!shingles.contains("#"));
    }

    #[test]
    fn jaccard_bounds() {
        let a: BTreeSet<&str> = ["x", "y", "z"].into_iter().collect();
        let b: BTreeSet<&str> = ["x", "y", "z"].into_iter().collect();
        assert_eq!(jaccard(&a, &b), 1.0);

        let c: BTreeSet<&str> = ["p", "q"].into_iter().collect();
        assert_eq!(jaccard(&a, &c), 0.0);

        let empty = BTreeSet::new();
        assert_eq!(jaccard(&empty, &empty), 1.0);
    }

    #[test]
    fn threshold_is_tunable() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog_in(dir.path());
        catalog.jaccard_threshold = 0.1;

        let loose_match = "# Design\n\nparser lexer recovery diagnostics tests module rework \
                           error messages integration possible points extend better step";
        catalog.catalog_plan("Design", &plan_content(), "s1").unwrap();
        let id = catalog.catalog_plan("Design", loose_match, "s2").unwrap();
        assert_eq!(catalog.entries().unwrap().len(), 1, "loose threshold absorbs it");
        assert_eq!(id, catalog.entries().unwrap()[0].id);
    }
}
