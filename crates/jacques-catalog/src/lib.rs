//! Durable per-project catalogs mined from assistant transcripts.
//!
//! For each project the extractor maintains a `.jacques/` folder holding
//! session manifests, extracted subagent and web-search artifacts, and a
//! content-addressed plan store with cross-session dedup. Extraction is
//! incremental: unchanged transcripts are skipped by mtime.

pub mod error;
pub mod extractor;
pub mod manifest;
pub mod paths;
pub mod plan_catalog;
pub mod plans;
pub mod session_index;
pub mod slug;
pub mod subagents;
pub mod technologies;
pub mod web_search;

pub use error::CatalogError;
pub use extractor::{
    BulkSummary, extract_all_catalogs, extract_project_catalog, extract_session_catalog,
    read_project_index,
};
pub use manifest::{ExtractionReport, PlanReference, PlanSource, SessionManifest, SessionMode};
pub use plan_catalog::{DEFAULT_JACCARD_THRESHOLD, PlanCatalog};

use std::path::Path;

/// Short project name: the last component of the project directory.
pub fn project_name(project_dir: &Path) -> String {
    project_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project_dir.display().to_string())
}
