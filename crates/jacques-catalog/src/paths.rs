//! Catalog folder layout and filesystem helpers.

use std::io;
use std::path::{Path, PathBuf};

/// Name of the per-project catalog folder.
pub const CATALOG_DIR: &str = ".jacques";

pub fn catalog_root(project_dir: &Path) -> PathBuf {
    project_dir.join(CATALOG_DIR)
}

pub fn sessions_dir(project_dir: &Path) -> PathBuf {
    catalog_root(project_dir).join("sessions")
}

pub fn subagents_dir(project_dir: &Path) -> PathBuf {
    catalog_root(project_dir).join("subagents")
}

pub fn plans_dir(project_dir: &Path) -> PathBuf {
    catalog_root(project_dir).join("plans")
}

pub fn project_index_path(project_dir: &Path) -> PathBuf {
    catalog_root(project_dir).join("index.json")
}

pub fn plan_index_path(project_dir: &Path) -> PathBuf {
    plans_dir(project_dir).join("index.json")
}

/// Root of the assistant's per-project transcript tree
/// (`~/.claude/projects`).
pub fn claude_projects_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// Dash-encode a project path for use as a single path segment: forward
/// slashes become dashes (`/u/x/proj` → `-u-x-proj`).
pub fn dash_encode(project_path: &str) -> String {
    project_path.replace('/', "-")
}

/// Write a file atomically: write to a temp sibling, then rename over the
/// destination.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Modification time of a file as epoch milliseconds.
pub fn mtime_ms(path: &Path) -> io::Result<i64> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified()?;
    let ms = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(ms)
}
