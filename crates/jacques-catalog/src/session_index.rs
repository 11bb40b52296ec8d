//! Global session index.
//!
//! A cache under `~/.jacques/sessions-index.json` mirroring every
//! discovered transcript, so cross-project lookups never have to rescan
//! the whole transcript tree.

use crate::error::CatalogError;
use crate::paths::atomic_write;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub transcript_path: String,
    pub project_path: String,
    pub modified_at: i64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSessionIndex {
    pub generated_at: i64,
    pub entries: Vec<SessionIndexEntry>,
}

impl GlobalSessionIndex {
    pub fn default_path() -> Result<PathBuf, CatalogError> {
        dirs::home_dir()
            .map(|home| home.join(".jacques").join("sessions-index.json"))
            .ok_or(CatalogError::MissingHome)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| CatalogError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(CatalogError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Insert or refresh one entry, keyed by session id.
    pub fn record(&mut self, entry: SessionIndexEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.session_id == entry.session_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn store(&mut self, path: &Path) -> Result<(), CatalogError> {
        self.generated_at = Utc::now().timestamp_millis();
        let json = serde_json::to_vec_pretty(self).map_err(|e| CatalogError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        atomic_write(path, &json).map_err(|source| CatalogError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn find(&self, session_id: &str) -> Option<&SessionIndexEntry> {
        self.entries.iter().find(|e| e.session_id == session_id)
    }
}
