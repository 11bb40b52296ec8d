//! Assistant-side settings the daemon is allowed to touch.
//!
//! The auto-compact toggle rewrites `~/.claude/settings.json`. The rewrite
//! is read-modify-write through a temp file and rename, so a crash can
//! never leave a half-written settings file behind.

use jacques_catalog::paths::atomic_write;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

const AUTOCOMPACT_KEY: &str = "autoCompactEnabled";

/// Context percentage at which some assistant builds compact early. The
/// toggle response carries this as a warning so the UI can annotate it.
pub const AUTOCOMPACT_BUG_THRESHOLD_PERCENT: f64 = 78.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a JSON object")]
    NotAnObject { path: String },
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("settings.json"))
}

/// Flip the auto-compact flag. Returns an advisory warning when enabling.
pub fn toggle_autocompact(path: &Path, enabled: bool) -> Result<Option<String>, SettingsError> {
    let mut settings = read_settings(path)?;
    settings.insert(AUTOCOMPACT_KEY.to_string(), Value::Bool(enabled));

    let json = serde_json::to_vec_pretty(&Value::Object(settings)).map_err(|e| {
        SettingsError::Write {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }
    })?;
    atomic_write(path, &json).map_err(|source| SettingsError::Write {
        path: path.display().to_string(),
        source,
    })?;

    Ok(enabled.then(|| {
        format!(
            "auto-compact may trigger early, around {AUTOCOMPACT_BUG_THRESHOLD_PERCENT}% of the context window, on affected builds"
        )
    }))
}

/// Current auto-compact flag; absent key defaults to enabled.
pub fn autocompact_enabled(path: &Path) -> Result<bool, SettingsError> {
    let settings = read_settings(path)?;
    Ok(settings
        .get(AUTOCOMPACT_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(true))
}

fn read_settings(path: &Path) -> Result<Map<String, Value>, SettingsError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(SettingsError::NotAnObject {
            path: path.display().to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
