//! Slugs and short content hashes for artifact filenames.

use sha2::{Digest, Sha256};

const MAX_SLUG_LEN: usize = 40;

/// Filesystem-safe slug: lowercase alphanumerics joined by single dashes,
/// truncated on a word boundary where possible.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "untitled".to_string() } else { slug }
}

/// Hex SHA-256 of arbitrary content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 8 hex chars of the content hash; used in search artifact names.
pub fn short_hash(content: &str) -> String {
    content_hash(content)[..8].to_string()
}
