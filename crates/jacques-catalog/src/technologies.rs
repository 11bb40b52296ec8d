//! Technology detection from touched files and content signals.

use std::collections::HashSet;

const EXTENSION_MAP: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("py", "Python"),
    ("go", "Go"),
    ("rb", "Ruby"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("swift", "Swift"),
    ("c", "C"),
    ("h", "C"),
    ("cpp", "C++"),
    ("cc", "C++"),
    ("hpp", "C++"),
    ("cs", "C#"),
    ("php", "PHP"),
    ("sql", "SQL"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("tf", "Terraform"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
];

const CONTENT_SIGNALS: &[(&str, &str)] = &[
    ("Cargo.toml", "Rust"),
    ("cargo build", "Rust"),
    ("cargo test", "Rust"),
    ("package.json", "Node.js"),
    ("npm install", "Node.js"),
    ("pnpm ", "Node.js"),
    ("requirements.txt", "Python"),
    ("pip install", "Python"),
    ("pyproject.toml", "Python"),
    ("go.mod", "Go"),
    ("Dockerfile", "Docker"),
    ("docker compose", "Docker"),
    ("docker-compose", "Docker"),
    ("kubectl", "Kubernetes"),
    ("terraform ", "Terraform"),
];

/// Detect technologies from file extensions and free-text signals, in order
/// of first appearance.
pub fn detect_technologies<'a>(
    files: impl IntoIterator<Item = &'a str>,
    texts: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for file in files {
        let ext = file.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        if let Some((_, tech)) = EXTENSION_MAP.iter().find(|(e, _)| *e == ext) {
            if seen.insert(*tech) {
                out.push(tech.to_string());
            }
        }
    }
    for text in texts {
        for (signal, tech) in CONTENT_SIGNALS {
            if text.contains(signal) && seen.insert(*tech) {
                out.push(tech.to_string());
            }
        }
    }
    out
}
