use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
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
    #[error("corrupt catalog file {path}: {message}")]
    Corrupt { path: String, message: String },
    #[error("cannot resolve the home directory")]
    MissingHome,
}
