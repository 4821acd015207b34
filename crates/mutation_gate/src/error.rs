use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("path escapes scope root: {0}")]
    ScopeEscape(PathBuf),

    #[error("path {0} has no parent directory and cannot be written safely")]
    NoParent(PathBuf),

    #[error("no existing ancestor found for path {0}")]
    NoExistingAncestor(PathBuf),

    #[error("{0} is not UTF-8 text")]
    BinaryContent(PathBuf),

    #[error("scope root {0} is not an existing directory")]
    InvalidScopeRoot(PathBuf),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MutationError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
