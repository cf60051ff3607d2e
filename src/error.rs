//! Application-wide error types.
//!
//! Library modules use the shared [`Error`] enum via `thiserror`; the CLI
//! binary wraps everything in `anyhow` at the boundary. Per-file problems
//! during a scan (unreadable file, corrupt tags) are *not* modeled here -
//! the engine logs and skips those. Only failures that end an operation
//! surface as [`Error`].

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error (fatal to the operation that hit it)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Tag extraction error for a specific file
    #[error("Extraction error for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// A scan pass is already running
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// The requested scan root is invalid
    #[error("Invalid scan root {root}: {message}")]
    InvalidScanRoot { root: PathBuf, message: String },

    /// The scan pass was cancelled before completion
    #[error("Scan cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an extraction error.
    pub fn extraction(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-scan-root error.
    pub fn invalid_root(root: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidScanRoot {
            root: root.into(),
            message: message.into(),
        }
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_display() {
        let err = Error::extraction("/music/broken.mp3", "not an audio file");
        let msg = err.to_string();
        assert!(msg.contains("broken.mp3"));
        assert!(msg.contains("not an audio file"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::ScanInProgress.context("while handling scan request");
        assert!(err.to_string().contains("while handling scan request"));
    }

    #[test]
    fn test_result_ext_on_sqlx() {
        let result: std::result::Result<(), sqlx::Error> = Err(sqlx::Error::PoolClosed);
        let with_ctx = result.with_context("during orphan collection");
        assert!(
            with_ctx
                .unwrap_err()
                .to_string()
                .contains("during orphan collection")
        );
    }
}
