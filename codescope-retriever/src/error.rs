//! Error types for indexing, storage and retrieval

use std::path::PathBuf;

/// Result type for retriever operations.
pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Everything that can go wrong while indexing or querying a workspace.
///
/// Per-file variants (`Io`, `FileTooLarge`, `Extraction`) are logged and
/// counted by multi-file operations rather than aborting them. `Cancelled`
/// only surfaces from single-file calls made while a scan is being torn down.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// A file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file is above the configured size ceiling
    #[error("File too large: {path} ({chars} chars, limit {limit})")]
    FileTooLarge {
        path: PathBuf,
        chars: usize,
        limit: usize,
    },

    /// Chunk extraction failed for a file
    #[error("Extraction failed for {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    /// The indexing session was cancelled
    #[error("Indexing cancelled")]
    Cancelled,

    /// Persisting or loading the chunk store failed
    #[error("Store error: {message}")]
    Store { message: String },

    /// JSON encoding or decoding failed
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// The file watcher could not be started
    #[error("Watch error: {source}")]
    Watch {
        #[from]
        source: notify::Error,
    },
}

impl RetrieverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error only concerns one file and should not stop a scan.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::FileTooLarge { .. } | Self::Extraction { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RetrieverError::FileTooLarge {
            path: PathBuf::from("big.js"),
            chars: 200_000,
            limit: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "File too large: big.js (200000 chars, limit 100000)"
        );
        assert!(err.is_per_file());

        let err = RetrieverError::config("batch_size must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: batch_size must be at least 1"
        );
        assert!(!err.is_per_file());
    }

    #[test]
    fn test_serde_errors_convert() {
        let err: RetrieverError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, RetrieverError::Serialization { .. }));
    }
}
