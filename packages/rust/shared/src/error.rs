//! Error types for feeddigest.
//!
//! Library crates use [`DigestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all feeddigest operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching an asset.
    #[error("network error: {0}")]
    Network(String),

    /// Input parsing error (feed items, manifests, HTML).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The entry store exists but cannot be read back.
    #[error("entry store at {path:?} is corrupt: {message}")]
    StoreCorrupt { path: PathBuf, message: String },

    /// Any other storage layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown key, bad manifest, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A single feed item could not be turned into an entry.
    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// HTML asset rewriting failed for the whole document.
    #[error("rewrite error: {0}")]
    Rewrite(String),

    /// The external converter failed.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The external transport failed.
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Reasons a feed item is rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// A required field (`title`, `link` or `summary`) is absent or blank.
    #[error("feed item is missing required field `{field}`")]
    MissingField { field: &'static str },

    /// guid, link and title are all empty, so no stable key exists.
    #[error("feed item has no guid, link or title to derive a key from")]
    MissingKey,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DigestError>;

impl DigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Report a present-but-unreadable store file.
    pub fn corrupt(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
