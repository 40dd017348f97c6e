//! Error taxonomy for the embedding store and scoring engine.
//!
//! Structural problems (missing shards, size mismatches) surface at load time;
//! per-call problems (bad ids, dimension mismatches) surface from the lookup or
//! scoring call that hit them. Nothing is retried and nothing is skipped.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The index or a call was configured inconsistently (no shards, unknown
    /// selector, dimension mismatch, invalid config value).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A shard buffer disagrees with its declared document lengths.
    #[error("index corruption in {path}: {reason}")]
    IndexCorruption { path: PathBuf, reason: String },

    /// A document id, local id or padding length outside the valid bounds.
    #[error("{what} {value} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(what: &'static str, value: u64, limit: u64) -> Self {
        Self::OutOfRange { what, value, limit }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::IndexCorruption { .. })
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}
