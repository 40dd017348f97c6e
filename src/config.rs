//! Named configuration for loading and scoring.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, `COLSTORE_*` environment variables (a `.env` file is honoured), and
//! finally explicit CLI flags.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::index::precision::{Precision, StorageMode};

/// Similarity convention of the delegated model scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    /// Dot product of (already normalized) embeddings.
    #[default]
    Cosine,
    /// Negative squared euclidean distance.
    L2,
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Similarity::Cosine => "cosine",
            Similarity::L2 => "l2",
        })
    }
}

impl FromStr for Similarity {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Similarity::Cosine),
            "l2" => Ok(Similarity::L2),
            other => Err(IndexError::config(format!("unknown similarity: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColbertConfig {
    /// Maximum query tokens; longer queries are rejected at scoring time (default: 32).
    pub query_maxlen: usize,
    /// Padding length for candidate batches (default: 180).
    pub doc_maxlen: usize,
    /// Embedding dimension (default: 128).
    pub dim: usize,
    /// Similarity convention for the delegated scorer (default: cosine).
    pub similarity: Similarity,
    /// Probe count for the nearest-neighbour collaborator. Not read by this
    /// crate, only carried for callers that build one (default: 10).
    pub nprobe: usize,
    /// Encoder batch size for the query encoder collaborator. Not read by this
    /// crate (default: 128).
    pub bsize: usize,
    /// Shard backend (default: memory).
    pub storage: StorageMode,
    /// Shard element precision (default: f16).
    pub precision: Precision,
    /// Gather candidates with rayon (default: true).
    pub parallel_gather: bool,
}

impl Default for ColbertConfig {
    fn default() -> Self {
        Self {
            query_maxlen: 32,
            doc_maxlen: 180,
            dim: 128,
            similarity: Similarity::Cosine,
            nprobe: 10,
            bsize: 128,
            storage: StorageMode::Memory,
            precision: Precision::F16,
            parallel_gather: true,
        }
    }
}

impl ColbertConfig {
    /// Defaults overlaid with `COLSTORE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)
            .map_err(|e| IndexError::config(format!("invalid config file: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay environment variables; unparseable values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_value("COLSTORE_QUERY_MAXLEN") {
            self.query_maxlen = v;
        }
        if let Some(v) = env_value("COLSTORE_DOC_MAXLEN") {
            self.doc_maxlen = v;
        }
        if let Some(v) = env_value("COLSTORE_DIM") {
            self.dim = v;
        }
        if let Some(v) = env_value("COLSTORE_NPROBE") {
            self.nprobe = v;
        }
        if let Some(v) = env_value("COLSTORE_BSIZE") {
            self.bsize = v;
        }
        if let Some(v) = env_value("COLSTORE_STORAGE") {
            self.storage = v;
        }
        if let Some(v) = env_value("COLSTORE_PRECISION") {
            self.precision = v;
        }
        if let Some(v) = env_value("COLSTORE_SIMILARITY") {
            self.similarity = v;
        }
        if let Ok(val) = dotenvy::var("COLSTORE_PARALLEL_GATHER") {
            self.parallel_gather = val != "0" && val.to_lowercase() != "false";
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(IndexError::config("dim must be non-zero"));
        }
        if self.doc_maxlen == 0 {
            return Err(IndexError::config("doc_maxlen must be non-zero"));
        }
        if self.query_maxlen == 0 {
            return Err(IndexError::config("query_maxlen must be non-zero"));
        }
        Ok(())
    }
}

fn env_value<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = dotenvy::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Ignoring invalid environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard(&'static str);

    impl EnvGuard {
        fn set(key: &'static str, val: &str) -> Self {
            unsafe { std::env::set_var(key, val) };
            Self(key)
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            unsafe { std::env::remove_var(self.0) };
        }
    }

    #[test]
    fn defaults_match_reference_settings() {
        let cfg = ColbertConfig::default();
        assert_eq!(cfg.query_maxlen, 32);
        assert_eq!(cfg.doc_maxlen, 180);
        assert_eq!(cfg.dim, 128);
        assert_eq!(cfg.similarity, Similarity::Cosine);
        assert_eq!(cfg.nprobe, 10);
        assert_eq!(cfg.storage, StorageMode::Memory);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let cfg = ColbertConfig::from_toml_str(
            r#"
            doc_maxlen = 300
            storage = "mmap"
            similarity = "l2"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.doc_maxlen, 300);
        assert_eq!(cfg.storage, StorageMode::Mmap);
        assert_eq!(cfg.similarity, Similarity::L2);
        assert_eq!(cfg.dim, 128);
    }

    #[test]
    fn toml_rejects_unknown_selector_and_zero_dim() {
        assert!(ColbertConfig::from_toml_str(r#"storage = "disk""#)
            .unwrap_err()
            .is_configuration());
        assert!(ColbertConfig::from_toml_str("dim = 0")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let _a = EnvGuard::set("COLSTORE_DOC_MAXLEN", "64");
        let _b = EnvGuard::set("COLSTORE_STORAGE", "mmap");
        let _c = EnvGuard::set("COLSTORE_DIM", "not-a-number");
        let _d = EnvGuard::set("COLSTORE_PARALLEL_GATHER", "0");
        let cfg = ColbertConfig::from_env();
        assert_eq!(cfg.doc_maxlen, 64);
        assert_eq!(cfg.storage, StorageMode::Mmap);
        assert_eq!(cfg.dim, 128);
        assert!(!cfg.parallel_gather);
    }
}
