//! Build-once handle to an index directory.
//!
//! The index is loaded on first use and shared afterwards. Concurrent first
//! callers block on the same initialization, so a collection is never loaded
//! twice. A failed load is not cached and the next caller retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::config::ColbertConfig;
use crate::error::Result;
use crate::index::global::{GlobalEmbeddingIndex, LoadProgress};
use crate::index::scoring::{DelegatedScorer, ScoringEngine};

pub struct IndexFactory {
    index_path: PathBuf,
    config: ColbertConfig,
    index: OnceCell<Arc<GlobalEmbeddingIndex>>,
    scorer: Option<Arc<dyn DelegatedScorer>>,
}

impl IndexFactory {
    pub fn new(index_path: impl Into<PathBuf>, config: ColbertConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            index_path: index_path.into(),
            config,
            index: OnceCell::new(),
            scorer: None,
        })
    }

    /// Scorer handed to every engine this factory creates.
    pub fn with_scorer(mut self, scorer: Arc<dyn DelegatedScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn config(&self) -> &ColbertConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.index.get().is_some()
    }

    pub fn index(&self) -> Result<Arc<GlobalEmbeddingIndex>> {
        self.index_with_progress(|_| {})
    }

    /// Like [`index`](Self::index); `progress` only fires if this call loads.
    pub fn index_with_progress<F>(&self, progress: F) -> Result<Arc<GlobalEmbeddingIndex>>
    where
        F: FnMut(LoadProgress),
    {
        self.index
            .get_or_try_init(|| {
                info!(
                    index = %self.index_path.display(),
                    storage = %self.config.storage,
                    "Loading reranking index"
                );
                GlobalEmbeddingIndex::load(&self.index_path, &self.config, progress).map(Arc::new)
            })
            .cloned()
    }

    pub fn engine(&self) -> Result<ScoringEngine> {
        let engine = ScoringEngine::new(self.index()?, &self.config)?;
        Ok(match &self.scorer {
            Some(scorer) => engine.with_scorer(scorer.clone()),
            None => engine,
        })
    }
}
