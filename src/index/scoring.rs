//! Late-interaction scoring of candidate documents against one query.
//!
//! A scoring call gathers every candidate into a zero-padded
//! `[batch, doc_maxlen, dim]` batch (slot `k` = candidate `k`), then scores the
//! batch either through a [`DelegatedScorer`] or with the local weighted
//! max-similarity:
//!
//! ```text
//! score(k) = Σ_i w_i · max_j dot(Q_i, D_kj)
//! ```
//!
//! Padding rows take part in the max (`dot(Q_i, 0) = 0`), so a query token whose
//! real similarities are all negative contributes 0 rather than its best
//! negative match. Scores always come back in candidate input order.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::{ColbertConfig, Similarity};
use crate::error::{IndexError, Result};
use crate::index::batch::CandidateBatch;
use crate::index::global::GlobalEmbeddingIndex;
use crate::index::simd;

/// Below this many candidates the rayon fan-out costs more than it saves.
const PARALLEL_THRESHOLD: usize = 64;

/// `[num_tokens, dim]` query representation with optional token ids and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEmbeddings {
    data: Vec<f32>,
    num_tokens: usize,
    dim: usize,
    token_ids: Option<Vec<u32>>,
    weights: Option<Vec<f32>>,
}

impl QueryEmbeddings {
    pub fn new(data: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::config("query dimension must be non-zero"));
        }
        if !data.len().is_multiple_of(dim) {
            return Err(IndexError::config(format!(
                "query buffer of {} values is not a whole number of {dim}-dim tokens",
                data.len()
            )));
        }
        Ok(Self {
            num_tokens: data.len() / dim,
            data,
            dim,
            token_ids: None,
            weights: None,
        })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(IndexError::config(format!(
                "query token {i} has dimension {}, expected {dim}",
                row.len()
            )));
        }
        Self::new(rows.into_iter().flatten().collect(), dim)
    }

    pub fn with_token_ids(mut self, ids: Vec<u32>) -> Result<Self> {
        if ids.len() != self.num_tokens {
            return Err(IndexError::config(format!(
                "{} token ids for {} query tokens",
                ids.len(),
                self.num_tokens
            )));
        }
        self.token_ids = Some(ids);
        Ok(self)
    }

    pub fn with_weights(mut self, weights: Vec<f32>) -> Result<Self> {
        check_weights(&weights, self.num_tokens)?;
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn token(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn tokens(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    pub fn token_ids(&self) -> Option<&[u32]> {
        self.token_ids.as_deref()
    }

    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

fn check_weights(weights: &[f32], num_tokens: usize) -> Result<()> {
    if weights.len() != num_tokens {
        return Err(IndexError::config(format!(
            "{} weights for {num_tokens} query tokens",
            weights.len()
        )));
    }
    Ok(())
}

/// External model scorer: one score per batch slot, higher is more relevant.
pub trait DelegatedScorer: Send + Sync {
    fn score(&self, query: &QueryEmbeddings, batch: &CandidateBatch) -> Result<Vec<f32>>;
}

/// Turns query text into token embeddings.
pub trait QueryEncoder: Send + Sync {
    fn encode_query(&self, text: &str) -> Result<QueryEmbeddings>;
}

/// Reference scorer with the model library's own formula: unweighted sum over
/// query tokens of the best match under the configured similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColbertScorer {
    pub similarity: Similarity,
}

impl ColbertScorer {
    pub fn new(similarity: Similarity) -> Self {
        Self { similarity }
    }
}

impl DelegatedScorer for ColbertScorer {
    fn score(&self, query: &QueryEmbeddings, batch: &CandidateBatch) -> Result<Vec<f32>> {
        let sim = |q: &[f32], d: &[f32]| match self.similarity {
            Similarity::Cosine => simd::dot(q, d),
            // 0.0 - x keeps an exact match at +0.0.
            Similarity::L2 => 0.0 - simd::squared_l2(q, d),
        };
        Ok((0..batch.batch_size())
            .map(|k| {
                query
                    .tokens()
                    .map(|q| batch.rows(k).map(|d| sim(q, d)).fold(f32::NEG_INFINITY, f32::max))
                    .sum()
            })
            .collect())
    }
}

/// Weighted max-sim of candidate `k`.
pub fn weighted_max_sim(query: &QueryEmbeddings, weights: &[f32], batch: &CandidateBatch, k: usize) -> f32 {
    query
        .tokens()
        .zip(weights)
        .map(|(q, w)| {
            let best = batch
                .rows(k)
                .map(|d| simd::dot(q, d))
                .fold(f32::NEG_INFINITY, f32::max);
            w * best
        })
        .sum()
}

/// A scored candidate; `rank` 0 is the best score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub pid: u64,
    pub score: f32,
    pub rank: usize,
}

/// Assign ranks by descending score, ties broken by ascending pid. The slice
/// order is left untouched.
pub fn add_ranks(docs: &mut [ScoredDocument]) {
    let mut order: Vec<usize> = (0..docs.len()).collect();
    order.sort_by(|&a, &b| {
        docs[b]
            .score
            .total_cmp(&docs[a].score)
            .then_with(|| docs[a].pid.cmp(&docs[b].pid))
    });
    for (rank, idx) in order.into_iter().enumerate() {
        docs[idx].rank = rank;
    }
}

/// Which formula produces rerank scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scoring {
    /// Local weighted max-sim.
    #[default]
    WeightedMaxSim,
    /// The engine's [`DelegatedScorer`].
    Delegated,
}

#[derive(Debug, Clone)]
pub struct RerankOptions {
    /// Score candidates in ascending id order instead of input order.
    pub sort_by_id: bool,
    pub scoring: Scoring,
    /// Per-token weights overriding the query's own. Weighted max-sim only.
    pub weights: Option<Vec<f32>>,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            sort_by_id: true,
            scoring: Scoring::WeightedMaxSim,
            weights: None,
        }
    }
}

/// Scores candidates for one query against a shared, read-only index.
#[derive(Clone)]
pub struct ScoringEngine {
    index: Arc<GlobalEmbeddingIndex>,
    doc_maxlen: usize,
    query_maxlen: usize,
    parallel_gather: bool,
    scorer: Option<Arc<dyn DelegatedScorer>>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("doc_maxlen", &self.doc_maxlen)
            .field("query_maxlen", &self.query_maxlen)
            .field("parallel_gather", &self.parallel_gather)
            .field("delegated_scorer", &self.scorer.is_some())
            .finish()
    }
}

impl ScoringEngine {
    pub fn new(index: Arc<GlobalEmbeddingIndex>, config: &ColbertConfig) -> Result<Self> {
        config.validate()?;
        if config.dim != index.dim() {
            return Err(IndexError::config(format!(
                "configured dimension {} does not match index dimension {}",
                config.dim,
                index.dim()
            )));
        }
        Ok(Self {
            index,
            doc_maxlen: config.doc_maxlen,
            query_maxlen: config.query_maxlen,
            parallel_gather: config.parallel_gather,
            scorer: None,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn DelegatedScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn index(&self) -> &Arc<GlobalEmbeddingIndex> {
        &self.index
    }

    pub fn doc_maxlen(&self) -> usize {
        self.doc_maxlen
    }

    pub fn query_maxlen(&self) -> usize {
        self.query_maxlen
    }

    /// Assemble the padded batch for `pids`; slot `k` holds `pids[k]`.
    /// Any unresolvable id aborts the whole batch.
    pub fn gather(&self, pids: &[u64]) -> Result<CandidateBatch> {
        let mut batch = CandidateBatch::zeroed(pids.len(), self.doc_maxlen, self.index.dim());
        if self.parallel_gather && pids.len() >= PARALLEL_THRESHOLD {
            let index = &self.index;
            let max_len = self.doc_maxlen;
            batch
                .par_slots_mut()
                .zip(pids.par_iter())
                .try_for_each(|((slot, doclen), &pid)| -> Result<()> {
                    *doclen = index.fill_slot(pid, slot, max_len)?;
                    Ok(())
                })?;
        } else {
            for (k, &pid) in pids.iter().enumerate() {
                self.index.get_padded_into(pid, &mut batch, k)?;
            }
        }
        Ok(batch)
    }

    /// Score with the delegated model scorer.
    pub fn score_by_id(&self, query: &QueryEmbeddings, pids: &[u64]) -> Result<Vec<f32>> {
        let Some(scorer) = &self.scorer else {
            return Err(IndexError::config("no delegated scorer configured"));
        };
        self.check_query(query)?;
        let start = Instant::now();
        let batch = self.gather(pids)?;
        let scores = scorer.score(query, &batch)?;
        if scores.len() != pids.len() {
            return Err(IndexError::config(format!(
                "delegated scorer returned {} scores for {} candidates",
                scores.len(),
                pids.len()
            )));
        }
        debug!(
            candidates = pids.len(),
            query_tokens = query.num_tokens(),
            max_len = self.doc_maxlen,
            elapsed_us = start.elapsed().as_micros(),
            "Delegated scoring completed"
        );
        Ok(scores)
    }

    /// Score with local weighted max-sim. `weights` overrides the query's own
    /// weights; with neither, every token weighs 1.0.
    pub fn score_by_id_with_weights(
        &self,
        query: &QueryEmbeddings,
        pids: &[u64],
        weights: Option<&[f32]>,
    ) -> Result<Vec<f32>> {
        self.check_query(query)?;
        let ones;
        let weights = match weights.or(query.weights()) {
            Some(w) => {
                check_weights(w, query.num_tokens())?;
                w
            }
            None => {
                ones = vec![1.0; query.num_tokens()];
                &ones
            }
        };

        let start = Instant::now();
        let batch = self.gather(pids)?;
        let scores: Vec<f32> = if self.parallel_gather && pids.len() >= PARALLEL_THRESHOLD {
            (0..batch.batch_size())
                .into_par_iter()
                .map(|k| weighted_max_sim(query, weights, &batch, k))
                .collect()
        } else {
            (0..batch.batch_size())
                .map(|k| weighted_max_sim(query, weights, &batch, k))
                .collect()
        };
        debug!(
            candidates = pids.len(),
            query_tokens = query.num_tokens(),
            max_len = self.doc_maxlen,
            elapsed_us = start.elapsed().as_micros(),
            "Weighted max-sim scoring completed"
        );
        Ok(scores)
    }

    /// Encode `text` and score it with the delegated scorer.
    pub fn score_text(&self, encoder: &dyn QueryEncoder, text: &str, pids: &[u64]) -> Result<Vec<f32>> {
        let query = encoder.encode_query(text)?;
        self.score_by_id(&query, pids)
    }

    /// Scores with ranks attached, in scoring order.
    pub fn rerank(
        &self,
        query: &QueryEmbeddings,
        pids: &[u64],
        options: RerankOptions,
    ) -> Result<Vec<ScoredDocument>> {
        let mut ordered = pids.to_vec();
        if options.sort_by_id {
            ordered.sort_unstable();
        }
        let scores = match options.scoring {
            Scoring::WeightedMaxSim => {
                self.score_by_id_with_weights(query, &ordered, options.weights.as_deref())?
            }
            Scoring::Delegated => {
                if options.weights.is_some() {
                    return Err(IndexError::config(
                        "token weights only apply to weighted max-sim scoring",
                    ));
                }
                self.score_by_id(query, &ordered)?
            }
        };
        let mut docs: Vec<ScoredDocument> = ordered
            .into_iter()
            .zip(scores)
            .map(|(pid, score)| ScoredDocument { pid, score, rank: 0 })
            .collect();
        add_ranks(&mut docs);
        Ok(docs)
    }

    fn check_query(&self, query: &QueryEmbeddings) -> Result<()> {
        if query.num_tokens() > self.query_maxlen {
            return Err(IndexError::config(format!(
                "query has {} tokens, query_maxlen is {}",
                query.num_tokens(),
                self.query_maxlen
            )));
        }
        if query.dim() != self.index.dim() {
            return Err(IndexError::config(format!(
                "query dimension {} does not match index dimension {}",
                query.dim(),
                self.index.dim()
            )));
        }
        Ok(())
    }
}
