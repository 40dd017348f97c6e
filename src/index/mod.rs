//! Embedding store and late-interaction scoring.
//!
//! - **[`precision`]**: shard element precision and backend selectors.
//! - **[`layout`]**: shard discovery in an index directory.
//! - **[`partition`]**: one shard's rows and document-length table (mmap or in-memory).
//! - **[`global`]**: global document ids across ordered partitions.
//! - **[`batch`]**: zero-padded candidate tensors.
//! - **[`simd`]**: dot-product kernels.
//! - **[`scoring`]**: candidate gather plus delegated or weighted max-sim scoring.
//! - **[`factory`]**: build-once shared index handle.

pub mod batch;
pub mod factory;
pub mod global;
pub mod layout;
pub mod partition;
pub mod precision;
pub mod scoring;
pub mod simd;

pub use batch::{CandidateBatch, PaddedEmbedding};
pub use factory::IndexFactory;
pub use global::{GlobalEmbeddingIndex, LoadProgress};
pub use layout::{ShardDescriptor, ShardLayout};
pub use partition::{DocEmbedding, PartitionStore};
pub use precision::{Precision, StorageMode};
pub use scoring::{
    ColbertScorer, DelegatedScorer, QueryEmbeddings, QueryEncoder, RerankOptions, ScoredDocument,
    Scoring, ScoringEngine,
};
