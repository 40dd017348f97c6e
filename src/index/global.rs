//! Cross-shard view over an ordered list of partitions.
//!
//! Global document ids are assigned in partition order. With `n_i` documents in
//! partition `i`:
//!
//! ```text
//! partition_end[i]   = n_0 + .. + n_i - 1          (inclusive last id)
//! partition_begin[i] = partition_end[i - 1] + 1    (partition_begin[0] = 0)
//! ```
//!
//! Both arrays are strictly increasing, so a global id resolves with a binary
//! search over `partition_end`.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::ColbertConfig;
use crate::error::{IndexError, Result};
use crate::index::batch::{CandidateBatch, PaddedEmbedding};
use crate::index::layout::ShardLayout;
use crate::index::partition::{DocEmbedding, PartitionStore};
use crate::index::precision::{Precision, StorageMode};

/// Reported after each shard finishes loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    /// Shards loaded so far.
    pub loaded: usize,
    pub total: usize,
    /// Documents in the shard that just finished.
    pub documents: usize,
    /// Heap bytes the shard occupies (zero when mapped).
    pub resident_bytes: usize,
}

#[derive(Debug)]
pub struct GlobalEmbeddingIndex {
    partitions: Vec<PartitionStore>,
    partition_begin: Vec<u64>,
    partition_end: Vec<u64>,
    dim: usize,
}

impl GlobalEmbeddingIndex {
    /// Build from partitions already in partition order.
    pub fn new(partitions: Vec<PartitionStore>) -> Result<Self> {
        let Some(first) = partitions.first() else {
            return Err(IndexError::config("no partitions supplied"));
        };
        let dim = first.dim();

        let mut partition_begin = Vec::with_capacity(partitions.len());
        let mut partition_end = Vec::with_capacity(partitions.len());
        let mut next: u64 = 0;
        for (i, part) in partitions.iter().enumerate() {
            if part.dim() != dim {
                return Err(IndexError::config(format!(
                    "partition {i} has dimension {}, partition 0 has {dim}",
                    part.dim()
                )));
            }
            if part.num_documents() == 0 {
                return Err(IndexError::config(format!(
                    "partition {i} ({}) contains no documents",
                    part.path().display()
                )));
            }
            partition_begin.push(next);
            next += part.num_documents() as u64;
            partition_end.push(next - 1);
        }

        Ok(Self {
            partitions,
            partition_begin,
            partition_end,
            dim,
        })
    }

    /// Discover shards under `index_path` and open them with the configured
    /// backend. All-or-nothing: the first failing shard aborts the load.
    pub fn load<F>(index_path: &Path, config: &ColbertConfig, progress: F) -> Result<Self>
    where
        F: FnMut(LoadProgress),
    {
        config.validate()?;
        let layout = ShardLayout::discover(index_path)?;
        Self::from_layout(layout, config, progress)
    }

    pub fn from_layout<F>(layout: ShardLayout, config: &ColbertConfig, mut progress: F) -> Result<Self>
    where
        F: FnMut(LoadProgress),
    {
        let start = Instant::now();
        let total = layout.shards().len();
        info!(
            index = %layout.root().display(),
            shards = total,
            storage = %config.storage,
            precision = %config.precision,
            "Loading embedding index"
        );

        let mut partitions = Vec::with_capacity(total);
        for shard in layout.into_shards() {
            let documents = shard.num_documents();
            let part = PartitionStore::open(
                &shard.store_path,
                shard.doclens,
                config.dim,
                config.precision,
                config.storage,
            )?;
            debug!(
                shard = shard.index,
                documents,
                rows = part.num_rows(),
                path = %shard.store_path.display(),
                "Loaded shard"
            );
            progress(LoadProgress {
                loaded: shard.index + 1,
                total,
                documents,
                resident_bytes: part.resident_bytes(),
            });
            partitions.push(part);
        }

        let index = Self::new(partitions)?;
        info!(
            partitions = index.num_partitions(),
            documents = index.num_documents(),
            rows = index.partitions.iter().map(PartitionStore::num_rows).sum::<usize>(),
            elapsed_ms = start.elapsed().as_millis(),
            "Embedding index ready"
        );
        Ok(index)
    }

    /// `(partition index, local id)` owning `global_id`.
    pub fn resolve(&self, global_id: u64) -> Result<(usize, usize)> {
        let last = self.partition_end[self.partition_end.len() - 1];
        if global_id > last {
            return Err(IndexError::out_of_range("global document id", global_id, last));
        }
        let part = self.partition_end.partition_point(|&end| end < global_id);
        let local = global_id - self.partition_begin[part];
        Ok((part, local as usize))
    }

    /// Zero-copy view of a document's rows.
    pub fn get(&self, global_id: u64) -> Result<DocEmbedding<'_>> {
        let (part, local) = self.resolve(global_id)?;
        self.partitions[part].get(local)
    }

    pub fn doclen(&self, global_id: u64) -> Result<usize> {
        Ok(self.get(global_id)?.len())
    }

    /// Copy a document into a fresh zero-filled `[max_len, dim]` tensor.
    pub fn get_padded(&self, global_id: u64, max_len: usize) -> Result<PaddedEmbedding> {
        let mut padded = PaddedEmbedding::zeroed(max_len, self.dim);
        let doclen = self.fill_slot(global_id, padded.buffer_mut(), max_len)?;
        padded.set_doclen(doclen);
        Ok(padded)
    }

    /// Copy a document into slot `slot` of a preallocated batch.
    pub fn get_padded_into(
        &self,
        global_id: u64,
        batch: &mut CandidateBatch,
        slot: usize,
    ) -> Result<()> {
        if batch.dim() != self.dim {
            return Err(IndexError::config(format!(
                "batch dimension {} does not match index dimension {}",
                batch.dim(),
                self.dim
            )));
        }
        if slot >= batch.batch_size() {
            return Err(IndexError::out_of_range(
                "batch slot",
                slot as u64,
                batch.batch_size() as u64,
            ));
        }
        let max_len = batch.max_len();
        let doclen = self.fill_slot(global_id, batch.slot_mut(slot), max_len)?;
        batch.set_doclen(slot, doclen);
        Ok(())
    }

    /// Write rows into `dst` (`max_len * dim` long) and zero the remainder.
    /// This is where rows leave mapped storage.
    pub(crate) fn fill_slot(&self, global_id: u64, dst: &mut [f32], max_len: usize) -> Result<usize> {
        let view = self.get(global_id)?;
        let doclen = view.len();
        if doclen > max_len {
            return Err(IndexError::out_of_range(
                "document length",
                doclen as u64,
                max_len as u64,
            ));
        }
        view.copy_into(dst);
        dst[doclen * self.dim..].fill(0.0);
        Ok(doclen)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_documents(&self) -> u64 {
        self.partition_end[self.partition_end.len() - 1] + 1
    }

    pub fn partition(&self, i: usize) -> Option<&PartitionStore> {
        self.partitions.get(i)
    }

    pub fn partitions(&self) -> &[PartitionStore] {
        &self.partitions
    }

    pub fn partition_begin(&self) -> &[u64] {
        &self.partition_begin
    }

    pub fn partition_end(&self) -> &[u64] {
        &self.partition_end
    }

    pub fn precision(&self) -> Precision {
        self.partitions[0].precision()
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.partitions[0].storage_mode()
    }

    pub fn resident_bytes(&self) -> usize {
        self.partitions.iter().map(PartitionStore::resident_bytes).sum()
    }
}
