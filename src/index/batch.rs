//! Zero-padded embedding tensors assembled for one scoring call.

use rayon::prelude::*;

/// A single document padded to `[max_len, dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedEmbedding {
    data: Vec<f32>,
    doclen: usize,
    max_len: usize,
    dim: usize,
}

impl PaddedEmbedding {
    pub(crate) fn zeroed(max_len: usize, dim: usize) -> Self {
        Self {
            data: vec![0.0; max_len * dim],
            doclen: 0,
            max_len,
            dim,
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub(crate) fn set_doclen(&mut self, doclen: usize) {
        self.doclen = doclen;
    }

    /// Number of real (non-padding) rows.
    pub fn doclen(&self) -> usize {
        self.doclen
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.max_len, self.dim)
    }

    pub fn row(&self, j: usize) -> &[f32] {
        &self.data[j * self.dim..(j + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// `[batch_size, max_len, dim]` tensor, row-major. Slot `k` holds candidate
/// `k`'s rows at the top and zeros below.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBatch {
    data: Vec<f32>,
    doclens: Vec<usize>,
    batch_size: usize,
    max_len: usize,
    dim: usize,
}

impl CandidateBatch {
    pub fn zeroed(batch_size: usize, max_len: usize, dim: usize) -> Self {
        Self {
            data: vec![0.0; batch_size * max_len * dim],
            doclens: vec![0; batch_size],
            batch_size,
            max_len,
            dim,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.batch_size, self.max_len, self.dim)
    }

    fn slot_len(&self) -> usize {
        self.max_len * self.dim
    }

    /// Candidate `k` as a `[max_len * dim]` slice, padding included.
    pub fn slot(&self, k: usize) -> &[f32] {
        let len = self.slot_len();
        &self.data[k * len..(k + 1) * len]
    }

    pub fn slot_mut(&mut self, k: usize) -> &mut [f32] {
        let len = self.slot_len();
        &mut self.data[k * len..(k + 1) * len]
    }

    /// Row `j` of candidate `k`.
    pub fn row(&self, k: usize, j: usize) -> &[f32] {
        let base = k * self.slot_len() + j * self.dim;
        &self.data[base..base + self.dim]
    }

    /// Rows of candidate `k`, padding rows included.
    pub fn rows(&self, k: usize) -> impl Iterator<Item = &[f32]> {
        self.slot(k).chunks_exact(self.dim.max(1))
    }

    /// Real row count recorded for candidate `k` when it was gathered.
    pub fn doclen(&self, k: usize) -> usize {
        self.doclens[k]
    }

    pub(crate) fn set_doclen(&mut self, k: usize, doclen: usize) {
        self.doclens[k] = doclen;
    }

    /// Disjoint `(slot buffer, recorded doclen)` pairs for parallel gather.
    pub(crate) fn par_slots_mut(
        &mut self,
    ) -> impl IndexedParallelIterator<Item = (&mut [f32], &mut usize)> {
        let len = self.slot_len().max(1);
        self.data.par_chunks_mut(len).zip(self.doclens.par_iter_mut())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}
