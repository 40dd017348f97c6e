//! One shard of token embeddings plus its document-length table.
//!
//! A shard buffer is a flat slab of `sum(doclens) × dim` elements, row-major,
//! with document `i` occupying rows `start[i]..end[i]`. Two backends share the
//! same read contract:
//!
//! - [`StorageMode::Mmap`]: the file is memory mapped and rows are read in
//!   place. Lookups return zero-copy views; the first physical copy happens
//!   when a caller materializes the view (normally while gathering a batch).
//! - [`StorageMode::Memory`]: the file is read once and converted to f32 at
//!   load time. Startup cost grows with shard size, lookups never touch disk.
//!
//! # Safety
//!
//! Mapping is inherently unsafe: truncating or rewriting a shard while it is
//! mapped may raise SIGBUS on the next read. Shards are treated as immutable.

use std::fs::File;
use std::path::{Path, PathBuf};

use half::f16;
use memmap2::Mmap;

use crate::error::{IndexError, Result};
use crate::index::precision::{Precision, StorageMode, bytes_as_f16, bytes_as_f32, decode_to_f32};
use crate::index::simd;

const IN_MEMORY_LABEL: &str = "<memory>";

/// Prefix sums over a document-length table: `(start, end)` with `end` exclusive.
pub fn compute_offsets(doclens: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let mut start = Vec::with_capacity(doclens.len());
    let mut end = Vec::with_capacity(doclens.len());
    let mut cursor = 0usize;
    for &len in doclens {
        start.push(cursor);
        cursor += len;
        end.push(cursor);
    }
    (start, end)
}

/// Borrowed rows of one document.
#[derive(Debug, Clone, Copy)]
pub enum Rows<'a> {
    F16(&'a [f16]),
    F32(&'a [f32]),
}

/// Read-only `[doclen, dim]` view of a document's embeddings.
#[derive(Debug, Clone, Copy)]
pub struct DocEmbedding<'a> {
    rows: Rows<'a>,
    doclen: usize,
    dim: usize,
}

impl<'a> DocEmbedding<'a> {
    pub fn len(&self) -> usize {
        self.doclen
    }

    pub fn is_empty(&self) -> bool {
        self.doclen == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> Rows<'a> {
        self.rows
    }

    /// Materialize row `j` as f32.
    pub fn row(&self, j: usize) -> Option<Vec<f32>> {
        if j >= self.doclen {
            return None;
        }
        let range = j * self.dim..(j + 1) * self.dim;
        Some(match self.rows {
            Rows::F16(values) => values[range].iter().map(|v| v.to_f32()).collect(),
            Rows::F32(values) => values[range].to_vec(),
        })
    }

    /// Dot product of row `j` with `query` without materializing the row.
    pub fn dot_row(&self, j: usize, query: &[f32]) -> f32 {
        let range = j * self.dim..(j + 1) * self.dim;
        match self.rows {
            Rows::F16(values) => simd::dot_f16(&values[range], query),
            Rows::F32(values) => simd::dot(&values[range], query),
        }
    }

    /// Copy all rows into the front of `dst` (`dst.len() >= len() * dim()`).
    pub fn copy_into(&self, dst: &mut [f32]) {
        match self.rows {
            Rows::F16(values) => {
                for (d, s) in dst.iter_mut().zip(values) {
                    *d = s.to_f32();
                }
            }
            Rows::F32(values) => dst[..values.len()].copy_from_slice(values),
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = vec![0f32; self.doclen * self.dim];
        self.copy_into(&mut out);
        out
    }
}

#[derive(Debug)]
enum RowStorage {
    Mapped(Mmap),
    Resident(Vec<f32>),
}

/// One shard: a row buffer plus the document-length table that slices it.
#[derive(Debug)]
pub struct PartitionStore {
    path: PathBuf,
    dim: usize,
    precision: Precision,
    mode: StorageMode,
    doclens: Vec<usize>,
    start: Vec<usize>,
    end: Vec<usize>,
    storage: RowStorage,
}

impl PartitionStore {
    /// Open a shard file with the given backend.
    ///
    /// Fails with `IndexCorruption` unless the file is exactly
    /// `sum(doclens) * dim * precision.element_size()` bytes long.
    pub fn open(
        path: &Path,
        doclens: Vec<usize>,
        dim: usize,
        precision: Precision,
        mode: StorageMode,
    ) -> Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(IndexError::config(
                "shard loading is only supported on little-endian targets",
            ));
        }
        if dim == 0 {
            return Err(IndexError::config("embedding dimension must be non-zero"));
        }
        let expected = expected_bytes(path, &doclens, dim, precision)?;

        let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
        let actual = file.metadata().map_err(|e| IndexError::io(path, e))?.len();
        if actual != expected as u64 {
            return Err(IndexError::corruption(
                path,
                format!(
                    "shard size mismatch: {} documents × {} rows × {dim} × {} bytes = {expected} bytes expected, file has {actual}",
                    doclens.len(),
                    doclens.iter().sum::<usize>(),
                    precision.element_size()
                ),
            ));
        }

        let storage = match mode {
            // Zero-length maps are rejected on some platforms; an empty shard
            // has nothing to page in anyway.
            _ if expected == 0 => RowStorage::Resident(Vec::new()),
            StorageMode::Mmap => {
                let mmap = unsafe { Mmap::map(&file).map_err(|e| IndexError::io(path, e))? };
                if mmap.len() != expected {
                    return Err(IndexError::corruption(
                        path,
                        format!("mapped {} bytes, expected {expected}", mmap.len()),
                    ));
                }
                RowStorage::Mapped(mmap)
            }
            StorageMode::Memory => {
                let bytes = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
                if bytes.len() != expected {
                    return Err(IndexError::corruption(
                        path,
                        format!("read {} bytes, expected {expected}", bytes.len()),
                    ));
                }
                RowStorage::Resident(decode_to_f32(&bytes, precision))
            }
        };

        let (start, end) = compute_offsets(&doclens);
        Ok(Self {
            path: path.to_path_buf(),
            dim,
            precision,
            mode,
            doclens,
            start,
            end,
            storage,
        })
    }

    /// Wrap an already materialized f32 buffer.
    pub fn from_f32(values: Vec<f32>, doclens: Vec<usize>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::config("embedding dimension must be non-zero"));
        }
        let label = Path::new(IN_MEMORY_LABEL);
        let expected_elems = expected_bytes(label, &doclens, dim, Precision::F32)? / 4;
        if values.len() != expected_elems {
            return Err(IndexError::corruption(
                label,
                format!(
                    "buffer holds {} values, document lengths require {expected_elems}",
                    values.len()
                ),
            ));
        }
        let (start, end) = compute_offsets(&doclens);
        Ok(Self {
            path: label.to_path_buf(),
            dim,
            precision: Precision::F32,
            mode: StorageMode::Memory,
            doclens,
            start,
            end,
            storage: RowStorage::Resident(values),
        })
    }

    /// Rows of local document `local_id`.
    pub fn get(&self, local_id: usize) -> Result<DocEmbedding<'_>> {
        if local_id >= self.doclens.len() {
            return Err(IndexError::out_of_range(
                "local document id",
                local_id as u64,
                self.doclens.len() as u64,
            ));
        }
        let first = self.start[local_id] * self.dim;
        let last = self.end[local_id] * self.dim;
        let rows = match &self.storage {
            RowStorage::Resident(values) => Rows::F32(&values[first..last]),
            RowStorage::Mapped(mmap) => {
                let size = self.precision.element_size();
                let bytes = &mmap[first * size..last * size];
                match self.precision {
                    Precision::F16 => Rows::F16(bytes_as_f16(bytes).ok_or_else(|| {
                        IndexError::corruption(&self.path, "f16 rows are not aligned")
                    })?),
                    Precision::F32 => Rows::F32(bytes_as_f32(bytes).ok_or_else(|| {
                        IndexError::corruption(&self.path, "f32 rows are not aligned")
                    })?),
                }
            }
        };
        Ok(DocEmbedding {
            rows,
            doclen: self.doclens[local_id],
            dim: self.dim,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn num_documents(&self) -> usize {
        self.doclens.len()
    }

    pub fn num_rows(&self) -> usize {
        self.end.last().copied().unwrap_or(0)
    }

    pub fn doclens(&self) -> &[usize] {
        &self.doclens
    }

    pub fn start_offsets(&self) -> &[usize] {
        &self.start
    }

    pub fn end_offsets(&self) -> &[usize] {
        &self.end
    }

    /// Bytes held on the heap (zero for mapped shards, which live in page cache).
    pub fn resident_bytes(&self) -> usize {
        match &self.storage {
            RowStorage::Mapped(_) => 0,
            RowStorage::Resident(values) => values.len() * std::mem::size_of::<f32>(),
        }
    }
}

fn expected_bytes(path: &Path, doclens: &[usize], dim: usize, precision: Precision) -> Result<usize> {
    let overflow = || IndexError::corruption(path, "declared document lengths overflow usize");
    let mut rows = 0usize;
    for &len in doclens {
        rows = rows.checked_add(len).ok_or_else(overflow)?;
    }
    rows.checked_mul(dim)
        .and_then(|n| n.checked_mul(precision.element_size()))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_shard(path: &Path, values: &[f32], precision: Precision) -> Result<()> {
        let mut file = File::create(path)?;
        for v in values {
            match precision {
                Precision::F16 => file.write_all(&f16::from_f32(*v).to_le_bytes())?,
                Precision::F32 => file.write_all(&v.to_le_bytes())?,
            }
        }
        Ok(())
    }

    fn sample_values(rows: usize, dim: usize) -> Vec<f32> {
        (0..rows * dim).map(|i| i as f32 * 0.5).collect()
    }

    #[test]
    fn offsets_are_prefix_sums() {
        let (start, end) = compute_offsets(&[3, 0, 5]);
        assert_eq!(start, vec![0, 3, 3]);
        assert_eq!(end, vec![3, 3, 8]);
    }

    #[test]
    fn backends_return_identical_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.store");
        let doclens = vec![2, 0, 3];
        let values = sample_values(5, 4);

        for precision in [Precision::F16, Precision::F32] {
            write_shard(&path, &values, precision)?;
            let mapped = PartitionStore::open(&path, doclens.clone(), 4, precision, StorageMode::Mmap)?;
            let memory =
                PartitionStore::open(&path, doclens.clone(), 4, precision, StorageMode::Memory)?;
            assert_eq!(mapped.storage_mode(), StorageMode::Mmap);
            assert_eq!(memory.storage_mode(), StorageMode::Memory);

            for local in 0..doclens.len() {
                let a = mapped.get(local)?;
                let b = memory.get(local)?;
                assert_eq!(a.len(), doclens[local]);
                assert_eq!(a.to_vec(), b.to_vec());
            }
            let third = memory.get(2)?;
            assert_eq!(third.row(0).unwrap(), values[8..12].to_vec());
            assert!(third.row(3).is_none());
        }
        Ok(())
    }

    #[test]
    fn mapped_f16_view_is_zero_copy() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.store");
        write_shard(&path, &sample_values(3, 2), Precision::F16)?;
        let store = PartitionStore::open(&path, vec![1, 2], 2, Precision::F16, StorageMode::Mmap)?;
        assert_eq!(store.resident_bytes(), 0);
        let view = store.get(1)?;
        assert!(matches!(view.rows(), Rows::F16(rows) if rows.len() == 4));
        assert_eq!(view.dot_row(1, &[1.0, 1.0]), 2.0 + 2.5);
        Ok(())
    }

    #[test]
    fn size_mismatch_is_corruption() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.store");
        // One row short of the declared 3 rows.
        write_shard(&path, &sample_values(2, 4), Precision::F16)?;
        for mode in [StorageMode::Mmap, StorageMode::Memory] {
            let err = PartitionStore::open(&path, vec![1, 2], 4, Precision::F16, mode).unwrap_err();
            assert!(err.is_corruption(), "{err}");
        }
        // Declared f32, written f16: half the expected bytes.
        write_shard(&path, &sample_values(3, 4), Precision::F16)?;
        let err =
            PartitionStore::open(&path, vec![3], 4, Precision::F32, StorageMode::Mmap).unwrap_err();
        assert!(err.is_corruption());
        Ok(())
    }

    #[test]
    fn local_id_out_of_range() -> Result<()> {
        let store = PartitionStore::from_f32(sample_values(3, 2), vec![1, 2], 2)?;
        assert!(store.get(1).is_ok());
        let err = store.get(2).unwrap_err();
        assert!(err.is_out_of_range());
        Ok(())
    }

    #[test]
    fn in_memory_buffer_must_match_doclens() {
        let err = PartitionStore::from_f32(vec![0.0; 7], vec![2, 2], 2).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn empty_shard_opens_in_both_modes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("0.store");
        File::create(&path)?;
        for mode in [StorageMode::Mmap, StorageMode::Memory] {
            let store = PartitionStore::open(&path, vec![0, 0], 8, Precision::F16, mode)?;
            assert_eq!(store.num_documents(), 2);
            assert_eq!(store.num_rows(), 0);
            assert!(store.get(1)?.is_empty());
        }
        Ok(())
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PartitionStore::open(
            Path::new("/nonexistent/colstore/0.store"),
            vec![1],
            4,
            Precision::F16,
            StorageMode::Mmap,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }

    #[test]
    fn partition_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PartitionStore>();
    }
}
