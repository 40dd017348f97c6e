//! Shard discovery for a ColBERT-style index directory.
//!
//! Layout (one pair per shard, `i` = 0, 1, 2, ...):
//!
//! ```text
//! <index>/doclens.{i}.json   JSON array: token rows per local document
//! <index>/{i}.store          flat row buffer for those documents
//! ```
//!
//! Shards are ordered by the numeric suffix, so `doclens.10.json` sorts after
//! `doclens.9.json`. That order is the partition order and therefore defines
//! global document ids.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

pub const DOCLENS_PREFIX: &str = "doclens.";
pub const DOCLENS_SUFFIX: &str = ".json";
pub const STORE_EXTENSION: &str = "store";

pub fn doclens_path(index_path: &Path, shard: usize) -> PathBuf {
    index_path.join(format!("{DOCLENS_PREFIX}{shard}{DOCLENS_SUFFIX}"))
}

pub fn store_path(index_path: &Path, shard: usize) -> PathBuf {
    index_path.join(format!("{shard}.{STORE_EXTENSION}"))
}

/// One shard's buffer location and document-length table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub index: usize,
    pub store_path: PathBuf,
    pub doclens: Vec<usize>,
}

impl ShardDescriptor {
    pub fn num_documents(&self) -> usize {
        self.doclens.len()
    }

    pub fn num_rows(&self) -> usize {
        self.doclens.iter().sum()
    }
}

/// Ordered shard listing for one index directory.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    root: PathBuf,
    shards: Vec<ShardDescriptor>,
}

impl ShardLayout {
    pub fn discover(index_path: &Path) -> Result<Self> {
        let entries =
            std::fs::read_dir(index_path).map_err(|e| IndexError::io(index_path, e))?;

        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IndexError::io(index_path, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(n) = parse_doclens_name(name) {
                numbers.push(n);
            }
        }
        if numbers.is_empty() {
            return Err(IndexError::config(format!(
                "no shards found at {}",
                index_path.display()
            )));
        }
        numbers.sort_unstable();

        let mut shards = Vec::with_capacity(numbers.len());
        for (expected, &n) in numbers.iter().enumerate() {
            if n != expected {
                return Err(IndexError::config(format!(
                    "shard numbering has a gap at {} (found {DOCLENS_PREFIX}{n}{DOCLENS_SUFFIX})",
                    index_path.join(format!("{DOCLENS_PREFIX}{expected}{DOCLENS_SUFFIX}")).display()
                )));
            }
            let store = store_path(index_path, n);
            if !store.is_file() {
                return Err(IndexError::config(format!(
                    "missing shard buffer {}",
                    store.display()
                )));
            }
            shards.push(ShardDescriptor {
                index: n,
                store_path: store,
                doclens: read_doclens(&doclens_path(index_path, n))?,
            });
        }

        Ok(Self {
            root: index_path.to_path_buf(),
            shards,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    pub fn into_shards(self) -> Vec<ShardDescriptor> {
        self.shards
    }

    pub fn num_documents(&self) -> usize {
        self.shards.iter().map(ShardDescriptor::num_documents).sum()
    }

    pub fn total_rows(&self) -> usize {
        self.shards.iter().map(ShardDescriptor::num_rows).sum()
    }
}

/// Per-shard length tables (in shard order), or all of them concatenated.
pub enum Doclens {
    PerShard(Vec<Vec<usize>>),
    Flat(Vec<usize>),
}

pub fn load_doclens(index_path: &Path, flatten: bool) -> Result<Doclens> {
    let tables: Vec<Vec<usize>> = ShardLayout::discover(index_path)?
        .into_shards()
        .into_iter()
        .map(|s| s.doclens)
        .collect();
    Ok(if flatten {
        Doclens::Flat(tables.into_iter().flatten().collect())
    } else {
        Doclens::PerShard(tables)
    })
}

fn parse_doclens_name(name: &str) -> Option<usize> {
    name.strip_prefix(DOCLENS_PREFIX)?
        .strip_suffix(DOCLENS_SUFFIX)?
        .parse()
        .ok()
}

fn read_doclens(path: &Path) -> Result<Vec<usize>> {
    let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| IndexError::corruption(path, format!("invalid document-length table: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn touch_shard(root: &Path, n: usize, doclens: &str) -> Result<()> {
        std::fs::write(doclens_path(root, n), doclens)?;
        std::fs::write(store_path(root, n), b"")?;
        Ok(())
    }

    #[test]
    fn shards_are_ordered_numerically() -> Result<()> {
        let dir = tempdir()?;
        for n in 0..12 {
            touch_shard(dir.path(), n, &format!("[{n}, 1]"))?;
        }
        let layout = ShardLayout::discover(dir.path())?;
        let order: Vec<usize> = layout.shards().iter().map(|s| s.index).collect();
        assert_eq!(order, (0..12).collect::<Vec<_>>());
        assert_eq!(layout.shards()[10].doclens, vec![10, 1]);
        assert!(layout.shards()[10].store_path.ends_with("10.store"));
        assert_eq!(layout.num_documents(), 24);
        Ok(())
    }

    #[test]
    fn empty_directory_is_configuration_error() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("metadata.json"), "{}")?;
        let err = ShardLayout::discover(dir.path()).unwrap_err();
        assert!(err.is_configuration(), "{err}");
        Ok(())
    }

    #[test]
    fn gap_and_missing_store_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        touch_shard(dir.path(), 0, "[1]")?;
        touch_shard(dir.path(), 2, "[1]")?;
        assert!(ShardLayout::discover(dir.path()).unwrap_err().is_configuration());

        let dir = tempdir()?;
        std::fs::write(doclens_path(dir.path(), 0), "[1]")?;
        assert!(ShardLayout::discover(dir.path()).unwrap_err().is_configuration());
        Ok(())
    }

    #[test]
    fn malformed_doclens_is_corruption() -> Result<()> {
        let dir = tempdir()?;
        touch_shard(dir.path(), 0, "[1, -2]")?;
        assert!(ShardLayout::discover(dir.path()).unwrap_err().is_corruption());
        Ok(())
    }

    #[test]
    fn flattened_doclens_preserve_shard_order() -> Result<()> {
        let dir = tempdir()?;
        touch_shard(dir.path(), 0, "[3, 0]")?;
        touch_shard(dir.path(), 1, "[5]")?;
        match load_doclens(dir.path(), true)? {
            Doclens::Flat(all) => assert_eq!(all, vec![3, 0, 5]),
            Doclens::PerShard(_) => panic!("expected flat doclens"),
        }
        match load_doclens(dir.path(), false)? {
            Doclens::PerShard(tables) => assert_eq!(tables, vec![vec![3, 0], vec![5]]),
            Doclens::Flat(_) => panic!("expected per-shard doclens"),
        }
        Ok(())
    }
}
