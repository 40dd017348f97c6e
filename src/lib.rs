pub mod config;
pub mod error;
pub mod index;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use config::ColbertConfig;
use index::{
    ColbertScorer, GlobalEmbeddingIndex, LoadProgress, Precision, QueryEmbeddings, RerankOptions,
    Scoring, ScoringEngine, StorageMode,
};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "colstore",
    version,
    about = "Inspect and score partitioned late-interaction embedding indexes"
)]
pub struct Cli {
    /// TOML config file (defaults, then file, then COLSTORE_* env, then flags)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shard backend
    #[arg(long, global = true, value_parser = parse_storage)]
    pub storage: Option<StorageMode>,

    /// Shard element precision
    #[arg(long, global = true, value_parser = parse_precision)]
    pub precision: Option<Precision>,

    /// Embedding dimension
    #[arg(long, global = true)]
    pub dim: Option<usize>,

    /// Padding length for candidate batches
    #[arg(long, global = true)]
    pub doc_maxlen: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print partition and document counts as JSON
    Inspect {
        /// Index directory
        index: PathBuf,
    },
    /// Map global document ids to (partition, local id)
    Resolve {
        index: PathBuf,
        #[arg(required = true)]
        pids: Vec<u64>,
    },
    /// Score candidate documents for one encoded query
    Score {
        index: PathBuf,

        /// JSON file: {"embeddings": [[..], ..], "weights": [..]?, "token_ids": [..]?}
        #[arg(long)]
        query: PathBuf,

        /// Candidate global document ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        pids: Vec<u64>,

        /// Sort candidates by id and attach ranks
        #[arg(long, default_value_t = false)]
        rank: bool,

        /// Score with the model's unweighted similarity instead of weighted max-sim (also with --rank)
        #[arg(long, default_value_t = false)]
        delegated: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

fn parse_storage(raw: &str) -> std::result::Result<StorageMode, String> {
    raw.parse().map_err(|e: error::IndexError| e.to_string())
}

fn parse_precision(raw: &str) -> std::result::Result<Precision, String> {
    raw.parse().map_err(|e: error::IndexError| e.to_string())
}

#[derive(Debug, Deserialize)]
struct QueryFile {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    weights: Option<Vec<f32>>,
    #[serde(default)]
    token_ids: Option<Vec<u32>>,
}

#[derive(Debug, Serialize)]
struct PartitionReport {
    path: PathBuf,
    documents: usize,
    rows: usize,
    first_pid: u64,
    last_pid: u64,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    dim: usize,
    precision: Precision,
    storage: StorageMode,
    documents: u64,
    resident_bytes: usize,
    partitions: Vec<PartitionReport>,
}

#[derive(Debug, Serialize)]
struct Resolution {
    pid: u64,
    partition: usize,
    local_id: usize,
    doclen: usize,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Inspect { index } => {
            let index = load_index(&index, &config)?;
            let partitions = index
                .partitions()
                .iter()
                .enumerate()
                .map(|(i, part)| PartitionReport {
                    path: part.path().to_path_buf(),
                    documents: part.num_documents(),
                    rows: part.num_rows(),
                    first_pid: index.partition_begin()[i],
                    last_pid: index.partition_end()[i],
                })
                .collect();
            print_json(&InspectReport {
                dim: index.dim(),
                precision: index.precision(),
                storage: index.storage_mode(),
                documents: index.num_documents(),
                resident_bytes: index.resident_bytes(),
                partitions,
            })
        }
        Commands::Resolve { index, pids } => {
            let index = load_index(&index, &config)?;
            let resolved = pids
                .iter()
                .map(|&pid| {
                    let (partition, local_id) = index.resolve(pid)?;
                    Ok(Resolution {
                        pid,
                        partition,
                        local_id,
                        doclen: index.doclen(pid)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            print_json(&resolved)
        }
        Commands::Score {
            index,
            query,
            pids,
            rank,
            delegated,
        } => {
            let index = Arc::new(load_index(&index, &config)?);
            let engine = ScoringEngine::new(index, &config)?
                .with_scorer(Arc::new(ColbertScorer::new(config.similarity)));
            let query = read_query(&query)?;
            if rank {
                let options = RerankOptions {
                    scoring: if delegated {
                        Scoring::Delegated
                    } else {
                        Scoring::WeightedMaxSim
                    },
                    ..RerankOptions::default()
                };
                print_json(&engine.rerank(&query, &pids, options)?)
            } else if delegated {
                print_json(&engine.score_by_id(&query, &pids)?)
            } else {
                print_json(&engine.score_by_id_with_weights(&query, &pids, None)?)
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "colstore", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<ColbertConfig> {
    let mut config = match &cli.config {
        Some(path) => ColbertConfig::from_toml_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ColbertConfig::default(),
    };
    config.apply_env();
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    if let Some(precision) = cli.precision {
        config.precision = precision;
    }
    if let Some(dim) = cli.dim {
        config.dim = dim;
    }
    if let Some(doc_maxlen) = cli.doc_maxlen {
        config.doc_maxlen = doc_maxlen;
    }
    config.validate()?;
    Ok(config)
}

fn load_index(path: &Path, config: &ColbertConfig) -> Result<GlobalEmbeddingIndex> {
    let progress = if config.storage == StorageMode::Memory {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("Loading index shards to memory {bar:40.cyan/blue} {pos}/{len} {msg}")
                .context("progress template")?
                .progress_chars("██░"),
        );
        Some(pb)
    } else {
        None
    };

    let result = GlobalEmbeddingIndex::load(path, config, |p: LoadProgress| {
        if let Some(pb) = &progress {
            pb.set_length(p.total as u64);
            pb.set_position(p.loaded as u64);
            pb.set_message(format!("{} docs", p.documents));
        }
    });
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    result.with_context(|| format!("load index {}", path.display()))
}

fn read_query(path: &Path) -> Result<QueryEmbeddings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read query file {}", path.display()))?;
    let file: QueryFile = serde_json::from_str(&raw).context("parse query file")?;
    let mut query = QueryEmbeddings::from_rows(file.embeddings)?;
    if let Some(weights) = file.weights {
        query = query.with_weights(weights)?;
    }
    if let Some(ids) = file.token_ids {
        query = query.with_token_ids(ids)?;
    }
    Ok(query)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
