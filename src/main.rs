//! # Phenotype Index CLI (`phx`)
//!
//! Build and query the phenotype cohort retrieval index.
//!
//! ```bash
//! # Build a sparse-only index generation
//! phx --config ./config/phx.toml build --metadata-csv cohorts.csv
//!
//! # Build with dense vectors (requires an embedding provider in config)
//! phx build --metadata-csv cohorts.csv --definitions-dir defs/ --build-dense
//!
//! # Query
//! phx search "incident atrial fibrillation"
//! phx similar 1234
//! phx summary 1234
//! phx definition 1234
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phenotype_index::config::load_config;
use phenotype_index::query;
use phenotype_index::reindex::{run_build, BuildParams};

/// Phenotype Index — hybrid lexical + semantic retrieval over a phenotype
/// cohort catalog.
#[derive(Parser)]
#[command(
    name = "phx",
    about = "Phenotype Index — hybrid BM25 + embedding retrieval over a cohort catalog",
    version,
    long_about = "Builds an immutable on-disk index generation (catalog, BM25 inverted index, \
    dense vector index, embedding cache, manifest) from raw cohort records, and serves hybrid \
    search, similarity, and summary lookups against the published generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/phx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a new index generation and publish it atomically.
    ///
    /// Writes all artifacts into a fresh generation directory, then flips
    /// the CURRENT pointer. Readers with an older generation open are never
    /// disturbed.
    Build {
        /// Path to the raw cohort metadata CSV.
        #[arg(long)]
        metadata_csv: PathBuf,

        /// Directory of full cohort definition JSON files (one per id).
        #[arg(long)]
        definitions_dir: Option<PathBuf>,

        /// Index root directory. Defaults to `index.dir` from config.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Also build the dense vector index (needs an embedding provider).
        #[arg(long)]
        build_dense: bool,

        /// Fail the whole build if the dense index cannot be built.
        #[arg(long)]
        require_dense: bool,

        /// Embedding batch size. Defaults to `embedding.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Search the catalog with the hybrid dense + sparse ranking.
    Search {
        /// The free-text study description or query.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Positional offset into the merged ranking (pagination).
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Dense candidate cutoff before the merge.
        #[arg(long)]
        dense_k: Option<usize>,

        /// Sparse candidate cutoff before the merge.
        #[arg(long)]
        sparse_k: Option<usize>,

        /// Weight applied to dense scores in the merge.
        #[arg(long)]
        dense_weight: Option<f64>,

        /// Weight applied to sparse scores in the merge.
        #[arg(long)]
        sparse_weight: Option<f64>,
    },

    /// List cohorts most similar to a stored cohort by dense similarity.
    Similar {
        /// Cohort identifier.
        id: i64,

        /// Number of neighbors to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Print the summary projection for a cohort.
    Summary {
        /// Cohort identifier.
        id: i64,
    },

    /// Print the full stored definition document for a cohort.
    Definition {
        /// Cohort identifier.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            metadata_csv,
            definitions_dir,
            output_dir,
            build_dense,
            require_dense,
            batch_size,
        } => {
            let params = BuildParams {
                metadata_csv,
                definitions_dir,
                output_dir: output_dir.unwrap_or_else(|| config.index.dir.clone()),
                build_dense,
                require_dense,
                batch_size: batch_size.unwrap_or(config.embedding.batch_size),
            };
            run_build(&config, &params).await
        }
        Commands::Search {
            query,
            top_k,
            offset,
            dense_k,
            sparse_k,
            dense_weight,
            sparse_weight,
        } => {
            query::run_search(
                &config,
                &query,
                top_k,
                offset,
                dense_k,
                sparse_k,
                dense_weight,
                sparse_weight,
            )
            .await
        }
        Commands::Similar { id, top_k } => query::run_similar(&config, id, top_k),
        Commands::Summary { id } => query::run_summary(&config, id),
        Commands::Definition { id } => query::run_definition(&config, id),
    }
}
