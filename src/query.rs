//! CLI query commands: search, similar, summary, definition.
//!
//! Each command opens the engine against the published generation, runs one
//! query, and prints a human-readable result list. The engine handle is
//! constructed here and passed down — a long-lived service would construct
//! it once at startup instead.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::engine::{PhenotypeIndex, SearchOptions};

fn open_engine(config: &Config) -> Result<PhenotypeIndex> {
    let embedder = EmbeddingClient::from_config(&config.embedding)?;
    PhenotypeIndex::open(&config.index.dir, embedder)
}

#[allow(clippy::too_many_arguments)]
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    offset: usize,
    dense_k: Option<usize>,
    sparse_k: Option<usize>,
    dense_weight: Option<f64>,
    sparse_weight: Option<f64>,
) -> Result<()> {
    let engine = open_engine(config)?;

    let mut opts = SearchOptions::from_config(&config.retrieval);
    opts.offset = offset;
    if let Some(k) = top_k {
        opts.top_k = k;
    }
    if let Some(k) = dense_k {
        opts.dense_k = k;
    }
    if let Some(k) = sparse_k {
        opts.sparse_k = k;
    }
    if let Some(w) = dense_weight {
        opts.dense_weight = w;
    }
    if let Some(w) = sparse_weight {
        opts.sparse_weight = w;
    }

    let response = engine.search(query, &opts).await;

    let report = &response.modalities;
    let mut used = Vec::new();
    if report.dense_used {
        used.push("dense");
    }
    if report.sparse_used {
        used.push("sparse");
    }
    println!(
        "modalities: {}",
        if used.is_empty() {
            "none".to_string()
        } else {
            used.join("+")
        }
    );
    if report.dense_degraded {
        eprintln!(
            "warning: dense scoring degraded for this request: {}",
            report.dense_error.as_deref().unwrap_or("unknown error")
        );
    }

    if response.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in response.hits.iter().enumerate() {
        let id = hit
            .cohort_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. [{:.4}] {} (cohortId {})",
            offset + i + 1,
            hit.score,
            hit.name,
            id
        );
        if !hit.short_description.is_empty() {
            println!("    {}", hit.short_description);
        }
        if !hit.tags.is_empty() {
            println!("    tags: {}", hit.tags.join(", "));
        }
        if !hit.signals.is_empty() {
            println!("    signals: {}", hit.signals.join(", "));
        }
        let dense = hit
            .score_dense
            .map(|s| format!("{s:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let sparse = hit
            .score_sparse
            .map(|s| format!("{s:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!("    score_dense: {dense}  score_sparse: {sparse}");
        println!();
    }
    Ok(())
}

pub fn run_similar(config: &Config, cohort_id: i64, top_k: usize) -> Result<()> {
    let engine = open_engine(config)?;
    let similar = engine.list_similar(cohort_id, top_k);

    if similar.is_empty() {
        println!("No similar cohorts.");
        return Ok(());
    }
    for (i, hit) in similar.iter().enumerate() {
        let id = hit
            .cohort_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}. [{:.4}] {} (cohortId {})", i + 1, hit.score, hit.name, id);
        if !hit.short_description.is_empty() {
            println!("    {}", hit.short_description);
        }
    }
    Ok(())
}

pub fn run_summary(config: &Config, cohort_id: i64) -> Result<()> {
    let engine = open_engine(config)?;
    match engine.fetch_summary(cohort_id) {
        Some(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        None => bail!("Cohort {} not found", cohort_id),
    }
}

/// Print the full stored definition document for a cohort, if the build
/// carried one into the published generation.
pub fn run_definition(config: &Config, cohort_id: i64) -> Result<()> {
    let Some(paths) = crate::store::resolve_current(&config.index.dir)? else {
        bail!("No index generation has been published");
    };
    let path = paths.definitions().join(format!("{cohort_id}.json"));
    if !path.exists() {
        bail!("No stored definition for cohort {}", cohort_id);
    }
    let content = std::fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
