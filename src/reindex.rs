//! End-to-end index build: raw records → published generation.
//!
//! This is the only writer of index artifacts. The sequence is: load raw
//! records, load optional definitions (skipping unreadable ones), build
//! catalog rows, write the catalog in doc-id order, build and persist the
//! sparse index, optionally build and persist the dense index and embedding
//! cache, write the manifest, then publish the generation. Everything lands
//! in a fresh generation directory; a live reader never sees partial output.
//!
//! The build runs as one logical task. The only network traffic is one
//! awaited embedding call per batch, so the batch size bounds both request
//! payload and memory.

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::catalog::{build_catalog_row, load_definitions, load_metadata, parse_int};
use crate::config::Config;
use crate::dense::{FlatIpIndex, VectorIndex};
use crate::embedding::{embedding_text, l2_normalize, EmbeddingCache, EmbeddingClient};
use crate::models::{CatalogRow, DenseStatus, Manifest, SparseStats};
use crate::sparse::SparseIndex;
use crate::store;
use crate::text::hash_text;

/// Build entry-point parameters (CLI flags, not config).
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub metadata_csv: PathBuf,
    pub definitions_dir: Option<PathBuf>,
    /// Index root; defaults to `index.dir` from config.
    pub output_dir: PathBuf,
    pub build_dense: bool,
    pub require_dense: bool,
    pub batch_size: usize,
}

pub async fn run_build(config: &Config, params: &BuildParams) -> Result<()> {
    let records = load_metadata(&params.metadata_csv)?;
    let definitions = load_definitions(params.definitions_dir.as_deref());

    let mut catalog: Vec<CatalogRow> = records
        .iter()
        .map(|meta| {
            let cohort_id = meta.get("cohortId").and_then(parse_int);
            let definition = cohort_id.and_then(|id| definitions.get(&id));
            build_catalog_row(meta, definition)
        })
        .collect();

    let generation = store::create_generation(&params.output_dir)?;

    // A build that fails past this point must not leave its half-filled
    // generation directory behind.
    match fill_and_publish(config, params, &mut catalog, &definitions, &generation).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_dir_all(generation.root());
            Err(e)
        }
    }
}

async fn fill_and_publish(
    config: &Config,
    params: &BuildParams,
    catalog: &mut [CatalogRow],
    definitions: &HashMap<i64, Value>,
    generation: &store::ArtifactPaths,
) -> Result<()> {
    // Carry the full definition documents into the generation so summaries
    // can be expanded to complete definitions later.
    if !definitions.is_empty() {
        let def_dir = generation.definitions();
        std::fs::create_dir_all(&def_dir)
            .with_context(|| format!("Failed to create: {}", def_dir.display()))?;
        for (cohort_id, data) in definitions {
            let path = def_dir.join(format!("{cohort_id}.json"));
            let json = serde_json::to_string(data)?;
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write definition: {}", path.display()))?;
        }
    }

    store::write_catalog(&generation.catalog(), &*catalog)?;

    let sparse = SparseIndex::build(&*catalog, config.bm25.k1, config.bm25.b);
    sparse.save(&generation.sparse())?;

    let dense_status = if params.build_dense {
        match EmbeddingClient::from_config(&config.embedding)? {
            Some(client) => {
                // The cache from the previous generation keeps unchanged
                // texts from re-embedding.
                let mut cache = match store::resolve_current(&params.output_dir)? {
                    Some(previous) => EmbeddingCache::load(&previous.embedding_cache()),
                    None => EmbeddingCache::new(),
                };
                build_dense_index(
                    &mut *catalog,
                    &client,
                    &mut cache,
                    generation,
                    params.batch_size,
                )
                .await?
            }
            None => {
                if params.require_dense {
                    bail!("Dense index required but embedding provider is disabled");
                }
                DenseStatus::skipped("embedding_disabled")
            }
        }
    } else {
        DenseStatus::skipped("dense_not_requested")
    };

    let manifest = Manifest {
        built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        catalog_count: catalog.len(),
        dense: dense_status.clone(),
        sparse: SparseStats {
            doc_count: catalog.len(),
            k1: sparse.k1,
            b: sparse.b,
        },
        embedding_model: config.embedding.model.clone(),
        embedding_url: config.embedding.url.clone(),
    };
    store::write_manifest(&generation.meta(), &manifest)?;

    store::publish_generation(&params.output_dir, generation)?;

    println!("build complete");
    println!("  generation: {}", generation.root().display());
    println!("  catalog rows: {}", catalog.len());
    println!("  sparse terms: {}", sparse.postings.len());
    match dense_status.status.as_str() {
        "ok" => println!(
            "  dense: ok (dim {}, {} vectors)",
            dense_status.dim.unwrap_or(0),
            dense_status.count.unwrap_or(0)
        ),
        _ => println!(
            "  dense: {} ({})",
            dense_status.status,
            dense_status.reason.as_deref().unwrap_or("")
        ),
    }
    Ok(())
}

/// Fill each row's embedding text and hash, returning the texts that still
/// need an embedding call.
fn pending_texts(catalog: &mut [CatalogRow], cache: &EmbeddingCache) -> Vec<String> {
    let mut pending = Vec::new();
    for row in catalog.iter_mut() {
        let text = embedding_text(row);
        let hash = hash_text(&text);
        if !cache.contains(&hash) {
            pending.push(text.clone());
        }
        row.text_for_embedding = Some(text);
        row.text_for_embedding_hash = Some(hash);
    }
    pending
}

/// Assemble the normalized dense matrix strictly in catalog doc-id order.
fn assemble_matrix(catalog: &[CatalogRow], cache: &EmbeddingCache) -> Result<Vec<Vec<f32>>> {
    let mut matrix = Vec::with_capacity(catalog.len());
    for row in catalog {
        let hash = row
            .text_for_embedding_hash
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Row missing embedding hash"))?;
        let vector = cache.get(hash).ok_or_else(|| {
            anyhow::anyhow!(
                "Missing embedding for cohortId {:?}",
                row.cohort_id
            )
        })?;
        let mut vector = vector.clone();
        l2_normalize(&mut vector);
        matrix.push(vector);
    }
    Ok(matrix)
}

async fn build_dense_index(
    catalog: &mut [CatalogRow],
    client: &EmbeddingClient,
    cache: &mut EmbeddingCache,
    generation: &store::ArtifactPaths,
    batch_size: usize,
) -> Result<DenseStatus> {
    if catalog.is_empty() {
        return Ok(DenseStatus::skipped("empty_catalog"));
    }
    if batch_size == 0 {
        bail!("Embedding batch size must be > 0");
    }

    let pending = pending_texts(catalog, cache);
    if !pending.is_empty() {
        println!(
            "  embedding {} texts ({} cached)",
            pending.len(),
            catalog.len() - pending.len()
        );
    }
    for batch in pending.chunks(batch_size) {
        let vectors = client.embed_texts(batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding batch size mismatch: sent {}, received {}",
                batch.len(),
                vectors.len()
            );
        }
        for (text, vector) in batch.iter().zip(vectors) {
            cache.insert(text, vector);
        }
    }

    let matrix = assemble_matrix(catalog, cache)?;
    let dim = matrix[0].len();
    if matrix.iter().any(|v| v.len() != dim) {
        bail!("Embedding dimension is not uniform across the catalog");
    }

    let mut index = FlatIpIndex::new(dim);
    for vector in &matrix {
        index.add(vector)?;
    }
    index.save(&generation.dense())?;
    cache.save(&generation.embedding_cache())?;

    Ok(DenseStatus::ok(dim, matrix.len()))
}
