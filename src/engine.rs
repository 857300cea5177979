//! Hybrid query engine: loads one published index generation and serves
//! `search`, `list_similar`, and `fetch_summary`.
//!
//! The engine is an explicit handle constructed once (for a service, at
//! startup) and passed to callers — there is no hidden process-wide
//! singleton. All state is immutable after [`PhenotypeIndex::open`], so any
//! number of concurrent readers may share one engine without locking. Which
//! modalities are available is resolved once at open time and exposed as
//! capability flags rather than probed per call.
//!
//! The hybrid merge is truncate-then-combine: each modality is truncated to
//! its own candidate cutoff first, and only the union of the two truncated
//! sets is merged and ranked. A doc that would score well over the full
//! corpus but misses both cutoffs never appears — a deliberate cost/recall
//! trade-off.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

use crate::dense::{FlatIpIndex, VectorIndex};
use crate::embedding::{l2_normalize, EmbeddingClient};
use crate::models::{
    CatalogRow, Manifest, ModalityReport, SearchHit, SearchResponse, SimilarHit, Summary,
};
use crate::sparse::SparseIndex;
use crate::store::{self, ArtifactPaths};

/// Per-request search knobs. Defaults mirror the config defaults.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub offset: usize,
    pub dense_k: usize,
    pub sparse_k: usize,
    pub dense_weight: f64,
    pub sparse_weight: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            offset: 0,
            dense_k: 100,
            sparse_k: 100,
            dense_weight: 0.9,
            sparse_weight: 0.1,
        }
    }
}

impl SearchOptions {
    pub fn from_config(retrieval: &crate::config::RetrievalConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            offset: 0,
            dense_k: retrieval.dense_k,
            sparse_k: retrieval.sparse_k,
            dense_weight: retrieval.dense_weight,
            sparse_weight: retrieval.sparse_weight,
        }
    }
}

/// Read-only handle over one published index generation.
pub struct PhenotypeIndex {
    catalog: Vec<CatalogRow>,
    /// cohort id → doc id; the later row wins on duplicate ids.
    by_id: HashMap<i64, usize>,
    sparse: Option<SparseIndex>,
    dense: Option<Box<dyn VectorIndex>>,
    manifest: Option<Manifest>,
    embedder: Option<EmbeddingClient>,
}

impl PhenotypeIndex {
    /// Open the generation named by the index directory's `CURRENT` pointer.
    ///
    /// No published generation yields an empty engine (every query returns
    /// empty); a missing sparse or dense artifact just leaves that modality
    /// unavailable. A dense artifact that exists but cannot be loaded is
    /// reported and treated as unavailable rather than failing the open.
    pub fn open(index_dir: &Path, embedder: Option<EmbeddingClient>) -> Result<Self> {
        match store::resolve_current(index_dir)? {
            Some(paths) => Self::open_generation(&paths, embedder),
            None => Ok(Self::empty(embedder)),
        }
    }

    fn empty(embedder: Option<EmbeddingClient>) -> Self {
        Self {
            catalog: Vec::new(),
            by_id: HashMap::new(),
            sparse: None,
            dense: None,
            manifest: None,
            embedder,
        }
    }

    fn open_generation(paths: &ArtifactPaths, embedder: Option<EmbeddingClient>) -> Result<Self> {
        let catalog = store::load_catalog(&paths.catalog())?;

        let mut by_id = HashMap::new();
        for (doc_id, row) in catalog.iter().enumerate() {
            if let Some(id) = row.cohort_id {
                by_id.insert(id, doc_id);
            }
        }

        let sparse_path = paths.sparse();
        let sparse = if sparse_path.exists() {
            Some(SparseIndex::load(&sparse_path)?)
        } else {
            None
        };

        let dense_path = paths.dense();
        let dense: Option<Box<dyn VectorIndex>> = if dense_path.exists() {
            match FlatIpIndex::load(&dense_path) {
                Ok(index) => Some(Box::new(index)),
                Err(e) => {
                    eprintln!("warning: dense index unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let manifest = store::load_manifest(&paths.meta())?;

        Ok(Self {
            catalog,
            by_id,
            sparse,
            dense,
            manifest,
            embedder,
        })
    }

    /// Capability flag: a dense index is loaded and a query embedder is
    /// configured.
    pub fn dense_available(&self) -> bool {
        self.dense.is_some() && self.embedder.is_some()
    }

    /// Capability flag: a sparse index is loaded.
    pub fn sparse_available(&self) -> bool {
        self.sparse.is_some()
    }

    pub fn catalog(&self) -> &[CatalogRow] {
        &self.catalog
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Hybrid search over the merged dense + sparse rankings.
    ///
    /// An empty query returns an empty response without issuing any
    /// sub-query. A query-time embedding failure degrades the request to
    /// sparse-only scoring and is surfaced in the modality report instead of
    /// failing the call.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> SearchResponse {
        let mut report = ModalityReport::default();
        if query.is_empty() {
            return SearchResponse {
                hits: Vec::new(),
                modalities: report,
            };
        }

        let mut dense_scores: HashMap<u32, f64> = HashMap::new();
        if let (Some(dense), Some(embedder)) = (self.dense.as_ref(), self.embedder.as_ref()) {
            match embedder.embed_query(query).await {
                Ok(mut vector) => {
                    l2_normalize(&mut vector);
                    for (doc_id, score) in dense.search(&vector, opts.dense_k) {
                        dense_scores.insert(doc_id, score as f64);
                    }
                    report.dense_used = true;
                }
                Err(e) => {
                    report.dense_degraded = true;
                    report.dense_error = Some(format!("{e:#}"));
                }
            }
        }

        let mut sparse_scores: HashMap<u32, f64> = HashMap::new();
        if let Some(sparse) = self.sparse.as_ref() {
            for (doc_id, score) in sparse.search(query, opts.sparse_k) {
                sparse_scores.insert(doc_id, score);
            }
            report.sparse_used = true;
        }

        let ranked = merge_scores(
            &dense_scores,
            &sparse_scores,
            opts.dense_weight,
            opts.sparse_weight,
        );

        let hits = ranked
            .into_iter()
            .skip(opts.offset)
            .take(opts.top_k)
            .filter_map(|(doc_id, score)| {
                let row = self.catalog.get(doc_id as usize)?;
                Some(SearchHit {
                    cohort_id: row.cohort_id,
                    name: row.name.clone(),
                    short_description: row.short_description.clone(),
                    tags: row.tags.clone(),
                    signals: row.signals.clone(),
                    score,
                    score_dense: dense_scores.get(&doc_id).copied(),
                    score_sparse: sparse_scores.get(&doc_id).copied(),
                })
            })
            .collect();

        SearchResponse {
            hits,
            modalities: report,
        }
    }

    /// Nearest neighbors of a stored cohort by dense similarity.
    ///
    /// Returns empty when no dense index is loaded, the id is unknown, or
    /// the stored vector cannot be reconstructed. The queried cohort itself
    /// is dropped wherever it lands in the neighbor list.
    pub fn list_similar(&self, cohort_id: i64, top_k: usize) -> Vec<SimilarHit> {
        let Some(dense) = self.dense.as_ref() else {
            return Vec::new();
        };
        // First match wins, mirroring catalog order.
        let Some(doc_id) = self
            .catalog
            .iter()
            .position(|row| row.cohort_id == Some(cohort_id))
        else {
            return Vec::new();
        };
        let Some(vector) = dense.reconstruct(doc_id as u32) else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for (idx, score) in dense.search(&vector, top_k + 1) {
            if idx as usize == doc_id {
                continue;
            }
            let Some(row) = self.catalog.get(idx as usize) else {
                continue;
            };
            results.push(SimilarHit {
                cohort_id: row.cohort_id,
                name: row.name.clone(),
                short_description: row.short_description.clone(),
                score: score as f64,
            });
            if results.len() >= top_k {
                break;
            }
        }
        results
    }

    /// O(1) summary lookup via the id reverse map.
    pub fn fetch_summary(&self, cohort_id: i64) -> Option<Summary> {
        let doc_id = *self.by_id.get(&cohort_id)?;
        let row = &self.catalog[doc_id];
        Some(Summary {
            cohort_id: row.cohort_id,
            name: row.name.clone(),
            short_description: row.short_description.clone(),
            tags: row.tags.clone(),
            signals: row.signals.clone(),
            ontology_keys: row.ontology_keys.clone(),
            logic_features: row.logic_features.clone(),
        })
    }
}

/// Weighted merge over the union of two already-truncated score maps.
///
/// `merged(doc) = dense_weight·dense(doc) + sparse_weight·sparse(doc)` with
/// a missing per-modality score contributing 0 to the sum only. Descending
/// by score, ties ascending by doc id.
fn merge_scores(
    dense: &HashMap<u32, f64>,
    sparse: &HashMap<u32, f64>,
    dense_weight: f64,
    sparse_weight: f64,
) -> Vec<(u32, f64)> {
    let mut merged: HashMap<u32, f64> = HashMap::new();
    for (&doc_id, &score) in dense {
        *merged.entry(doc_id).or_insert(0.0) += dense_weight * score;
    }
    for (&doc_id, &score) in sparse {
        *merged.entry(doc_id).or_insert(0.0) += sparse_weight * score;
    }
    let mut ranked: Vec<(u32, f64)> = merged.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::FlatIpIndex;

    fn row(id: i64, name: &str, description: &str) -> CatalogRow {
        CatalogRow {
            cohort_id: Some(id),
            name: name.to_string(),
            short_description: description.to_string(),
            ..Default::default()
        }
    }

    fn sparse_engine(catalog: Vec<CatalogRow>) -> PhenotypeIndex {
        let sparse = SparseIndex::build(&catalog, 1.5, 0.75);
        let mut by_id = HashMap::new();
        for (doc_id, r) in catalog.iter().enumerate() {
            if let Some(id) = r.cohort_id {
                by_id.insert(id, doc_id);
            }
        }
        PhenotypeIndex {
            catalog,
            by_id,
            sparse: Some(sparse),
            dense: None,
            manifest: None,
            embedder: None,
        }
    }

    fn abc_catalog() -> Vec<CatalogRow> {
        vec![
            row(1, "Alpha", "first entry"),
            row(2, "Beta", "second entry"),
            row(3, "Gamma", "third entry"),
        ]
    }

    #[tokio::test]
    async fn test_sparse_only_single_hit_scenario() {
        let engine = sparse_engine(abc_catalog());
        let opts = SearchOptions {
            top_k: 5,
            ..Default::default()
        };
        let response = engine.search("alpha", &opts).await;
        assert_eq!(response.hits.len(), 1);
        let hit = &response.hits[0];
        assert_eq!(hit.cohort_id, Some(1));
        assert!(hit.score > 0.0);
        assert!(hit.score_dense.is_none());
        let sparse_score = hit.score_sparse.expect("sparse score must be present");
        assert!((hit.score - 0.1 * sparse_score).abs() < 1e-12);
        assert!(response.modalities.sparse_used);
        assert!(!response.modalities.dense_used);
        assert!(!response.modalities.dense_degraded);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let engine = sparse_engine(abc_catalog());
        let response = engine.search("", &SearchOptions::default()).await;
        assert!(response.hits.is_empty());
        assert!(!response.modalities.sparse_used);
        assert!(!response.modalities.dense_used);
    }

    #[tokio::test]
    async fn test_pagination_no_overlap() {
        // 12 synthetic rows ranked purely by sparse score: row i repeats the
        // query term i+1 times, so higher ids rank first.
        let catalog: Vec<CatalogRow> = (0..12)
            .map(|i| {
                let repeats = vec!["signal"; i + 1].join(" ");
                row(100 + i as i64, &format!("Cohort {i}"), &repeats)
            })
            .collect();
        let engine = sparse_engine(catalog);

        let page1 = engine
            .search(
                "signal",
                &SearchOptions {
                    top_k: 5,
                    offset: 0,
                    ..Default::default()
                },
            )
            .await;
        let page2 = engine
            .search(
                "signal",
                &SearchOptions {
                    top_k: 5,
                    offset: 5,
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(page1.hits.len(), 5);
        assert_eq!(page2.hits.len(), 5);
        let ids1: Vec<_> = page1.hits.iter().map(|h| h.cohort_id).collect();
        let ids2: Vec<_> = page2.hits.iter().map(|h| h.cohort_id).collect();
        for id in &ids2 {
            assert!(!ids1.contains(id), "pages must not overlap");
        }
        // Page 2 continues the same merged ranking (ranks 6-10).
        let full = engine
            .search(
                "signal",
                &SearchOptions {
                    top_k: 10,
                    offset: 0,
                    ..Default::default()
                },
            )
            .await;
        let full_ids: Vec<_> = full.hits.iter().map(|h| h.cohort_id).collect();
        assert_eq!(&full_ids[0..5], &ids1[..]);
        assert_eq!(&full_ids[5..10], &ids2[..]);
    }

    #[tokio::test]
    async fn test_truncated_sparse_set_excludes_tail() {
        // Both docs match, but sparse_k = 1 truncates before the merge;
        // the weaker doc must not reappear in the merged ranking.
        let catalog = vec![
            row(1, "pain pain pain", "strong match"),
            row(2, "pain", "weak match"),
        ];
        let engine = sparse_engine(catalog);
        let response = engine
            .search(
                "pain",
                &SearchOptions {
                    top_k: 10,
                    sparse_k: 1,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].cohort_id, Some(1));
    }

    #[test]
    fn test_merge_formula_exact() {
        let dense: HashMap<u32, f64> = [(0, 0.8), (1, 0.5)].into_iter().collect();
        let sparse: HashMap<u32, f64> = [(1, 2.0), (2, 3.0)].into_iter().collect();
        let ranked = merge_scores(&dense, &sparse, 0.9, 0.1);

        let scores: HashMap<u32, f64> = ranked.iter().copied().collect();
        assert_eq!(scores.len(), 3);
        assert!((scores[&0] - 0.9 * 0.8).abs() < 1e-12);
        assert!((scores[&1] - (0.9 * 0.5 + 0.1 * 2.0)).abs() < 1e-12);
        assert!((scores[&2] - 0.1 * 3.0).abs() < 1e-12);
        // Descending order.
        assert!(ranked[0].1 >= ranked[1].1 && ranked[1].1 >= ranked[2].1);
    }

    #[test]
    fn test_merge_ties_ascending_doc_id() {
        let dense: HashMap<u32, f64> = [(5, 1.0), (2, 1.0)].into_iter().collect();
        let sparse = HashMap::new();
        let ranked = merge_scores(&dense, &sparse, 1.0, 0.0);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[1].0, 5);
    }

    #[test]
    fn test_fetch_summary_scenario() {
        let mut catalog = abc_catalog();
        catalog[1].tags = vec!["metabolic".to_string()];
        catalog[1].ontology_keys = vec![201826];
        let engine = sparse_engine(catalog);

        let summary = engine.fetch_summary(2).unwrap();
        assert_eq!(summary.cohort_id, Some(2));
        assert_eq!(summary.name, "Beta");
        assert_eq!(summary.short_description, "second entry");
        assert_eq!(summary.tags, vec!["metabolic"]);
        assert_eq!(summary.ontology_keys, vec![201826]);

        assert!(engine.fetch_summary(999).is_none());
    }

    #[test]
    fn test_duplicate_id_later_row_wins() {
        let catalog = vec![row(7, "Old", "stale"), row(7, "New", "fresh")];
        let engine = sparse_engine(catalog);
        assert_eq!(engine.fetch_summary(7).unwrap().name, "New");
    }

    #[test]
    fn test_list_similar_without_dense_is_empty() {
        let engine = sparse_engine(abc_catalog());
        assert!(engine.list_similar(1, 5).is_empty());
    }

    fn dense_engine() -> PhenotypeIndex {
        // Four unit vectors; doc 0 and doc 2 point the same way.
        let mut index = FlatIpIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        let sqrt2 = std::f32::consts::FRAC_1_SQRT_2;
        index.add(&[sqrt2, sqrt2]).unwrap();

        let catalog = vec![
            row(10, "Ten", ""),
            row(11, "Eleven", ""),
            row(12, "Twelve", ""),
            row(13, "Thirteen", ""),
        ];
        let mut by_id = HashMap::new();
        for (doc_id, r) in catalog.iter().enumerate() {
            by_id.insert(r.cohort_id.unwrap(), doc_id);
        }
        PhenotypeIndex {
            catalog,
            by_id,
            sparse: None,
            dense: Some(Box::new(index)),
            manifest: None,
            embedder: None,
        }
    }

    #[test]
    fn test_list_similar_excludes_self_and_sorts() {
        let engine = dense_engine();
        let similar = engine.list_similar(10, 5);
        assert!(similar.len() <= 5);
        assert!(similar.iter().all(|hit| hit.cohort_id != Some(10)));
        // Identical vector ranks first even though self occupied a slot.
        assert_eq!(similar[0].cohort_id, Some(12));
        for pair in similar.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_list_similar_respects_top_k() {
        let engine = dense_engine();
        let similar = engine.list_similar(10, 2);
        assert_eq!(similar.len(), 2);
    }

    #[test]
    fn test_list_similar_unknown_id_is_empty() {
        let engine = dense_engine();
        assert!(engine.list_similar(999, 5).is_empty());
    }

    fn unreachable_embedder() -> EmbeddingClient {
        // Bind-then-drop guarantees a port nothing is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);
        let config = crate::config::EmbeddingConfig {
            provider: "remote".to_string(),
            url,
            model: "test-model".to_string(),
            api_key_env: "EMBED_API_KEY".to_string(),
            batch_size: 8,
            max_retries: 0,
            timeout_secs: 2,
        };
        EmbeddingClient::from_config(&config).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_sparse() {
        let catalog = abc_catalog();
        let sparse = SparseIndex::build(&catalog, 1.5, 0.75);
        let mut index = FlatIpIndex::new(2);
        for _ in 0..catalog.len() {
            index.add(&[1.0, 0.0]).unwrap();
        }
        let mut by_id = HashMap::new();
        for (doc_id, r) in catalog.iter().enumerate() {
            by_id.insert(r.cohort_id.unwrap(), doc_id);
        }
        let engine = PhenotypeIndex {
            catalog,
            by_id,
            sparse: Some(sparse),
            dense: Some(Box::new(index)),
            manifest: None,
            embedder: Some(unreachable_embedder()),
        };
        assert!(engine.dense_available());

        let response = engine.search("alpha", &SearchOptions::default()).await;

        // The sparse ranking survives; the dense failure is reported, not
        // swallowed and not fatal.
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].cohort_id, Some(1));
        assert!(response.hits[0].score_dense.is_none());
        assert!(response.hits[0].score_sparse.is_some());
        assert!(response.modalities.sparse_used);
        assert!(!response.modalities.dense_used);
        assert!(response.modalities.dense_degraded);
        assert!(response.modalities.dense_error.is_some());
    }

    #[tokio::test]
    async fn test_open_missing_directory_is_empty_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PhenotypeIndex::open(dir.path(), None).unwrap();
        assert!(!engine.sparse_available());
        assert!(!engine.dense_available());
        let response = engine.search("anything", &SearchOptions::default()).await;
        assert!(response.hits.is_empty());
    }
}
