//! Core data models shared by the build pipeline and the query engine.
//!
//! A [`CatalogRow`]'s position in the catalog file is its *doc id*: the
//! zero-based line number is the only join key between the catalog, the
//! sparse postings, and the dense vector store. Rows are never reordered
//! after a build.

use serde::{Deserialize, Serialize};

/// One normalized, searchable catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRow {
    /// Source identifier. `None` when the raw record's id column was not
    /// parseable; such rows are kept but never correlate with a definition.
    #[serde(rename = "cohortId")]
    pub cohort_id: Option<i64>,
    pub name: String,
    pub short_description: String,
    /// Tags with leading `#` and surrounding whitespace stripped,
    /// source order preserved.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ontology concept identifiers extracted from the raw record.
    #[serde(default)]
    pub ontology_keys: Vec<i64>,
    /// Status and boolean-flag labels (`status:<v>`, `reference`, `washout`).
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub logic_features: LogicFeatures,
    /// Deduplicated keyword bag, first-seen order, drawn from name,
    /// description, tags, and the linked definition document when present.
    #[serde(default)]
    pub pop_keywords: Vec<String>,
    #[serde(default)]
    pub source_meta: SourceMeta,
    /// Embedding input text, cached on the row during the dense build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_for_embedding: Option<String>,
    /// SHA-256 hex hash of `text_for_embedding`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_for_embedding_hash: Option<String>,
}

/// Structured cohort-logic features carried through from the raw record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicFeatures {
    #[serde(default)]
    pub number_of_inclusion_rules: i64,
    #[serde(default)]
    pub number_of_concept_sets: i64,
    #[serde(default)]
    pub domains_in_entry_events: String,
    #[serde(default)]
    pub has_condition_type: String,
    #[serde(default)]
    pub has_drug_type: String,
    #[serde(default)]
    pub has_observation_type: String,
    #[serde(default)]
    pub has_procedure_type: String,
}

/// Opaque provenance metadata; never searched, passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeta {
    #[serde(default)]
    pub librarian: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub added_version: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub modified_date: Option<String>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
}

/// One hit in a hybrid search ranking.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(rename = "cohortId")]
    pub cohort_id: Option<i64>,
    pub name: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub signals: Vec<String>,
    /// Weighted combination of the per-modality scores.
    pub score: f64,
    /// Present if and only if this doc appeared in the truncated dense
    /// result set. Never coerced to 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_dense: Option<f64>,
    /// Present if and only if this doc appeared in the truncated sparse
    /// result set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_sparse: Option<f64>,
}

/// Which modalities contributed to a search response.
///
/// Degradation is reported explicitly rather than left implicit in field
/// absence: a query-time embedding failure sets `dense_degraded` and keeps
/// the sparse ranking.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModalityReport {
    pub dense_used: bool,
    pub sparse_used: bool,
    pub dense_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_error: Option<String>,
}

/// A full search response: the merged ranking plus the modality report.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub modalities: ModalityReport,
}

/// One neighbor returned by `list_similar`.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarHit {
    #[serde(rename = "cohortId")]
    pub cohort_id: Option<i64>,
    pub name: String,
    pub short_description: String,
    pub score: f64,
}

/// Fixed projection of catalog fields returned by `fetch_summary`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    #[serde(rename = "cohortId")]
    pub cohort_id: Option<i64>,
    pub name: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub signals: Vec<String>,
    pub ontology_keys: Vec<i64>,
    pub logic_features: LogicFeatures,
}

/// Build manifest written alongside the index artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// UTC ISO-8601 build timestamp.
    pub built_at: String,
    pub catalog_count: usize,
    pub dense: DenseStatus,
    pub sparse: SparseStats,
    pub embedding_model: String,
    pub embedding_url: String,
}

/// Outcome of the dense build step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseStatus {
    /// `"ok"`, `"skipped"`, or `"failed"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl DenseStatus {
    pub fn skipped(reason: &str) -> Self {
        Self {
            status: "skipped".to_string(),
            reason: Some(reason.to_string()),
            dim: None,
            count: None,
        }
    }

    pub fn ok(dim: usize, count: usize) -> Self {
        Self {
            status: "ok".to_string(),
            reason: None,
            dim: Some(dim),
            count: Some(count),
        }
    }
}

/// BM25 parameters recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseStats {
    pub doc_count: usize,
    pub k1: f64,
    pub b: f64,
}
