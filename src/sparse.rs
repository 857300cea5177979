//! Sparse (lexical) index: inverted postings with BM25 scoring.
//!
//! Each catalog row contributes one scoring document: its name, short
//! description, tags, and keyword bag concatenated into a single string and
//! tokenized through [`crate::text::tokenize`]. Postings, per-term IDF, and
//! document lengths are persisted as a versioned JSON artifact so the format
//! stays portable across implementations.
//!
//! BM25 scoring:
//!
//! ```text
//! score(q, d) = Σ idf(t) · tf·(k1+1) / (tf + k1·(1 − b + b·(len(d)/avgdl)))
//! idf(t)      = ln((N − df + 0.5)/(df + 0.5) + 1)
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::models::CatalogRow;
use crate::text::tokenize;

/// Artifact format version; bumped on any schema change.
const SPARSE_FORMAT_VERSION: u32 = 1;

/// Inverted index with BM25 statistics, keyed by doc id (catalog position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseIndex {
    pub version: u32,
    /// term → list of (doc id, term frequency), ascending doc id.
    pub postings: HashMap<String, Vec<(u32, u32)>>,
    /// term → inverse document frequency.
    pub idf: HashMap<String, f64>,
    /// Token count per document, indexed by doc id.
    pub doc_lengths: Vec<u32>,
    /// Mean document token length; 0 for an empty corpus.
    pub avgdl: f64,
    pub k1: f64,
    pub b: f64,
}

/// The text BM25 scores for one row: name, description, tags, keyword bag.
fn scoring_document(row: &CatalogRow) -> String {
    format!(
        "{} {} {} {}",
        row.name,
        row.short_description,
        row.tags.join(" "),
        row.pop_keywords.join(" ")
    )
}

impl SparseIndex {
    /// Build the inverted index over the catalog in doc-id order.
    pub fn build(catalog: &[CatalogRow], k1: f64, b: f64) -> Self {
        let mut postings: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(catalog.len());

        for (doc_id, row) in catalog.iter().enumerate() {
            let terms = tokenize(&scoring_document(row));
            doc_lengths.push(terms.len() as u32);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *tf.entry(term).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings
                    .entry(term)
                    .or_default()
                    .push((doc_id as u32, count));
            }
        }

        // Terms were inserted per-doc in catalog order, but keep the
        // ascending-doc-id invariant explicit.
        for list in postings.values_mut() {
            list.sort_by_key(|&(doc_id, _)| doc_id);
        }

        let doc_count = catalog.len();
        let avgdl = if doc_count == 0 {
            0.0
        } else {
            doc_lengths.iter().map(|&l| l as f64).sum::<f64>() / doc_count as f64
        };

        let idf = postings
            .iter()
            .map(|(term, list)| {
                let df = list.len() as f64;
                let value = ((doc_count as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term.clone(), value)
            })
            .collect();

        Self {
            version: SPARSE_FORMAT_VERSION,
            postings,
            idf,
            doc_lengths,
            avgdl,
            k1,
            b,
        }
    }

    /// BM25 search. Returns up to `top_k` (doc id, score) pairs, descending
    /// by score with ties broken by ascending doc id.
    ///
    /// An empty token list or an empty corpus (`avgdl == 0`) yields an empty
    /// result, never an error.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(u32, f64)> {
        let terms = tokenize(query);
        if terms.is_empty() || self.avgdl == 0.0 {
            return Vec::new();
        }

        let mut scores: HashMap<u32, f64> = HashMap::new();
        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let term_idf = self.idf.get(term).copied().unwrap_or(0.0);
            for &(doc_id, tf) in list {
                let tf = tf as f64;
                let doc_len = self.doc_lengths[doc_id as usize] as f64;
                let denom = tf + self.k1 * (1.0 - self.b + self.b * (doc_len / self.avgdl));
                let score = term_idf * (tf * (self.k1 + 1.0)) / denom;
                *scores.entry(doc_id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(u32, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize sparse index")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write sparse index: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sparse index: {}", path.display()))?;
        let index: Self =
            serde_json::from_str(&content).context("Failed to parse sparse index")?;
        if index.version != SPARSE_FORMAT_VERSION {
            bail!(
                "Unsupported sparse index version {} (expected {})",
                index.version,
                SPARSE_FORMAT_VERSION
            );
        }
        Ok(index)
    }
}
