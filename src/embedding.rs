//! Embedding service client and content-addressed embedding cache.
//!
//! The client speaks the generic embeddings HTTP contract: a JSON POST of
//! `{"model": ..., "input": [texts]}` with optional bearer auth. Three
//! response shapes are accepted:
//!
//! - `{"embeddings": [[f32, ...], ...]}`
//! - `{"data": [{"embedding": [f32, ...]}, ...]}`
//! - `{"embedding": [f32, ...]}` (single-input calls only)
//!
//! Anything else is a protocol error.
//!
//! Retry strategy mirrors the rest of the pipeline's HTTP handling:
//! HTTP 429 and 5xx retry with exponential backoff (1s, 2s, 4s, ... capped
//! at 32s), other 4xx fail immediately, network errors retry.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::models::CatalogRow;
use crate::text::hash_text;

/// Cache artifact format version.
const CACHE_FORMAT_VERSION: u32 = 1;

/// HTTP client for the remote embedding endpoint.
pub struct EmbeddingClient {
    url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl EmbeddingClient {
    /// Build a client from config, or `None` when the provider is disabled.
    ///
    /// The bearer token is read from the environment variable named by
    /// `embedding.api_key_env`; absence means unauthenticated requests.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Some(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
            client,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// Used by the offline build, where waiting out the full retry schedule
    /// is worth it.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_with_retries(texts, self.max_retries).await
    }

    async fn embed_with_retries(
        &self,
        texts: &[String],
        max_retries: u32,
    ) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(ref key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .context("Failed to decode embedding response body")?;
                        return parse_embed_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    /// Embed a single query text.
    ///
    /// The interactive query path makes one attempt and no backoff sleeps:
    /// a failing embedding service should degrade the request to sparse-only
    /// scoring promptly, not after the build retry schedule runs out.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_with_retries(&[text.to_string()], 0).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Parse any of the accepted embedding response shapes.
pub fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    if let Some(embeddings) = json.get("embeddings").and_then(|v| v.as_array()) {
        return embeddings.iter().map(parse_vector).collect();
    }
    if let Some(data) = json.get("data").and_then(|v| v.as_array()) {
        return data
            .iter()
            .map(|item| {
                item.get("embedding")
                    .ok_or_else(|| anyhow::anyhow!("Embedding response item missing embedding"))
                    .and_then(parse_vector)
            })
            .collect();
    }
    if let Some(single) = json.get("embedding") {
        return Ok(vec![parse_vector(single)?]);
    }
    bail!("Embedding response missing embeddings payload")
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embedding vector is not an array"))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

/// L2-normalize a vector in place. Zero-norm vectors are left as zeros
/// rather than dividing by zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// The embedding input text for one catalog row: name, description, and
/// keyword bag. Falls back to the name alone, then to a synthetic
/// `cohort <id>` string, so no row ever embeds an empty string.
pub fn embedding_text(row: &CatalogRow) -> String {
    let text = format!(
        "{} {} {}",
        row.name,
        row.short_description,
        row.pop_keywords.join(" ")
    );
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    if !row.name.is_empty() {
        return row.name.clone();
    }
    match row.cohort_id {
        Some(id) => format!("cohort {id}"),
        None => "cohort unknown".to_string(),
    }
}

/// Content-addressed embedding cache: SHA-256 text hash → vector.
///
/// The cache persists across rebuilds; a row whose embedding text is
/// unchanged is never re-embedded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingCache {
    pub version: u32,
    pub vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            vectors: HashMap::new(),
        }
    }

    /// Load the cache, or start empty when the file is missing. A cache that
    /// fails to parse or carries an unknown version is discarded with a
    /// warning — it only costs re-embedding, never correctness.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::new();
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(cache) if cache.version == CACHE_FORMAT_VERSION => cache,
            Ok(cache) => {
                eprintln!(
                    "warning: embedding cache version {} unsupported, starting empty",
                    cache.version
                );
                Self::new()
            }
            Err(e) => {
                eprintln!("warning: embedding cache unreadable ({e}), starting empty");
                Self::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize embedding cache")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write embedding cache: {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Option<&Vec<f32>> {
        self.vectors.get(hash)
    }

    pub fn insert(&mut self, text: &str, vector: Vec<f32>) {
        self.vectors.insert(hash_text(text), vector);
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.vectors.contains_key(hash)
    }
}
