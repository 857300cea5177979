use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub bm25: Bm25Config,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root directory holding index generations and the CURRENT pointer.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Truncation cutoff for the dense sub-search.
    #[serde(default = "default_candidate_k")]
    pub dense_k: usize,
    /// Truncation cutoff for the sparse sub-search.
    #[serde(default = "default_candidate_k")]
    pub sparse_k: usize,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            dense_k: default_candidate_k(),
            sparse_k: default_candidate_k(),
            dense_weight: default_dense_weight(),
            sparse_weight: default_sparse_weight(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_candidate_k() -> usize {
    100
}
fn default_dense_weight() -> f64 {
    0.9
}
fn default_sparse_weight() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"remote"` to call the embedding endpoint, `"disabled"` otherwise.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embed_url")]
    pub url: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    /// Environment variable holding the optional bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_embed_url(),
            model: default_embed_model(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_url() -> String {
    "http://localhost:3000/ollama/api/embed".to_string()
}
fn default_embed_model() -> String {
    "qwen3-embedding:4b".to_string()
}
fn default_api_key_env() -> String {
    "EMBED_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bm25Config {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.dense_weight < 0.0 || config.retrieval.sparse_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }

    // Validate BM25
    if config.bm25.k1 <= 0.0 {
        anyhow::bail!("bm25.k1 must be > 0");
    }
    if !(0.0..=1.0).contains(&config.bm25.b) {
        anyhow::bail!("bm25.b must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.url.is_empty() {
            anyhow::bail!("embedding.url must be set when provider is enabled");
        }
        if config.embedding.model.is_empty() {
            anyhow::bail!("embedding.model must be set when provider is enabled");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "remote" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or remote.",
            other
        ),
    }

    Ok(config)
}
