//! Artifact store: generation directories, the CURRENT pointer, and
//! catalog/manifest IO.
//!
//! A build never writes into a directory a reader may have open. Each build
//! creates a fresh generation directory under the index root and, only after
//! every artifact is fully written, publishes it by atomically replacing the
//! `CURRENT` pointer file (temp file + rename). Readers resolve `CURRENT`
//! once at open, so a half-written generation is never observable.
//!
//! Layout:
//!
//! ```text
//! <index_dir>/
//!   CURRENT                  # name of the live generation directory
//!   gen-20260825120000/
//!     catalog                # newline-delimited JSON rows, line = doc id
//!     sparse_index           # versioned JSON postings/idf/lengths
//!     dense.index            # versioned binary vector matrix
//!     embedding_cache        # versioned JSON hash → vector map
//!     meta                   # JSON manifest
//!     definitions/           # optional, one full definition per id
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::models::{CatalogRow, Manifest};

const CURRENT_POINTER: &str = "CURRENT";

/// Stable filenames inside one generation directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> PathBuf {
        self.root.join("catalog")
    }

    pub fn sparse(&self) -> PathBuf {
        self.root.join("sparse_index")
    }

    pub fn dense(&self) -> PathBuf {
        self.root.join("dense.index")
    }

    pub fn embedding_cache(&self) -> PathBuf {
        self.root.join("embedding_cache")
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn definitions(&self) -> PathBuf {
        self.root.join("definitions")
    }
}

/// Resolve the live generation, or `None` when no build has been published.
pub fn resolve_current(index_dir: &Path) -> Result<Option<ArtifactPaths>> {
    let pointer = index_dir.join(CURRENT_POINTER);
    if !pointer.exists() {
        return Ok(None);
    }
    let name = std::fs::read_to_string(&pointer)
        .with_context(|| format!("Failed to read pointer: {}", pointer.display()))?;
    let generation = index_dir.join(name.trim());
    if !generation.is_dir() {
        return Ok(None);
    }
    Ok(Some(ArtifactPaths::new(generation)))
}

/// Create a fresh, timestamped generation directory for a build to fill.
pub fn create_generation(index_dir: &Path) -> Result<ArtifactPaths> {
    std::fs::create_dir_all(index_dir)
        .with_context(|| format!("Failed to create index dir: {}", index_dir.display()))?;
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let base = format!("gen-{stamp}");
    let mut name = base.clone();
    let mut suffix = 1;
    while index_dir.join(&name).exists() {
        name = format!("{base}-{suffix}");
        suffix += 1;
    }
    let root = index_dir.join(&name);
    std::fs::create_dir(&root)
        .with_context(|| format!("Failed to create generation dir: {}", root.display()))?;
    Ok(ArtifactPaths::new(root))
}

/// Atomically point `CURRENT` at a fully-written generation.
pub fn publish_generation(index_dir: &Path, generation: &ArtifactPaths) -> Result<()> {
    let name = generation
        .root()
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Generation directory has no name"))?;
    let tmp = index_dir.join(format!("{CURRENT_POINTER}.tmp"));
    let mut file = std::fs::File::create(&tmp)
        .with_context(|| format!("Failed to create pointer temp file: {}", tmp.display()))?;
    writeln!(file, "{name}")?;
    file.sync_all()?;
    std::fs::rename(&tmp, index_dir.join(CURRENT_POINTER))
        .context("Failed to publish generation pointer")?;
    Ok(())
}

/// Write the catalog, one JSON record per line, in doc-id order.
pub fn write_catalog(path: &Path, catalog: &[CatalogRow]) -> Result<()> {
    let mut out = String::new();
    for row in catalog {
        out.push_str(&serde_json::to_string(row).context("Failed to serialize catalog row")?);
        out.push('\n');
    }
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write catalog: {}", path.display()))?;
    Ok(())
}

/// Load the catalog. A missing file is an empty catalog, not an error.
/// Blank lines are skipped; line order defines doc ids.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open catalog: {}", path.display()))?;
    let mut catalog = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read catalog line")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: CatalogRow =
            serde_json::from_str(line).context("Failed to parse catalog row")?;
        catalog.push(row);
    }
    Ok(catalog)
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json =
        serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<Option<Manifest>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: Manifest =
        serde_json::from_str(&content).context("Failed to parse manifest")?;
    Ok(Some(manifest))
}
