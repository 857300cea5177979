//! Dense vector index: an explicit interface plus one flat inner-product
//! backend.
//!
//! The query engine depends only on the [`VectorIndex`] trait; [`FlatIpIndex`]
//! is the concrete backend. Vectors are stored row-major in doc-id order and
//! are expected to be L2-normalized before insertion, making inner product
//! equal to cosine similarity.
//!
//! On-disk format (`dense.index`): magic `PHXD`, then three little-endian
//! `u32`s (format version, dimension, row count), then `count × dim`
//! little-endian `f32` values.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Binary format version; bumped on any layout change.
const DENSE_FORMAT_VERSION: u32 = 1;

const DENSE_MAGIC: &[u8; 4] = b"PHXD";

/// Interface the hybrid engine sees. Implementations index L2-normalized
/// vectors in doc-id insertion order.
pub trait VectorIndex: Send + Sync {
    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimensionality.
    fn dim(&self) -> usize;

    /// Append one vector; its doc id is the insertion position.
    fn add(&mut self, vector: &[f32]) -> Result<()>;

    /// Return up to `k` (doc id, inner-product score) pairs, descending by
    /// score with ties broken by ascending doc id.
    fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)>;

    /// Recover the stored vector for a doc id, or `None` if out of range.
    fn reconstruct(&self, doc_id: u32) -> Option<Vec<f32>>;

    /// Persist the index to `path`.
    fn save(&self, path: &Path) -> Result<()>;
}

/// Exact (brute-force) inner-product index over a contiguous matrix.
///
/// The catalog is small enough that an exact scan beats the recall loss of
/// an approximate structure, and `reconstruct` is a direct slice copy.
pub struct FlatIpIndex {
    dim: usize,
    /// Row-major `count × dim` matrix.
    vectors: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read dense index: {}", path.display()))?;
        if bytes.len() < 16 || &bytes[0..4] != DENSE_MAGIC {
            bail!("Dense index has invalid header");
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != DENSE_FORMAT_VERSION {
            bail!(
                "Unsupported dense index version {} (expected {})",
                version,
                DENSE_FORMAT_VERSION
            );
        }
        let dim = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

        let expected = 16 + count * dim * 4;
        if bytes.len() != expected {
            bail!(
                "Dense index truncated: {} bytes, expected {}",
                bytes.len(),
                expected
            );
        }

        let vectors = bytes[16..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self { dim, vectors })
    }

    fn row(&self, doc_id: usize) -> &[f32] {
        &self.vectors[doc_id * self.dim..(doc_id + 1) * self.dim]
    }
}

impl VectorIndex for FlatIpIndex {
    fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.vectors.len() / self.dim
        }
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            bail!(
                "Vector dimension mismatch: got {}, index is {}",
                vector.len(),
                self.dim
            );
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(u32, f32)> = (0..self.len())
            .map(|doc_id| {
                let score: f32 = self
                    .row(doc_id)
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (doc_id as u32, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    fn reconstruct(&self, doc_id: u32) -> Option<Vec<f32>> {
        let doc_id = doc_id as usize;
        if doc_id >= self.len() {
            return None;
        }
        Some(self.row(doc_id).to_vec())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let count = self.len();
        let mut bytes = Vec::with_capacity(16 + self.vectors.len() * 4);
        bytes.extend_from_slice(DENSE_MAGIC);
        bytes.extend_from_slice(&DENSE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(count as u32).to_le_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write dense index: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        l2_normalize(&mut v);
        v
    }

    fn small_index() -> FlatIpIndex {
        let mut index = FlatIpIndex::new(3);
        index.add(&unit(vec![1.0, 0.0, 0.0])).unwrap();
        index.add(&unit(vec![0.0, 1.0, 0.0])).unwrap();
        index.add(&unit(vec![0.9, 0.1, 0.0])).unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_inner_product() {
        let index = small_index();
        let query = unit(vec![1.0, 0.0, 0.0]);
        let hits = index.search(&query, 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = small_index();
        let query = unit(vec![1.0, 1.0, 0.0]);
        assert_eq!(index.search(&query, 2).len(), 2);
        assert!(index.search(&query, 0).is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = FlatIpIndex::new(3);
        assert!(index.add(&[1.0, 2.0]).is_err());
        assert!(index.search(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn test_reconstruct_returns_stored_vector() {
        let index = small_index();
        let v = index.reconstruct(1).unwrap();
        assert_eq!(v, unit(vec![0.0, 1.0, 0.0]));
        assert!(index.reconstruct(3).is_none());
    }

    #[test]
    fn test_save_load_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dense.index");
        let index = small_index();
        index.save(&path).unwrap();

        let loaded = FlatIpIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dim(), 3);
        for doc_id in 0..3 {
            assert_eq!(loaded.reconstruct(doc_id), index.reconstruct(doc_id));
        }
    }

    #[test]
    fn test_load_rejects_bad_magic_and_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let bad_magic = dir.path().join("bad");
        std::fs::write(&bad_magic, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(FlatIpIndex::load(&bad_magic).is_err());

        let truncated = dir.path().join("trunc");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PHXD");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]); // far fewer than 2×4 floats
        std::fs::write(&truncated, bytes).unwrap();
        assert!(FlatIpIndex::load(&truncated).is_err());
    }
}
