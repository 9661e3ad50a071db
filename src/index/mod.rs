//! Passage vector index
//!
//! Read-only nearest-neighbour search over one vector per passage. Built
//! upstream, loaded once from a vector file and shared by every request.
//! - `FlatIndex`: exact inner-product scan over an ndarray matrix
//! - `HnswIndex`: approximate search with hnsw_rs

mod file;
mod flat;
mod hnsw;

pub use file::{read_vector_file, write_vector_file, VectorFile};
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

use crate::config::{IndexConfig, IndexKind};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index file not found: {0}")]
    IndexNotFound(String),

    #[error("Malformed index file: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("{kind} index cannot serve {metric:?} vectors")]
    UnsupportedMetric { kind: IndexKind, metric: Metric },
}

/// Similarity metric the index vectors were built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Raw inner product
    InnerProduct,
    /// Inner product over L2-normalized vectors
    Cosine,
}

/// One search result. `position` may be -1 (no match) or otherwise fall
/// outside the passage list; callers must bounds-check it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: i64,
    pub score: f32,
}

/// Top-k similarity search over passage vectors
pub trait VectorIndex: Send + Sync {
    /// Search for the k most similar vectors, ordered by descending score.
    /// Returns at most `k` hits.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError>;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    fn kind(&self) -> IndexKind;
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Load the vector file and build the configured index backend over it
pub fn open_index(path: &Path, config: &IndexConfig) -> Result<Box<dyn VectorIndex>, IndexError> {
    let file = read_vector_file(path)?;

    tracing::info!(
        "Loaded {} vectors ({}D) from {:?}, building {} index",
        file.vectors.nrows(),
        file.vectors.ncols(),
        path,
        config.kind
    );

    let index: Box<dyn VectorIndex> = match config.kind {
        IndexKind::Flat => Box::new(FlatIndex::new(file.vectors, file.metric)),
        IndexKind::Hnsw => Box::new(HnswIndex::build(
            &file.vectors,
            file.metric,
            config.hnsw_m,
            config.hnsw_ef_construction,
            config.hnsw_ef_search,
        )?),
    };

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hnsw_refuses_inner_product_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("inner.index");
        let vectors = ndarray::array![[10.0f32, 0.0], [0.9, 0.1]];
        write_vector_file(&path, &vectors, Metric::InnerProduct).unwrap();

        let mut config = IndexConfig {
            kind: IndexKind::Hnsw,
            hnsw_m: 8,
            hnsw_ef_construction: 50,
            hnsw_ef_search: 16,
        };
        assert!(matches!(
            open_index(&path, &config),
            Err(IndexError::UnsupportedMetric {
                kind: IndexKind::Hnsw,
                metric: Metric::InnerProduct
            })
        ));

        // The exact backend ranks by raw inner product
        config.kind = IndexKind::Flat;
        let index = open_index(&path, &config).unwrap();
        let hits = index.search(&[1.0, 0.2], 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);
    }
}
