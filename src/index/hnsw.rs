/// HNSW vector index for approximate similarity search
use crate::config::IndexKind;
use crate::index::{IndexError, Metric, SearchHit, VectorIndex};
use hnsw_rs::prelude::*;
use ndarray::Array2;
use std::cmp::Ordering;

/// Upper bound on graph layers
const MAX_LAYER: usize = 16;

/// HNSW index wrapper
///
/// Built once from the loaded vector file and never mutated afterwards.
/// Uses cosine distance, so only cosine-metric files are accepted; scores
/// are reported as `1 - distance`.
pub struct HnswIndex {
    /// Inner HNSW graph
    index: Hnsw<'static, f32, DistCosine>,
    /// Vector dimension
    dimension: usize,
    /// Number of indexed vectors
    count: usize,
    metric: Metric,
    ef_search: usize,
}

impl HnswIndex {
    /// Build the graph over every row of `vectors`
    ///
    /// # Arguments
    /// * `m` - HNSW M parameter (number of connections per layer)
    /// * `ef_construction` - HNSW construction parameter (higher = better recall, slower build)
    /// * `ef_search` - HNSW search parameter used for every query
    pub fn build(
        vectors: &Array2<f32>,
        metric: Metric,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Result<Self, IndexError> {
        // The graph ranks by cosine distance only
        if metric != Metric::Cosine {
            return Err(IndexError::UnsupportedMetric {
                kind: IndexKind::Hnsw,
                metric,
            });
        }

        let count = vectors.nrows();
        let dimension = vectors.ncols();

        let index = Hnsw::<f32, DistCosine>::new(
            m,
            count.max(1),
            MAX_LAYER,
            ef_construction,
            DistCosine,
        );

        for (position, row) in vectors.outer_iter().enumerate() {
            let data = row.to_vec();
            index.insert((&data, position));
        }

        tracing::debug!("HNSW graph built over {} vectors", count);

        Ok(Self {
            index,
            dimension,
            count,
            metric,
            ef_search,
        })
    }
}

impl VectorIndex for HnswIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(IndexError::SearchError("k must be at least 1".to_string()));
        }
        if self.count == 0 {
            return Ok(Vec::new());
        }

        let neighbours = self.index.search(query, k, self.ef_search.max(k));

        let mut hits: Vec<SearchHit> = neighbours
            .into_iter()
            .map(|neighbour| SearchHit {
                position: neighbour.d_id as i64,
                score: 1.0 - neighbour.distance, // Convert distance to similarity
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);

        Ok(hits)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: &[(usize, f32)]) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        for &(i, x) in hot {
            v[i] = x;
        }
        crate::index::l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_build_and_search() {
        let rows = [
            unit(16, &[(0, 1.0)]),
            unit(16, &[(1, 1.0)]),
            unit(16, &[(0, 0.9), (1, 0.1)]),
        ];
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let vectors = Array2::from_shape_vec((3, 16), flat).unwrap();

        let index = HnswIndex::build(&vectors, Metric::Cosine, 16, 200, 50).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimension(), 16);

        let hits = index.search(&unit(16, &[(0, 1.0)]), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 0);
        assert!(hits[0].score > 0.99);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_empty_graph() {
        let index = HnswIndex::build(&Array2::zeros((0, 8)), Metric::Cosine, 16, 200, 50).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[0.1; 8], 5).unwrap().is_empty());
    }

    #[test]
    fn test_inner_product_rejected() {
        let vectors = Array2::from_elem((2, 4), 0.5);
        assert!(matches!(
            HnswIndex::build(&vectors, Metric::InnerProduct, 16, 200, 50),
            Err(IndexError::UnsupportedMetric { .. })
        ));
    }

    #[test]
    fn test_dimension_validation() {
        let vectors = Array2::from_elem((2, 8), 0.5);
        let index = HnswIndex::build(&vectors, Metric::Cosine, 16, 200, 50).unwrap();
        assert!(index.search(&[1.0; 4], 1).is_err());
    }
}
