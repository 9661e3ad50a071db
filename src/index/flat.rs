//! Exact inner-product index

use crate::config::IndexKind;
use crate::index::{IndexError, Metric, SearchHit, VectorIndex};
use ndarray::{Array2, ArrayView1};
use std::cmp::Ordering;

/// Brute-force index scoring every vector with a dot product.
///
/// Mirrors a flat inner-product index: when `k` exceeds the number of
/// vectors the result is padded with `position = -1` hits, and equal scores
/// keep ascending position order.
pub struct FlatIndex {
    vectors: Array2<f32>,
    metric: Metric,
}

impl FlatIndex {
    pub fn new(vectors: Array2<f32>, metric: Metric) -> Self {
        Self { vectors, metric }
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(IndexError::SearchError("k must be at least 1".to_string()));
        }

        let scores = self.vectors.dot(&ArrayView1::from(query));

        let mut order: Vec<usize> = (0..scores.len()).collect();
        // Stable sort keeps position order among equal scores
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
        });

        let mut hits: Vec<SearchHit> = order
            .into_iter()
            .take(k)
            .map(|i| SearchHit {
                position: i as i64,
                score: scores[i],
            })
            .collect();

        while hits.len() < k {
            hits.push(SearchHit {
                position: -1,
                score: f32::NEG_INFINITY,
            });
        }

        Ok(hits)
    }

    fn len(&self) -> usize {
        self.vectors.nrows()
    }

    fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ordered_by_descending_score() {
        let index = FlatIndex::new(
            array![[1.0, 0.0], [0.0, 1.0], [0.8, 0.6]],
            Metric::Cosine,
        );

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let positions: Vec<i64> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 2, 1]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_pads_with_no_match_positions() {
        let index = FlatIndex::new(array![[1.0, 0.0]], Metric::Cosine);

        let hits = index.search(&[0.0, 1.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, -1);
        assert_eq!(hits[2].position, -1);
    }

    #[test]
    fn test_equal_scores_keep_position_order() {
        let index = FlatIndex::new(
            array![[0.0, 1.0], [1.0, 0.0], [1.0, 0.0], [1.0, 0.0]],
            Metric::InnerProduct,
        );

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 1);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_empty_index() {
        let index = FlatIndex::new(Array2::zeros((0, 4)), Metric::Cosine);
        assert!(index.is_empty());

        let hits = index.search(&[0.5; 4], 5).unwrap();
        assert!(hits.iter().all(|h| h.position == -1));
    }

    #[test]
    fn test_dimension_validation() {
        let index = FlatIndex::new(array![[1.0, 0.0]], Metric::Cosine);
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(index.search(&[1.0, 0.0], 0).is_err());
    }
}
