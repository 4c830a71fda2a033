//! Pairwise cosine similarity over the feature matrix, plus top-K lookups.

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use uuid::Uuid;

use crate::models::{ModelSummary, SimilarPlayer};
use crate::services::error::ModelError;
use crate::services::feature_builder::{FeatureMatrix, RowIndex};
use crate::utils::canonical_id;

/// Rows with a smaller norm count as all-zero
const NORM_EPSILON: f64 = 1e-12;

/// Tolerance for symmetry checks on loaded matrices
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Dense, symmetric cosine similarity matrix.
///
/// An all-zero feature row has similarity 0.0 with every row, itself included.
/// Every other row has exactly 1.0 on the diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityIndex {
    index: RowIndex,
    scores: DMatrix<f64>,
}

impl SimilarityIndex {
    /// Rebuild from a persisted id list and row-major scores.
    pub fn from_scores(ids: Vec<String>, scores: Vec<f64>) -> Result<Self, ModelError> {
        let n = ids.len();
        if scores.len() != n * n {
            return Err(ModelError::Artifact(format!(
                "expected {} similarity scores for {} rows, found {}",
                n * n,
                n,
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ModelError::Artifact("similarity matrix has non-finite scores".to_string()));
        }

        let index = RowIndex::from_ids(ids)?;
        let scores = DMatrix::from_row_slice(n, n, &scores);
        for i in 0..n {
            for j in (i + 1)..n {
                if (scores[(i, j)] - scores[(j, i)]).abs() > SYMMETRY_TOLERANCE {
                    return Err(ModelError::Artifact(format!(
                        "similarity matrix is not symmetric at ({}, {})",
                        i, j
                    )));
                }
            }
        }

        Ok(Self { index, scores })
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn scores(&self) -> &DMatrix<f64> {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.scores[(self.index.position(a)?, self.index.position(b)?)])
    }

    /// The `k` rows most similar to `id`, best first.
    ///
    /// Equal scores keep original row order. With `exclude_self` the queried
    /// row never appears in the result.
    pub fn top_k_similar(&self, id: &str, k: usize, exclude_self: bool) -> Result<Vec<(String, f64)>, ModelError> {
        let row = self
            .index
            .position(id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))?;

        if k == 0 {
            return Ok(Vec::new());
        }

        // Min-heap of the best k seen so far; the root is the weakest keeper
        let mut best: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
        for (other, score) in self.scores.row(row).iter().enumerate() {
            if exclude_self && other == row {
                continue;
            }
            let candidate = Candidate { score: *score, row: other };
            if best.len() < k {
                best.push(Reverse(candidate));
            } else if best.peek().is_some_and(|Reverse(worst)| candidate > *worst) {
                best.pop();
                best.push(Reverse(candidate));
            }
        }

        Ok(best
            .into_sorted_vec()
            .into_iter()
            .filter_map(|Reverse(c)| self.index.id(c.row).map(|id| (id.to_string(), c.score)))
            .collect())
    }
}

/// Ranking key: higher score wins, then the earlier row.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f64,
    row: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.row.cmp(&self.row))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cosine similarity between every pair of feature rows.
///
/// Only the upper triangle is computed; the lower one mirrors it so the result
/// is exactly symmetric.
pub fn build_index(matrix: &FeatureMatrix) -> Result<SimilarityIndex, ModelError> {
    if matrix.is_empty() {
        return Err(ModelError::EmptyDataset);
    }

    let values = matrix.values();
    let n = matrix.len();
    let norms: Vec<f64> = (0..n).map(|i| values.row(i).norm()).collect();
    let mut scores = DMatrix::<f64>::zeros(n, n);

    for i in 0..n {
        if norms[i] < NORM_EPSILON {
            continue;
        }
        scores[(i, i)] = 1.0;
        for j in (i + 1)..n {
            if norms[j] < NORM_EPSILON {
                continue;
            }
            let cosine = (values.row(i).dot(&values.row(j)) / (norms[i] * norms[j])).clamp(-1.0, 1.0);
            // fold -0.0 into 0.0 so ties rank by row order
            let cosine = if cosine == 0.0 { 0.0 } else { cosine };
            scores[(i, j)] = cosine;
            scores[(j, i)] = cosine;
        }
    }

    tracing::info!("Similarity matrix has been calculated ({} x {})", n, n);

    Ok(SimilarityIndex {
        index: matrix.index().clone(),
        scores,
    })
}

/// Free-function form of [`SimilarityIndex::top_k_similar`].
pub fn top_k_similar(
    index: &SimilarityIndex,
    id: &str,
    k: usize,
    exclude_self: bool,
) -> Result<Vec<(String, f64)>, ModelError> {
    index.top_k_similar(id, k, exclude_self)
}

/// A published build: the feature matrix and the similarity index over the same rows.
#[derive(Debug, Clone)]
pub struct SimilarityModel {
    build_id: String,
    built_at: DateTime<Utc>,
    features: FeatureMatrix,
    index: SimilarityIndex,
}

impl SimilarityModel {
    /// Pair a matrix with its index. Both must list the same identifiers in the same order.
    pub fn new(
        build_id: String,
        built_at: DateTime<Utc>,
        features: FeatureMatrix,
        index: SimilarityIndex,
    ) -> Result<Self, ModelError> {
        if features.index().ids() != index.index().ids() {
            return Err(ModelError::Artifact(
                "feature matrix and similarity index describe different player seasons".to_string(),
            ));
        }
        Ok(Self {
            build_id,
            built_at,
            features,
            index,
        })
    }

    /// Compute the similarity index for a freshly built matrix.
    pub fn build(features: FeatureMatrix) -> Result<Self, ModelError> {
        let index = build_index(&features)?;
        Self::new(Uuid::new_v4().to_string(), Utc::now(), features, index)
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Top-k player-seasons similar to the named player's season.
    pub fn similar_players(
        &self,
        first_name: &str,
        last_name: &str,
        season: &str,
        k: usize,
    ) -> Result<Vec<SimilarPlayer>, ModelError> {
        let id = canonical_id(first_name, last_name, season);
        Ok(self
            .index
            .top_k_similar(&id, k, true)?
            .into_iter()
            .map(|(player_season_id, similarity_score)| SimilarPlayer {
                player_season_id,
                similarity_score,
            })
            .collect())
    }

    /// Identifiers that look closest to `id`, for "did you mean" hints.
    pub fn suggestions(&self, id: &str, limit: usize) -> Vec<String> {
        let needle = id.to_lowercase();
        let mut scored: Vec<(f64, &String)> = self
            .index
            .index()
            .ids()
            .iter()
            .map(|candidate| (strsim::jaro_winkler(&needle, &candidate.to_lowercase()), candidate))
            .filter(|(score, _)| *score >= 0.8)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(limit).map(|(_, id)| id.clone()).collect()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            build_id: self.build_id.clone(),
            built_at: self.built_at,
            rows: self.features.len(),
            features: self.features.columns().to_vec(),
        }
    }
}
