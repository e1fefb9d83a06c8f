pub mod artifact;
pub mod table;

pub use artifact::{RankingArtifact, RetrievalArtifact, ARTIFACT_FORMAT_VERSION};
pub use table::FeatureTable;

use crate::error::{RecError, Result, Stage};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// One (user, item) event after confidence weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: usize,
    pub item_id: usize,
    pub confidence: f64,
    pub label: u8,
}

impl InteractionRecord {
    pub fn new(user_id: usize, item_id: usize, label: u8, weights: &ConfidenceWeights) -> Self {
        Self {
            user_id,
            item_id,
            confidence: weights.weight(label),
            label,
        }
    }
}

/// Maps a replay label to the confidence it contributes to the interaction matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub positive: f64,
    pub negative: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            positive: 1.0,
            negative: 0.0,
        }
    }
}

impl ConfidenceWeights {
    pub fn weight(&self, label: u8) -> f64 {
        if label == 0 {
            self.negative
        } else {
            self.positive
        }
    }
}

/// User and item latent factors produced by ALS. Row `u` of `user_factors` and row `i` of
/// `item_factors` correspond to row `u` and column `i` of the interaction matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentFactors {
    pub user_factors: Array2<f64>,
    pub item_factors: Array2<f64>,
}

impl LatentFactors {
    pub fn new(user_factors: Array2<f64>, item_factors: Array2<f64>) -> Result<Self> {
        if user_factors.ncols() != item_factors.ncols() {
            return Err(RecError::dimension_mismatch(
                Stage::Retrieval,
                "factor dimension",
                user_factors.ncols(),
                item_factors.ncols(),
            ));
        }
        Ok(Self {
            user_factors,
            item_factors,
        })
    }

    pub fn n_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn user(&self, user: usize) -> ArrayView1<'_, f64> {
        self.user_factors.row(user)
    }

    pub fn item(&self, item: usize) -> ArrayView1<'_, f64> {
        self.item_factors.row(item)
    }
}

/// A retrieval candidate with its inner-product score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: usize,
    pub score: f64,
}

/// A candidate after the ranking stage re-scored it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item_id: usize,
    pub retrieval_score: f64,
    pub rank_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: usize,
    pub recommendations: Vec<RankedItem>,
    pub retrieval_run_id: uuid::Uuid,
    pub ranking_run_id: uuid::Uuid,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_confidence_weights() {
        let weights = ConfidenceWeights::default();
        assert_eq!(weights.weight(1), 1.0);
        assert_eq!(weights.weight(0), 0.0);

        let weights = ConfidenceWeights { positive: 2.5, negative: 0.0 };
        let record = InteractionRecord::new(3, 4, 1, &weights);
        assert_eq!(record.confidence, 2.5);
    }

    #[test]
    fn test_latent_factors_shape_check() {
        let users = Array2::<f64>::zeros((3, 4));
        let items = Array2::<f64>::zeros((5, 2));
        assert!(LatentFactors::new(users, items).is_err());

        let factors =
            LatentFactors::new(Array2::zeros((3, 4)), Array2::zeros((5, 4))).unwrap();
        assert_eq!((factors.n_users(), factors.n_items(), factors.factors()), (3, 5, 4));
    }
}
