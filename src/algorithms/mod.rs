pub mod als;
pub mod gbdt;
pub mod initializer;
pub mod interaction;
pub mod retriever;

pub use als::{AlsReport, AlsTrainer, ConvergenceWarning};
pub use gbdt::{GbdtModel, RankerTrainer, TrainedRanker};
pub use interaction::InteractionMatrix;
pub use retriever::{CandidateSource, FactorRetriever};

use crate::error::{Result, Stage};
use crate::utils::validation::validate_feature_vector;

/// Second stage of the pipeline: maps a ranking feature vector to a replay probability.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &[f64]) -> Result<f64>;

    /// Number of features `score` expects.
    fn n_features(&self) -> usize;

    /// Column names in the order `score` expects them, when the scorer records them.
    fn feature_columns(&self) -> Option<&[String]> {
        None
    }
}

impl Scorer for GbdtModel {
    fn score(&self, features: &[f64]) -> Result<f64> {
        validate_feature_vector(features, GbdtModel::n_features(self), Stage::Scoring)?;
        Ok(self.predict_proba(features))
    }

    fn n_features(&self) -> usize {
        GbdtModel::n_features(self)
    }
}
