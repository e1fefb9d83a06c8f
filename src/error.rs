use std::fmt;
use thiserror::Error;

/// Pipeline stage that produced an error, so operators know which half needs retraining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Data,
    Retrieval,
    Ranking,
    Scoring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Data => "data",
            Stage::Retrieval => "retrieval",
            Stage::Ranking => "ranking",
            Stage::Scoring => "scoring",
        };
        f.write_str(name)
    }
}

/// Why a user cannot be served by the retrieval stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdStart {
    /// The index lies outside the interaction matrix.
    OutOfRange,
    /// The user has a row but no positive interactions, so its latent vector is zero.
    NoInteractions,
}

impl fmt::Display for ColdStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColdStart::OutOfRange => f.write_str("no row in the interaction matrix"),
            ColdStart::NoInteractions => f.write_str("no observed interactions"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecError {
    #[error("[{stage}] schema error: {message}")]
    Schema { stage: Stage, message: String },

    #[error("[{stage}] dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        stage: Stage,
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("[retrieval] unknown user {user}: {reason}")]
    UnknownUser { user: usize, reason: ColdStart },

    #[error("[ranking] insufficient data: {0}")]
    InsufficientData(String),

    #[error("[{stage}] numerical failure: {message}")]
    Numerical { stage: Stage, message: String },

    #[error("[{stage}] training aborted")]
    Aborted { stage: Stage },

    #[error("[{stage}] incompatible artifact: {message}")]
    IncompatibleArtifact { stage: Stage, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl RecError {
    pub fn schema(stage: Stage, message: impl Into<String>) -> Self {
        RecError::Schema {
            stage,
            message: message.into(),
        }
    }

    pub fn dimension_mismatch(
        stage: Stage,
        what: impl Into<String>,
        expected: usize,
        found: usize,
    ) -> Self {
        RecError::DimensionMismatch {
            stage,
            what: what.into(),
            expected,
            found,
        }
    }

    /// The stage the error belongs to, if it is stage-specific.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RecError::Schema { stage, .. }
            | RecError::DimensionMismatch { stage, .. }
            | RecError::Numerical { stage, .. }
            | RecError::Aborted { stage }
            | RecError::IncompatibleArtifact { stage, .. } => Some(*stage),
            RecError::UnknownUser { .. } => Some(Stage::Retrieval),
            RecError::InsufficientData(_) => Some(Stage::Ranking),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecError>;
