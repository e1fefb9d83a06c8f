//! Persisted, versioned outputs of the two training stages.

use crate::algorithms::{AlsReport, GbdtModel, InteractionMatrix, Scorer};
use crate::config::{AlsConfig, RankingConfig};
use crate::error::{RecError, Result, Stage};
use crate::models::LatentFactors;
use crate::utils::validation::validate_feature_vector;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Factor matrices plus everything needed to check they still match the interaction data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalArtifact {
    pub format_version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub n_users: usize,
    pub n_items: usize,
    pub factors: usize,
    pub params: AlsConfig,
    pub report: AlsReport,
    latent: LatentFactors,
}

impl RetrievalArtifact {
    pub fn new(run_id: Uuid, params: AlsConfig, report: AlsReport, latent: LatentFactors) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id,
            created_at: Utc::now(),
            n_users: latent.n_users(),
            n_items: latent.n_items(),
            factors: latent.factors(),
            params,
            report,
            latent,
        }
    }

    pub fn latent(&self) -> &LatentFactors {
        &self.latent
    }

    /// Confirms the recorded shapes agree with the stored factors and with `matrix`.
    pub fn validate_against(&self, matrix: &InteractionMatrix) -> Result<()> {
        let checks = [
            ("stored user factors", self.n_users, self.latent.n_users()),
            ("stored item factors", self.n_items, self.latent.n_items()),
            ("stored factor dimension", self.factors, self.latent.factors()),
            ("interaction matrix users", self.n_users, matrix.n_users()),
            ("interaction matrix items", self.n_items, matrix.n_items()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(RecError::dimension_mismatch(Stage::Retrieval, what, expected, found));
            }
        }
        Ok(())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path.as_ref(), self)?;
        info!("Saved retrieval artifact {} to {}", self.run_id, path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let artifact: Self = read_json(path.as_ref())?;
        check_version(artifact.format_version, Stage::Retrieval)?;
        LatentFactors::new(
            artifact.latent.user_factors.clone(),
            artifact.latent.item_factors.clone(),
        )?;
        Ok(artifact)
    }
}

/// Tree ensemble with the exact feature column order it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingArtifact {
    pub format_version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub feature_columns: Vec<String>,
    pub validation_auc: f64,
    pub validation_log_loss: f64,
    pub best_iteration: usize,
    pub params: RankingConfig,
    model: GbdtModel,
}

impl RankingArtifact {
    pub fn new(
        run_id: Uuid,
        params: RankingConfig,
        feature_columns: Vec<String>,
        validation_auc: f64,
        validation_log_loss: f64,
        best_iteration: usize,
        model: GbdtModel,
    ) -> Result<Self> {
        if feature_columns.len() != model.n_features() {
            return Err(RecError::dimension_mismatch(
                Stage::Ranking,
                "feature columns",
                model.n_features(),
                feature_columns.len(),
            ));
        }
        Ok(Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id,
            created_at: Utc::now(),
            feature_columns,
            validation_auc,
            validation_log_loss,
            best_iteration,
            params,
            model,
        })
    }

    pub fn model(&self) -> &GbdtModel {
        &self.model
    }

    /// Feature names paired with their total split gain, most important first.
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_columns
            .iter()
            .cloned()
            .zip(self.model.feature_importance())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path.as_ref(), self)?;
        info!("Saved ranking artifact {} to {}", self.run_id, path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let artifact: Self = read_json(path.as_ref())?;
        check_version(artifact.format_version, Stage::Ranking)?;
        if artifact.feature_columns.len() != artifact.model.n_features() {
            return Err(RecError::dimension_mismatch(
                Stage::Ranking,
                "feature columns",
                artifact.model.n_features(),
                artifact.feature_columns.len(),
            ));
        }
        Ok(artifact)
    }
}

impl Scorer for RankingArtifact {
    fn score(&self, features: &[f64]) -> Result<f64> {
        validate_feature_vector(features, self.feature_columns.len(), Stage::Scoring)?;
        Ok(self.model.predict_proba(features))
    }

    fn n_features(&self) -> usize {
        self.feature_columns.len()
    }

    fn feature_columns(&self) -> Option<&[String]> {
        Some(&self.feature_columns)
    }
}

fn check_version(found: u32, stage: Stage) -> Result<()> {
    if found != ARTIFACT_FORMAT_VERSION {
        return Err(RecError::IncompatibleArtifact {
            stage,
            message: format!(
                "format version {} is not supported (expected {})",
                found, ARTIFACT_FORMAT_VERSION
            ),
        });
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, value)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
