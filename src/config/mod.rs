use crate::error::{RecError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub als: AlsConfig,
    pub retrieval: RetrievalConfig,
    pub ranking: RankingConfig,
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub table_path: PathBuf,
    pub schema: ColumnSchema,
    /// Confidence added per positive (replayed) interaction.
    pub positive_weight: f64,
    /// Confidence added per negative interaction; 0 means negatives never enter the matrix.
    pub negative_weight: f64,
    /// Reads only the first `sample_size` rows of the table when set.
    pub sample_size: Option<usize>,
}

/// Column names of the cleaned feature table.
///
/// Ranking features are grouped by the entity they describe; the ranker sees them
/// in the order context, user, item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnSchema {
    pub user_column: String,
    pub item_column: String,
    pub label_column: String,
    pub context_features: Vec<String>,
    pub user_features: Vec<String>,
    pub item_features: Vec<String>,
}

impl ColumnSchema {
    pub fn ranking_features(&self) -> Vec<String> {
        self.context_features
            .iter()
            .chain(&self.user_features)
            .chain(&self.item_features)
            .cloned()
            .collect()
    }

    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.user_column.clone(),
            self.item_column.clone(),
            self.label_column.clone(),
        ];
        columns.extend(self.ranking_features());
        columns
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlsConfig {
    pub factors: usize,
    pub iterations: usize,
    pub regularization: f64,
    /// Scale applied to accumulated confidence: c(u,i) = 1 + alpha * confidence(u,i).
    pub alpha: f64,
    /// Relative objective change below which training stops early. None runs all iterations.
    pub convergence_threshold: Option<f64>,
    pub seed: u64,
    /// Worker threads for the per-row solves; 0 uses every core.
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub num_boost_round: usize,
    pub early_stopping_rounds: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian_in_leaf: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: usize,
    pub max_bin: usize,
    pub validation_fraction: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub retrieval_file: String,
    pub ranking_file: String,
}

impl ArtifactConfig {
    pub fn retrieval_path(&self) -> PathBuf {
        self.dir.join(&self.retrieval_file)
    }

    pub fn ranking_path(&self) -> PathBuf {
        self.dir.join(&self.ranking_file)
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("data/processed/train_cleaned.csv"),
            schema: ColumnSchema::default(),
            positive_weight: 1.0,
            negative_weight: 0.0,
            sample_size: None,
        }
    }
}

impl Default for ColumnSchema {
    fn default() -> Self {
        let names = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect();
        Self {
            user_column: "msno".to_string(),
            item_column: "song_id".to_string(),
            label_column: "target".to_string(),
            context_features: names(&["source_system_tab", "source_screen_name", "source_type"]),
            user_features: names(&["city", "bd", "gender", "registered_via", "account_age"]),
            item_features: names(&["artist_name", "song_length"]),
        }
    }
}

impl Default for AlsConfig {
    fn default() -> Self {
        Self {
            factors: 64,
            iterations: 20,
            regularization: 0.1,
            alpha: 1.0,
            convergence_threshold: None,
            seed: 42,
            num_threads: 0,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_n: 100 }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            num_boost_round: 1000,
            early_stopping_rounds: 50,
            learning_rate: 0.05,
            num_leaves: 31,
            max_depth: None,
            min_data_in_leaf: 20,
            min_sum_hessian_in_leaf: 1e-3,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
            feature_fraction: 0.9,
            bagging_fraction: 0.8,
            bagging_freq: 5,
            max_bin: 255,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            retrieval_file: "retrieval.json".to_string(),
            ranking_file: "ranking.json".to_string(),
        }
    }
}

impl AlsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.factors == 0 {
            return Err(RecError::InvalidConfig("als.factors must be positive".into()));
        }
        if !(self.regularization > 0.0) {
            return Err(RecError::InvalidConfig(
                "als.regularization must be > 0 to keep the per-row systems positive definite"
                    .into(),
            ));
        }
        if !(self.alpha >= 0.0) {
            return Err(RecError::InvalidConfig("als.alpha must be non-negative".into()));
        }
        if let Some(threshold) = self.convergence_threshold {
            if !(threshold > 0.0) {
                return Err(RecError::InvalidConfig(
                    "als.convergence_threshold must be positive when set".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<()> {
        let fraction_ok = |f: f64| f > 0.0 && f <= 1.0;
        if self.num_boost_round == 0 {
            return Err(RecError::InvalidConfig("ranking.num_boost_round must be positive".into()));
        }
        if self.early_stopping_rounds == 0 {
            return Err(RecError::InvalidConfig(
                "ranking.early_stopping_rounds must be positive".into(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(RecError::InvalidConfig("ranking.learning_rate must be positive".into()));
        }
        if self.num_leaves < 2 {
            return Err(RecError::InvalidConfig("ranking.num_leaves must be at least 2".into()));
        }
        if self.max_bin < 2 || self.max_bin > 256 {
            return Err(RecError::InvalidConfig("ranking.max_bin must be within [2, 256]".into()));
        }
        if !fraction_ok(self.feature_fraction) || !fraction_ok(self.bagging_fraction) {
            return Err(RecError::InvalidConfig(
                "ranking sampling fractions must be within (0, 1]".into(),
            ));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(RecError::InvalidConfig(
                "ranking.validation_fraction must be within (0, 1)".into(),
            ));
        }
        if self.lambda_l2 < 0.0 || self.min_gain_to_split < 0.0 {
            return Err(RecError::InvalidConfig(
                "ranking regularisation terms must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("REPLAYREC").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.als.validate()?;
        self.ranking.validate()?;
        if self.retrieval.top_n == 0 {
            return Err(RecError::InvalidConfig("retrieval.top_n must be positive".into()));
        }
        if self.data.positive_weight < 0.0 || self.data.negative_weight < 0.0 {
            return Err(RecError::InvalidConfig("confidence weights must be non-negative".into()));
        }
        if self.data.sample_size == Some(0) {
            return Err(RecError::InvalidConfig(
                "data.sample_size must be positive when set".into(),
            ));
        }
        if self.data.schema.ranking_features().is_empty() {
            return Err(RecError::InvalidConfig("no ranking feature columns configured".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.als.factors, 64);
        assert_eq!(config.als.iterations, 20);
        assert_eq!(config.retrieval.top_n, 100);
        assert_eq!(config.ranking.early_stopping_rounds, 50);
        assert_eq!(config.data.schema.ranking_features().len(), 10);
    }

    #[test]
    fn test_rejects_zero_regularization() {
        let mut config = Config::default();
        config.als.regularization = 0.0;
        assert!(matches!(config.validate(), Err(RecError::InvalidConfig(_))));
    }

    #[test]
    fn test_ranking_feature_order() {
        let schema = ColumnSchema::default();
        let features = schema.ranking_features();
        assert_eq!(features.first().map(String::as_str), Some("source_system_tab"));
        assert_eq!(features.last().map(String::as_str), Some("song_length"));
        assert!(!features.contains(&schema.user_column));
        assert!(!features.contains(&schema.item_column));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replayrec.toml");
        std::fs::write(&path, "[als]\nfactors = 16\n\n[ranking]\nlearning_rate = 0.1\n").unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.als.factors, 16);
        assert_eq!(config.als.iterations, 20);
        assert_eq!(config.ranking.learning_rate, 0.1);
        assert_eq!(config.data.schema, ColumnSchema::default());
    }

    #[test]
    fn test_sample_size_is_read_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replayrec.toml");
        std::fs::write(&path, "[data]\nsample_size = 500000\n").unwrap();
        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.data.sample_size, Some(500_000));
        assert_eq!(Config::default().data.sample_size, None);

        let mut config = Config::default();
        config.data.sample_size = Some(0);
        assert!(matches!(config.validate(), Err(RecError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replayrec.toml");
        std::fs::write(&path, "[ranking]\nvalidation_fraction = 1.5\n").unwrap();
        assert!(Config::from_file(path.to_str().unwrap()).is_err());
    }
}
