use super::binning::BinnedMatrix;
use super::grower::{GrowthParams, TreeGrower};
use super::GbdtModel;
use crate::config::{ColumnSchema, RankingConfig};
use crate::error::{RecError, Result, Stage};
use crate::models::FeatureTable;
use crate::utils::metrics::{log_loss, roc_auc, sigmoid};
use crate::utils::validation::as_label;
use crate::utils::AbortHandle;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Row indices of the training and validation partitions, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainValidationSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Seeded shuffle split; the validation partition holds `ceil(n_rows * validation_fraction)` rows.
pub fn train_validation_split(
    n_rows: usize,
    validation_fraction: f64,
    seed: u64,
) -> TrainValidationSplit {
    let mut order: Vec<usize> = (0..n_rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_validation = ((n_rows as f64 * validation_fraction).ceil() as usize).min(n_rows);
    let mut validation = order[..n_validation].to_vec();
    let mut train = order[n_validation..].to_vec();
    validation.sort_unstable();
    train.sort_unstable();
    TrainValidationSplit { train, validation }
}

/// Tracks the best validation score and signals when `patience` rounds pass without improvement.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_score: f64,
    best_round: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_score: f64::NEG_INFINITY,
            best_round: None,
        }
    }

    /// Records the score of `round` (0-based); returns true when training should stop.
    pub fn update(&mut self, round: usize, score: f64) -> bool {
        if score > self.best_score {
            self.best_score = score;
            self.best_round = Some(round);
        }
        match self.best_round {
            Some(best) => round - best >= self.patience,
            None => round + 1 >= self.patience,
        }
    }

    pub fn best_round(&self) -> Option<usize> {
        self.best_round
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }
}

/// Output of ranker training: the model truncated to its best round plus validation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedRanker {
    pub model: GbdtModel,
    pub validation_auc: f64,
    pub validation_log_loss: f64,
    /// 0-based round whose checkpoint was kept.
    pub best_iteration: usize,
    pub rounds_trained: usize,
    /// Validation AUC after every trained round, including those discarded by early stopping.
    pub validation_auc_history: Vec<f64>,
    pub split: TrainValidationSplit,
}

#[derive(Debug, Clone)]
pub struct RankerTrainer {
    config: RankingConfig,
}

impl RankerTrainer {
    pub fn new(config: RankingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Trains on the schema's ranking feature columns; identifier columns are never used.
    pub fn train_table(
        &self,
        table: &FeatureTable,
        schema: &ColumnSchema,
        abort: &AbortHandle,
    ) -> Result<TrainedRanker> {
        let features = table.select(&schema.ranking_features()).map_err(|e| match e {
            RecError::Schema { message, .. } => RecError::schema(Stage::Ranking, message),
            other => other,
        })?;
        let labels = table
            .column(&schema.label_column)
            .map_err(|_| {
                RecError::schema(
                    Stage::Ranking,
                    format!("missing label column '{}'", schema.label_column),
                )
            })?
            .to_vec();
        self.train(&features, &labels, abort)
    }

    pub fn train(
        &self,
        features: &Array2<f64>,
        labels: &[f64],
        abort: &AbortHandle,
    ) -> Result<TrainedRanker> {
        if features.nrows() != labels.len() {
            return Err(RecError::dimension_mismatch(
                Stage::Ranking,
                "label rows",
                features.nrows(),
                labels.len(),
            ));
        }
        if features.ncols() == 0 {
            return Err(RecError::schema(Stage::Ranking, "no ranking feature columns"));
        }
        if let Some(row) = labels.iter().position(|&y| as_label(y).is_none()) {
            return Err(RecError::schema(
                Stage::Ranking,
                format!("label at row {} is not 0 or 1", row),
            ));
        }

        let config = &self.config;
        let split = train_validation_split(labels.len(), config.validation_fraction, config.seed);
        if split.train.is_empty() || split.validation.is_empty() {
            return Err(RecError::InsufficientData(format!(
                "train/validation partitions have {} and {} rows",
                split.train.len(),
                split.validation.len()
            )));
        }

        let train_x = features.select(Axis(0), &split.train);
        let valid_x = features.select(Axis(0), &split.validation);
        let train_y: Vec<f64> = split.train.iter().map(|&r| labels[r]).collect();
        let valid_y: Vec<f64> = split.validation.iter().map(|&r| labels[r]).collect();
        for (name, partition) in [("training", &train_y), ("validation", &valid_y)] {
            if is_constant(partition) {
                return Err(RecError::InsufficientData(format!(
                    "label is constant in the {} partition, AUC is undefined",
                    name
                )));
            }
        }

        info!(
            "Training ranker on {} rows ({} validation), {} features, up to {} rounds",
            train_y.len(),
            valid_y.len(),
            features.ncols(),
            config.num_boost_round
        );

        let binned = BinnedMatrix::build(&train_x, config.max_bin);
        let base_rate = train_y.iter().sum::<f64>() / train_y.len() as f64;
        let init_score = (base_rate / (1.0 - base_rate)).ln();

        let mut train_raw = vec![init_score; train_y.len()];
        let mut valid_raw = vec![init_score; valid_y.len()];
        let mut gradients = vec![0.0; train_y.len()];
        let mut hessians = vec![0.0; train_y.len()];

        let growth = GrowthParams {
            num_leaves: config.num_leaves,
            max_depth: config.max_depth,
            min_data_in_leaf: config.min_data_in_leaf,
            min_sum_hessian_in_leaf: config.min_sum_hessian_in_leaf,
            lambda_l2: config.lambda_l2,
            min_gain_to_split: config.min_gain_to_split,
            learning_rate: config.learning_rate,
        };

        let n_features = features.ncols();
        let features_per_tree =
            ((n_features as f64 * config.feature_fraction).ceil() as usize).clamp(1, n_features);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut bag: Vec<usize> = (0..train_y.len()).collect();
        let mut stopper = EarlyStopping::new(config.early_stopping_rounds);
        let mut trees = Vec::new();
        let mut history = Vec::new();
        let train_rows = to_rows(&train_x);
        let valid_rows = to_rows(&valid_x);
        let started = Instant::now();

        for round in 0..config.num_boost_round {
            if abort.is_aborted() {
                warn!("Ranker training aborted at round {}", round);
                return Err(RecError::Aborted { stage: Stage::Ranking });
            }

            for (row, raw) in train_raw.iter().enumerate() {
                let p = sigmoid(*raw);
                gradients[row] = p - train_y[row];
                hessians[row] = (p * (1.0 - p)).max(1e-16);
            }

            let bagging = config.bagging_fraction < 1.0 && config.bagging_freq > 0;
            if bagging && round % config.bagging_freq == 0 {
                let size =
                    ((train_y.len() as f64 * config.bagging_fraction).ceil() as usize).max(1);
                bag = index::sample(&mut rng, train_y.len(), size).into_vec();
                bag.sort_unstable();
            }
            let mut tree_features =
                index::sample(&mut rng, n_features, features_per_tree).into_vec();
            tree_features.sort_unstable();

            let tree = TreeGrower::new(&binned, &gradients, &hessians, &tree_features, growth)
                .grow(bag.clone());

            for (raw, x) in train_raw.iter_mut().zip(&train_rows) {
                *raw += tree.predict(x);
            }
            for (raw, x) in valid_raw.iter_mut().zip(&valid_rows) {
                *raw += tree.predict(x);
            }
            trees.push(tree);

            // both classes are present in validation, so AUC is always defined here
            let auc = roc_auc(&valid_y, &valid_raw).unwrap_or(0.5);
            history.push(auc);
            debug!("Ranker round {}: validation AUC {:.6}", round, auc);
            if stopper.update(round, auc) {
                info!(
                    "Early stopping at round {}: best round {:?} with AUC {:.6}",
                    round,
                    stopper.best_round(),
                    stopper.best_score()
                );
                break;
            }
        }

        let rounds_trained = trees.len();
        let best_iteration = stopper.best_round().unwrap_or(rounds_trained.saturating_sub(1));
        let model = GbdtModel::new(init_score, n_features, trees).truncated(best_iteration + 1);

        let raw_scores: Vec<f64> = valid_rows.iter().map(|x| model.predict_raw(x)).collect();
        let validation_auc = roc_auc(&valid_y, &raw_scores)
            .ok_or_else(|| RecError::InsufficientData("validation AUC undefined".into()))?;
        let probabilities: Vec<f64> = raw_scores.iter().map(|&raw| sigmoid(raw)).collect();
        let validation_log_loss = log_loss(&valid_y, &probabilities);

        info!(
            "Ranker trained in {:?}: {} rounds, kept {}, validation AUC {:.4}, log loss {:.4}",
            started.elapsed(),
            rounds_trained,
            model.n_trees(),
            validation_auc,
            validation_log_loss
        );

        Ok(TrainedRanker {
            model,
            validation_auc,
            validation_log_loss,
            best_iteration,
            rounds_trained,
            validation_auc_history: history,
            split,
        })
    }
}

fn is_constant(labels: &[f64]) -> bool {
    labels.windows(2).all(|pair| pair[0] == pair[1])
}

fn to_rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}
