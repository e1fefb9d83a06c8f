//! Gradient-boosted decision trees for binary log-loss.
//!
//! Trees are grown leaf-wise on quantile-binned features; each tree predicts a log-odds
//! correction (learning rate already folded into its leaves) and the ensemble output is
//! `sigmoid(init_score + Σ tree(x))`.

pub mod binning;
pub mod booster;
pub mod grower;

pub use booster::{
    train_validation_split, EarlyStopping, RankerTrainer, TrainValidationSplit, TrainedRanker,
};

use crate::utils::metrics::sigmoid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        gain: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    pub fn leaf(value: f64) -> Self {
        Self {
            nodes: vec![TreeNode::Leaf { value }],
        }
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, TreeNode::Leaf { .. }))
            .count()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Trained ensemble. Immutable once returned by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    init_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GbdtModel {
    pub fn new(init_score: f64, n_features: usize, trees: Vec<RegressionTree>) -> Self {
        Self {
            init_score,
            n_features,
            trees,
        }
    }

    pub fn init_score(&self) -> f64 {
        self.init_score
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Log-odds before the sigmoid.
    pub fn predict_raw(&self, features: &[f64]) -> f64 {
        // same accumulation order as the trainer's running scores
        self.trees
            .iter()
            .fold(self.init_score, |raw, tree| raw + tree.predict(features))
    }

    /// Probability of the positive class, in [0, 1].
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        sigmoid(self.predict_raw(features))
    }

    /// Keeps only the first `n_trees` boosting rounds.
    pub fn truncated(mut self, n_trees: usize) -> Self {
        self.trees.truncate(n_trees);
        self
    }

    /// Total split gain per feature.
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut importance = vec![0.0; self.n_features];
        for tree in &self.trees {
            for node in tree.nodes() {
                if let TreeNode::Split { feature, gain, .. } = node {
                    importance[*feature] += gain;
                }
            }
        }
        importance
    }
}
