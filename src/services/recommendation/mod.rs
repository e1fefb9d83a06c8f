use crate::algorithms::{CandidateSource, Scorer};
use crate::config::ColumnSchema;
use crate::error::{RecError, Result, Stage};
use crate::models::{FeatureTable, RankedItem};
use crate::utils::validation::{as_index, validate_schema};
use std::collections::HashMap;
use tracing::debug;

/// Builds ranking feature vectors for (user, item) pairs that may never have co-occurred.
///
/// User and context columns come from the user's most recent row, item columns from the
/// item's most recent row, so the assembled vector follows the schema order
/// context, user, item.
#[derive(Debug, Clone)]
pub struct FeatureAssembler {
    columns: Vec<String>,
    user_values: HashMap<usize, Vec<f64>>,
    item_values: HashMap<usize, Vec<f64>>,
}

impl FeatureAssembler {
    pub fn from_table(table: &FeatureTable, schema: &ColumnSchema) -> Result<Self> {
        validate_schema(table, schema)?;
        let user_side: Vec<String> = schema
            .context_features
            .iter()
            .chain(&schema.user_features)
            .cloned()
            .collect();
        let user_block = table.select(&user_side)?;
        let item_block = table.select(&schema.item_features)?;
        let users = table.column(&schema.user_column)?;
        let items = table.column(&schema.item_column)?;

        let mut user_values = HashMap::new();
        let mut item_values = HashMap::new();
        // later rows overwrite earlier ones
        for row in 0..table.n_rows() {
            if let (Some(user), Some(item)) = (as_index(users[row]), as_index(items[row])) {
                user_values.insert(user, user_block.row(row).to_vec());
                item_values.insert(item, item_block.row(row).to_vec());
            }
        }

        debug!(
            "Feature assembler covers {} users and {} items",
            user_values.len(),
            item_values.len()
        );
        Ok(Self {
            columns: schema.ranking_features(),
            user_values,
            item_values,
        })
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Column names of the assembled vectors, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fails unless `expected` names the assembled columns in the same order.
    pub fn check_columns(&self, expected: &[String]) -> Result<()> {
        if self.columns != expected {
            return Err(RecError::IncompatibleArtifact {
                stage: Stage::Scoring,
                message: format!(
                    "ranking model expects columns {:?}, feature table provides {:?}",
                    expected, self.columns
                ),
            });
        }
        Ok(())
    }

    pub fn assemble(&self, user_id: usize, item_id: usize) -> Result<Vec<f64>> {
        let user = self.user_values.get(&user_id).ok_or_else(|| {
            RecError::schema(Stage::Scoring, format!("no metadata for user {}", user_id))
        })?;
        let item = self.item_values.get(&item_id).ok_or_else(|| {
            RecError::schema(Stage::Scoring, format!("no metadata for item {}", item_id))
        })?;
        let mut features = Vec::with_capacity(self.columns.len());
        features.extend_from_slice(user);
        features.extend_from_slice(item);
        Ok(features)
    }
}

/// Composes the two stages: retrieval for recall over the catalogue, ranking for
/// precision over the short list. Final order comes from the ranking probability alone;
/// retrieval score only breaks exact ties.
pub struct Recommender<'a, C: CandidateSource, S: Scorer> {
    candidates: &'a C,
    scorer: &'a S,
    assembler: &'a FeatureAssembler,
    pool_size: usize,
}

impl<'a, C: CandidateSource, S: Scorer> Recommender<'a, C, S> {
    pub fn new(
        candidates: &'a C,
        scorer: &'a S,
        assembler: &'a FeatureAssembler,
        pool_size: usize,
    ) -> Result<Self> {
        if scorer.n_features() != assembler.n_features() {
            return Err(RecError::dimension_mismatch(
                Stage::Scoring,
                "ranking feature vector",
                scorer.n_features(),
                assembler.n_features(),
            ));
        }
        if let Some(columns) = scorer.feature_columns() {
            assembler.check_columns(columns)?;
        }
        Ok(Self {
            candidates,
            scorer,
            assembler,
            pool_size,
        })
    }

    /// Top `n` candidates re-ordered by ranking probability.
    pub fn recommend_scored(&self, user_id: usize, n: usize) -> Result<Vec<RankedItem>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let pool = self.candidates.get_candidates(user_id, n.max(self.pool_size))?;

        let mut ranked = pool
            .into_iter()
            .map(|candidate| {
                let features = self.assembler.assemble(user_id, candidate.item_id)?;
                Ok(RankedItem {
                    item_id: candidate.item_id,
                    retrieval_score: candidate.score,
                    rank_score: self.scorer.score(&features)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ranked.sort_by(|a, b| {
            b.rank_score
                .total_cmp(&a.rank_score)
                .then_with(|| b.retrieval_score.total_cmp(&a.retrieval_score))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        ranked.truncate(n);
        debug!("Ranked {} items for user {}", ranked.len(), user_id);
        Ok(ranked)
    }

    pub fn recommend(&self, user_id: usize, n: usize) -> Result<Vec<usize>> {
        Ok(self
            .recommend_scored(user_id, n)?
            .into_iter()
            .map(|item| item.item_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::gbdt::RegressionTree;
    use crate::algorithms::GbdtModel;
    use crate::config::RankingConfig;
    use crate::models::{Candidate, RankingArtifact};
    use uuid::Uuid;

    struct FixedCandidates(Vec<Candidate>);

    impl CandidateSource for FixedCandidates {
        fn get_candidates(&self, _user_id: usize, n: usize) -> Result<Vec<Candidate>> {
            Ok(self.0.iter().take(n).copied().collect())
        }
    }

    /// Scores by the last feature, which the schema below makes the item's "quality".
    struct LastFeature;

    impl Scorer for LastFeature {
        fn score(&self, features: &[f64]) -> Result<f64> {
            Ok(features[features.len() - 1])
        }

        fn n_features(&self) -> usize {
            2
        }
    }

    fn schema() -> ColumnSchema {
        ColumnSchema {
            user_column: "user".into(),
            item_column: "item".into(),
            label_column: "label".into(),
            context_features: vec![],
            user_features: vec!["age".into()],
            item_features: vec!["quality".into()],
        }
    }

    fn table() -> FeatureTable {
        let columns = ["user", "item", "label", "age", "quality"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        FeatureTable::from_rows(
            columns,
            &[
                vec![0.0, 0.0, 1.0, 20.0, 0.1],
                vec![0.0, 1.0, 0.0, 21.0, 0.9],
                vec![1.0, 2.0, 1.0, 40.0, 0.5],
                vec![1.0, 3.0, 1.0, 40.0, 0.5],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_assembler_uses_latest_rows() {
        let assembler = FeatureAssembler::from_table(&table(), &schema()).unwrap();
        assert_eq!(assembler.assemble(0, 3).unwrap(), vec![21.0, 0.5]);
        assert!(matches!(
            assembler.assemble(9, 0),
            Err(RecError::Schema { stage: Stage::Scoring, .. })
        ));
    }

    #[test]
    fn test_reorders_by_rank_score_not_retrieval_score() {
        let assembler = FeatureAssembler::from_table(&table(), &schema()).unwrap();
        let candidates = FixedCandidates(vec![
            Candidate { item_id: 0, score: 3.0 },
            Candidate { item_id: 2, score: 2.0 },
            Candidate { item_id: 3, score: 2.5 },
            Candidate { item_id: 1, score: 1.0 },
        ]);
        let recommender = Recommender::new(&candidates, &LastFeature, &assembler, 10).unwrap();

        // item 1 has the best quality; 2 and 3 tie on quality and fall back to retrieval score
        assert_eq!(recommender.recommend(1, 3).unwrap(), vec![1, 3, 2]);
        let scored = recommender.recommend_scored(1, 4).unwrap();
        assert_eq!(scored.last().map(|r| r.item_id), Some(0));
        assert_eq!(scored[0].retrieval_score, 1.0);
    }

    #[test]
    fn test_rejects_scorer_with_other_width() {
        struct Wide;
        impl Scorer for Wide {
            fn score(&self, _features: &[f64]) -> Result<f64> {
                Ok(0.0)
            }
            fn n_features(&self) -> usize {
                5
            }
        }
        let assembler = FeatureAssembler::from_table(&table(), &schema()).unwrap();
        let candidates = FixedCandidates(vec![]);
        assert!(Recommender::new(&candidates, &Wide, &assembler, 10).is_err());
    }

    fn ranking_artifact(columns: &[&str]) -> RankingArtifact {
        let model = GbdtModel::new(0.0, columns.len(), vec![RegressionTree::leaf(0.0)]);
        RankingArtifact::new(
            Uuid::new_v4(),
            RankingConfig::default(),
            columns.iter().map(|c| c.to_string()).collect(),
            0.5,
            0.7,
            0,
            model,
        )
        .unwrap()
    }

    #[test]
    fn test_accepts_artifact_with_matching_column_order() {
        let assembler = FeatureAssembler::from_table(&table(), &schema()).unwrap();
        assert_eq!(assembler.columns(), ["age".to_string(), "quality".to_string()]);

        let artifact = ranking_artifact(&["age", "quality"]);
        let candidates = FixedCandidates(vec![Candidate { item_id: 2, score: 1.0 }]);
        let recommender = Recommender::new(&candidates, &artifact, &assembler, 10).unwrap();
        assert_eq!(recommender.recommend(1, 1).unwrap(), vec![2]);
    }

    #[test]
    fn test_rejects_artifact_with_swapped_columns() {
        let mut swapped = schema();
        swapped.user_features = vec!["quality".into()];
        swapped.item_features = vec!["age".into()];
        let assembler = FeatureAssembler::from_table(&table(), &swapped).unwrap();

        // same width, different order: scoring would silently read the wrong columns
        let artifact = ranking_artifact(&["age", "quality"]);
        let candidates = FixedCandidates(vec![Candidate { item_id: 2, score: 1.0 }]);
        assert!(matches!(
            Recommender::new(&candidates, &artifact, &assembler, 10),
            Err(RecError::IncompatibleArtifact { stage: Stage::Scoring, .. })
        ));
        assert!(assembler.check_columns(artifact.feature_columns.as_slice()).is_err());
    }
}
