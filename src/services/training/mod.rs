use crate::algorithms::{AlsTrainer, FactorRetriever, InteractionMatrix, RankerTrainer};
use crate::config::{ArtifactConfig, Config};
use crate::error::Result;
use crate::models::{ConfidenceWeights, FeatureTable, RankingArtifact, RetrievalArtifact};
use crate::services::recommendation::{FeatureAssembler, Recommender};
use crate::utils::validation::validate_schema;
use crate::utils::AbortHandle;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Everything produced by one training run. Artifacts are immutable values; several runs
/// can be held side by side and handed to separate recommenders.
#[derive(Debug, Clone)]
pub struct TrainedArtifacts {
    pub retrieval: RetrievalArtifact,
    pub ranking: RankingArtifact,
    pub interactions: InteractionMatrix,
    pub assembler: FeatureAssembler,
}

impl TrainedArtifacts {
    pub fn save(&self, artifacts: &ArtifactConfig) -> Result<()> {
        self.retrieval.save_json(artifacts.retrieval_path())?;
        self.ranking.save_json(artifacts.ranking_path())?;
        Ok(())
    }

    pub fn retriever(&self) -> Result<FactorRetriever<'_>> {
        FactorRetriever::new(self.retrieval.latent(), &self.interactions)
    }
}

/// Runs both stages over one feature table.
pub struct TrainingPipeline {
    config: Config,
}

impl TrainingPipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, table: &FeatureTable, abort: &AbortHandle) -> Result<TrainedArtifacts> {
        let started = Instant::now();
        let schema = &self.config.data.schema;
        validate_schema(table, schema)?;

        let weights = ConfidenceWeights {
            positive: self.config.data.positive_weight,
            negative: self.config.data.negative_weight,
        };
        let interactions = InteractionMatrix::from_table(table, schema, &weights)?;
        let assembler = FeatureAssembler::from_table(table, schema)?;

        let als = AlsTrainer::new(self.config.als.clone())?;
        let ranker = RankerTrainer::new(self.config.ranking.clone())?;

        // the stages share no state, so they train side by side
        let (retrieval, ranking) = rayon::join(
            || als.fit_with_abort(&interactions, abort),
            || ranker.train_table(table, schema, abort),
        );
        let (latent, report) = retrieval?;
        let trained = ranking?;

        let run_id = Uuid::new_v4();
        let retrieval = RetrievalArtifact::new(run_id, self.config.als.clone(), report, latent);
        retrieval.validate_against(&interactions)?;
        let ranking = RankingArtifact::new(
            run_id,
            self.config.ranking.clone(),
            schema.ranking_features(),
            trained.validation_auc,
            trained.validation_log_loss,
            trained.best_iteration,
            trained.model,
        )?;

        info!(
            "Training run {} finished in {:?}: ALS objective {:.4}, validation AUC {:.4}",
            run_id,
            started.elapsed(),
            retrieval.report.final_objective(),
            ranking.validation_auc
        );
        for (feature, gain) in ranking.feature_importance() {
            info!("  feature importance {:<24} {:.4}", feature, gain);
        }

        Ok(TrainedArtifacts {
            retrieval,
            ranking,
            interactions,
            assembler,
        })
    }

    /// Recommends for `user_id` with freshly trained artifacts.
    pub fn recommend(
        &self,
        artifacts: &TrainedArtifacts,
        user_id: usize,
        n: usize,
    ) -> Result<Vec<usize>> {
        let retriever = artifacts.retriever()?;
        let recommender = Recommender::new(
            &retriever,
            &artifacts.ranking,
            &artifacts.assembler,
            self.config.retrieval.top_n,
        )?;
        recommender.recommend(user_id, n)
    }
}
