use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use replayrec::algorithms::{FactorRetriever, InteractionMatrix};
use replayrec::{
    init_tracing, ConfidenceWeights, Config, FeatureAssembler, FeatureTable, RankingArtifact,
    RecError, RecommendationResponse, Recommender, RetrievalArtifact,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Recommend songs from persisted artifacts", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Cleaned feature table the artifacts were trained on; overrides data.table_path
    #[arg(short, long)]
    table: Option<PathBuf>,

    /// Artifact directory; overrides artifacts.dir
    #[arg(short, long)]
    artifacts: Option<PathBuf>,

    #[arg(short, long)]
    user: usize,

    #[arg(short, long, default_value_t = 10)]
    n: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        Config::default()
    };
    if let Some(table) = args.table {
        config.data.table_path = table;
    }
    if let Some(dir) = args.artifacts {
        config.artifacts.dir = dir;
    }

    let retrieval = RetrievalArtifact::load_json(config.artifacts.retrieval_path())
        .context("loading retrieval artifact")?;
    let ranking = RankingArtifact::load_json(config.artifacts.ranking_path())
        .context("loading ranking artifact")?;
    let table = FeatureTable::from_csv_limited(&config.data.table_path, config.data.sample_size)?;
    let weights = ConfidenceWeights {
        positive: config.data.positive_weight,
        negative: config.data.negative_weight,
    };
    let interactions = InteractionMatrix::from_table(&table, &config.data.schema, &weights)?;
    retrieval.validate_against(&interactions)?;
    let assembler = FeatureAssembler::from_table(&table, &config.data.schema)?;
    assembler
        .check_columns(&ranking.feature_columns)
        .context("configured ranking columns differ from the ranking artifact")?;

    let retriever = FactorRetriever::new(retrieval.latent(), &interactions)?;
    let recommender = Recommender::new(&retriever, &ranking, &assembler, config.retrieval.top_n)?;

    let recommendations = match recommender.recommend_scored(args.user, args.n) {
        Ok(items) => items,
        Err(err @ RecError::UnknownUser { .. }) => {
            // the fallback for cold-start users is the caller's decision
            warn!("{}", err);
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    info!("Recommended {} items for user {}", recommendations.len(), args.user);

    let response = RecommendationResponse {
        user_id: args.user,
        recommendations,
        retrieval_run_id: retrieval.run_id,
        ranking_run_id: ranking.run_id,
        generated_at: Utc::now(),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
