use anyhow::{Context, Result};
use clap::Parser;
use replayrec::{init_tracing, AbortHandle, Config, FeatureTable, TrainingPipeline};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the retrieval and ranking stages", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Cleaned feature table; overrides data.table_path
    #[arg(short, long)]
    table: Option<PathBuf>,

    /// Artifact directory; overrides artifacts.dir
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print recommendations for this user after training
    #[arg(long)]
    sample_user: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting ReplayRec training run");

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    if let Some(table) = args.table {
        config.data.table_path = table;
    }
    if let Some(out) = args.out {
        config.artifacts.dir = out;
    }
    info!("ALS configuration: {:?}", config.als);
    info!("Ranking configuration: {:?}", config.ranking);

    let table = FeatureTable::from_csv_limited(&config.data.table_path, config.data.sample_size)
        .with_context(|| format!("loading {}", config.data.table_path.display()))?;

    let pipeline = TrainingPipeline::new(config.clone())?;
    let artifacts = pipeline.run(&table, &AbortHandle::new())?;
    artifacts.save(&config.artifacts)?;

    info!(
        "Validation AUC {:.4} (best iteration {})",
        artifacts.ranking.validation_auc, artifacts.ranking.best_iteration
    );

    if let Some(user) = args.sample_user {
        let items = pipeline.recommend(&artifacts, user, 10)?;
        info!("Top recommendations for user {}: {:?}", user, items);
    }

    Ok(())
}
