pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{ColdStart, RecError, Result, Stage};
pub use models::*;
pub use services::recommendation::{FeatureAssembler, Recommender};
pub use services::training::{TrainedArtifacts, TrainingPipeline};
pub use utils::AbortHandle;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
