use replayrec::algorithms::{CandidateSource, FactorRetriever, InteractionMatrix};
use replayrec::config::{AlsConfig, RankingConfig};
use replayrec::*;
use std::io::Write;

const COLUMNS: [&str; 13] = [
    "msno",
    "song_id",
    "target",
    "source_system_tab",
    "source_screen_name",
    "source_type",
    "city",
    "bd",
    "gender",
    "registered_via",
    "account_age",
    "artist_name",
    "song_length",
];

fn row(user: usize, item: usize, label: f64) -> Vec<f64> {
    let artist = if item <= 2 { 7.0 } else { 9.0 };
    vec![
        user as f64,
        item as f64,
        label,
        1.0,
        2.0,
        3.0,
        (user + 1) as f64,
        20.0 + user as f64,
        1.0,
        4.0,
        100.0 * (user + 1) as f64,
        artist,
        200_000.0 + 1_000.0 * item as f64,
    ]
}

/// 3 users, 5 items. Users 1 and 2 replay items {0, 1, 2}; user 0 replays item 2, so it
/// belongs to the same taste cluster. Items 3 and 4 are only ever skipped.
fn toy_rows() -> Vec<Vec<f64>> {
    let mut rows = Vec::new();
    for _ in 0..8 {
        for user in [1, 2] {
            for item in 0..3 {
                rows.push(row(user, item, 1.0));
            }
            for item in 3..5 {
                rows.push(row(user, item, 0.0));
            }
        }
        rows.push(row(0, 2, 1.0));
        rows.push(row(0, 2, 1.0));
    }
    rows
}

fn toy_table() -> FeatureTable {
    FeatureTable::from_rows(column_names(), &toy_rows()).unwrap()
}

fn column_names() -> Vec<String> {
    COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn toy_config() -> Config {
    let mut config = Config::default();
    config.als = AlsConfig {
        factors: 4,
        iterations: 15,
        num_threads: 2,
        ..AlsConfig::default()
    };
    config.ranking = RankingConfig {
        num_boost_round: 50,
        early_stopping_rounds: 10,
        learning_rate: 0.3,
        num_leaves: 4,
        min_data_in_leaf: 2,
        ..RankingConfig::default()
    };
    config
}

#[test]
fn test_recommend_ranks_taste_cluster_above_unrelated_items() {
    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    let artifacts = pipeline.run(&toy_table(), &AbortHandle::new()).unwrap();

    assert!((0.0..=1.0).contains(&artifacts.ranking.validation_auc));
    assert_eq!(artifacts.retrieval.n_users, 3);
    assert_eq!(artifacts.retrieval.n_items, 5);
    assert_eq!(artifacts.retrieval.run_id, artifacts.ranking.run_id);

    let items = pipeline.recommend(&artifacts, 0, 3).unwrap();
    assert_eq!(items.len(), 3);
    assert!(!items.contains(&2), "already replayed item must not be recommended");

    let position = |item: usize| items.iter().position(|&i| i == item).unwrap_or(usize::MAX);
    for preferred in [0, 1] {
        for unrelated in [3, 4] {
            assert!(position(preferred) < position(unrelated), "{:?}", items);
        }
    }
}

#[test]
fn test_retrieval_excludes_seen_items_and_is_stable() {
    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    let artifacts = pipeline.run(&toy_table(), &AbortHandle::new()).unwrap();
    let retriever = artifacts.retriever().unwrap();

    let first = retriever.get_candidates(1, 10).unwrap();
    let ids: Vec<usize> = first.iter().map(|c| c.item_id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| *id == 3 || *id == 4));
    assert_eq!(first, retriever.get_candidates(1, 10).unwrap());
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_unknown_users_are_reported() {
    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    let artifacts = pipeline.run(&toy_table(), &AbortHandle::new()).unwrap();

    let err = pipeline.recommend(&artifacts, 3, 5).unwrap_err();
    assert!(matches!(
        err,
        RecError::UnknownUser { user: 3, reason: ColdStart::OutOfRange }
    ));
    assert_eq!(err.stage(), Some(Stage::Retrieval));
}

#[test]
fn test_artifacts_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("train_cleaned.csv");
    {
        let mut file = std::fs::File::create(&csv_path).unwrap();
        writeln!(file, "{}", COLUMNS.join(",")).unwrap();
        for values in toy_rows() {
            let cells: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            writeln!(file, "{}", cells.join(",")).unwrap();
        }
    }

    let mut config = toy_config();
    config.data.table_path = csv_path.clone();
    config.artifacts.dir = dir.path().join("artifacts");

    let table = FeatureTable::from_csv(&csv_path).unwrap();
    assert_eq!(table, toy_table());

    let pipeline = TrainingPipeline::new(config.clone()).unwrap();
    let artifacts = pipeline.run(&table, &AbortHandle::new()).unwrap();
    artifacts.save(&config.artifacts).unwrap();
    let expected = pipeline.recommend(&artifacts, 0, 3).unwrap();

    let retrieval = RetrievalArtifact::load_json(config.artifacts.retrieval_path()).unwrap();
    let ranking = RankingArtifact::load_json(config.artifacts.ranking_path()).unwrap();
    assert_eq!(ranking.feature_columns, config.data.schema.ranking_features());

    let weights = ConfidenceWeights::default();
    let interactions =
        InteractionMatrix::from_table(&table, &config.data.schema, &weights).unwrap();
    retrieval.validate_against(&interactions).unwrap();
    let assembler = FeatureAssembler::from_table(&table, &config.data.schema).unwrap();
    let retriever = FactorRetriever::new(retrieval.latent(), &interactions).unwrap();
    let recommender =
        Recommender::new(&retriever, &ranking, &assembler, config.retrieval.top_n).unwrap();

    assert_eq!(recommender.recommend(0, 3).unwrap(), expected);
}

#[test]
fn test_reloaded_factors_reject_grown_catalogue() {
    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    let artifacts = pipeline.run(&toy_table(), &AbortHandle::new()).unwrap();

    let mut rows = toy_rows();
    rows.push(row(0, 7, 1.0));
    let grown = FeatureTable::from_rows(column_names(), &rows).unwrap();
    let weights = ConfidenceWeights::default();
    let interactions =
        InteractionMatrix::from_table(&grown, &toy_config().data.schema, &weights).unwrap();

    assert!(matches!(
        artifacts.retrieval.validate_against(&interactions),
        Err(RecError::DimensionMismatch { stage: Stage::Retrieval, .. })
    ));
}

#[test]
fn test_missing_column_fails_before_training() {
    let columns: Vec<String> = column_names()
        .into_iter()
        .filter(|c| c != "song_length")
        .collect();
    let rows: Vec<Vec<f64>> = toy_rows()
        .into_iter()
        .map(|mut r| {
            r.pop();
            r
        })
        .collect();
    let table = FeatureTable::from_rows(columns, &rows).unwrap();

    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    let err = pipeline.run(&table, &AbortHandle::new()).unwrap_err();
    assert!(matches!(err, RecError::Schema { .. }));
    assert!(err.to_string().contains("song_length"));
}

#[test]
fn test_abort_returns_no_artifacts() {
    let abort = AbortHandle::new();
    abort.abort();
    let pipeline = TrainingPipeline::new(toy_config()).unwrap();
    assert!(matches!(
        pipeline.run(&toy_table(), &abort),
        Err(RecError::Aborted { .. })
    ));
}
