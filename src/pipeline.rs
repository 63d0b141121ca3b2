//! The three batch stages wired over [`DataPaths`](crate::config::DataPaths).
//!
//! Every stage computes first and writes afterwards, so a failure leaves the
//! previous outputs of that stage untouched.

use std::time::Instant;

use thiserror::Error;

use crate::artifact::{persist, ArtifactError, ModelArtifact};
use crate::cleaning::{clean_source, CleanError, CleanReport};
use crate::config::{ConfigError, PipelineConfig};
use crate::dataset::{read_dataset_csv, DatasetError};
use crate::merge::{merge_sources, MergeError, MergeReport};
use crate::observability::log_stage;
use crate::selection::{select_features, write_importances_csv, SelectionError, SelectionReport};
use crate::table::{read_raw_table, write_frame_csv, TableError};
use crate::timeseries::{generate_time_series_features, FeatureGenError, TimeSeriesReport};
use crate::training::{compare_models, write_leaderboard_csv, ModelResult, TrainingError};
use crate::tuning::{tune_gradient_boosting, write_cv_results_csv, TuningError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Clean(#[from] CleanError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    FeatureGen(#[from] FeatureGenError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Tuning(#[from] TuningError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub sales: CleanReport,
    pub stores: CleanReport,
    pub features: CleanReport,
    pub merge: MergeReport,
    pub timeseries: TimeSeriesReport,
    pub selection: SelectionReport,
    pub selected_features: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub model_name: String,
    pub fingerprint: String,
    pub feature_names: Vec<String>,
    pub best_score: f64,
    pub test_rmse: f64,
    pub test_r2: f64,
}

/// Clean, merge, engineer and select; ends with the reduced training table.
pub fn prepare_dataset(cfg: &PipelineConfig) -> Result<PrepareReport, PipelineError> {
    let paths = &cfg.paths;

    let started = Instant::now();
    log_stage("clean", "start", None);
    let (sales, sales_report) =
        clean_source(&read_raw_table(&paths.raw_sales)?, &cfg.sales_cleaner())?;
    let (stores, stores_report) =
        clean_source(&read_raw_table(&paths.raw_stores)?, &cfg.stores_cleaner())?;
    let (features, features_report) =
        clean_source(&read_raw_table(&paths.raw_features)?, &cfg.features_cleaner())?;
    write_frame_csv(&paths.cleaned_sales, &sales)?;
    write_frame_csv(&paths.cleaned_stores, &stores)?;
    write_frame_csv(&paths.cleaned_features, &features)?;
    log_stage("clean", "finish", Some(elapsed_ms(started)));

    let started = Instant::now();
    log_stage("merge", "start", None);
    let (merged, merge_report) = merge_sources(&sales, &features, &stores)?;
    write_frame_csv(&paths.merged, &merged)?;
    log_stage("merge", "finish", Some(elapsed_ms(started)));

    let started = Instant::now();
    log_stage("timeseries", "start", None);
    let (engineered, timeseries_report) = generate_time_series_features(&merged, &cfg.timeseries)?;
    write_frame_csv(&paths.engineered, &engineered)?;
    log_stage("timeseries", "finish", Some(elapsed_ms(started)));

    let started = Instant::now();
    log_stage("selection", "start", None);
    let selection = select_features(&engineered, &cfg.selection)?;
    write_importances_csv(&paths.importances, &selection.importances)?;
    write_importances_csv(&paths.top_features, &selection.top_features)?;
    write_frame_csv(&paths.reduced, &selection.reduced)?;
    log_stage("selection", "finish", Some(elapsed_ms(started)));

    Ok(PrepareReport {
        sales: sales_report,
        stores: stores_report,
        features: features_report,
        merge: merge_report,
        timeseries: timeseries_report,
        selected_features: selection.selected_names(),
        selection: selection.report,
    })
}

/// Diagnostic leaderboard over the reduced table.
pub fn run_comparison(cfg: &PipelineConfig) -> Result<Vec<ModelResult>, PipelineError> {
    let started = Instant::now();
    log_stage("compare", "start", None);
    let dataset = read_dataset_csv(&cfg.paths.reduced, cfg.target_column())?;
    let results = compare_models(&dataset, &cfg.comparison)?;
    write_leaderboard_csv(&cfg.paths.leaderboard, &results)?;
    log_stage("compare", "finish", Some(elapsed_ms(started)));
    Ok(results)
}

/// Tunes gradient boosting, then writes the CV table and the artifact.
pub fn train_best_model(cfg: &PipelineConfig) -> Result<TrainReport, PipelineError> {
    let started = Instant::now();
    log_stage("tune", "start", None);
    let dataset = read_dataset_csv(&cfg.paths.reduced, cfg.target_column())?;
    let outcome = tune_gradient_boosting(&dataset, &cfg.tuning)?;
    let artifact = ModelArtifact::from_tuning(&outcome, cfg.target_column())?;

    write_cv_results_csv(&cfg.paths.cv_results, &outcome.cv_results)?;
    persist(&artifact, &cfg.paths.artifact)?;
    log_stage("tune", "finish", Some(elapsed_ms(started)));

    Ok(TrainReport {
        model_name: artifact.model_name,
        fingerprint: artifact.fingerprint,
        feature_names: artifact.feature_names,
        best_score: outcome.best_score,
        test_rmse: outcome.test_metrics.rmse,
        test_r2: outcome.test_metrics.r2,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
