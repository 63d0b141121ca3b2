//! Randomized cross-validated search over gradient-boosting hyper-parameters.
//!
//! Every (configuration, fold) pair is an independent task on a rayon pool.
//! Scores are reduced per configuration after all tasks finish, so the
//! winner never depends on completion order.

use std::ops::Range;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::{k_fold, train_test_split, DatasetError, NumericDataset};
use crate::ensemble::GradientBoostingParams;
use crate::metrics::{rmse, RegressionMetrics};
use crate::models::{ModelError, ModelSpec};
use crate::table::{write_atomic, TableError};
use crate::training::Pipeline;

#[derive(Debug, Error)]
pub enum TuningError {
    #[error("invalid tuning config: {0}")]
    InvalidConfig(String),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Half-open sampling ranges for each searched parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDistributions {
    pub n_estimators: Range<usize>,
    pub learning_rate: Range<f64>,
    pub max_depth: Range<usize>,
    pub min_samples_split: Range<usize>,
    pub min_samples_leaf: Range<usize>,
}

impl Default for ParamDistributions {
    fn default() -> Self {
        Self {
            n_estimators: 100..500,
            learning_rate: 0.01..0.31,
            max_depth: 3..10,
            min_samples_split: 2..20,
            min_samples_leaf: 1..10,
        }
    }
}

impl ParamDistributions {
    fn validate(&self) -> Result<(), TuningError> {
        let empty = self.n_estimators.is_empty()
            || !(self.learning_rate.start < self.learning_rate.end)
            || self.max_depth.is_empty()
            || self.min_samples_split.is_empty()
            || self.min_samples_leaf.is_empty();
        if empty {
            return Err(TuningError::InvalidConfig(
                "every parameter range must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub n_iter: usize,
    pub cv_folds: usize,
    /// Worker threads; `None` uses every core.
    pub n_jobs: Option<usize>,
    pub test_fraction: f64,
    pub seed: u64,
    pub distributions: ParamDistributions,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            n_iter: 30,
            cv_folds: 3,
            n_jobs: None,
            test_fraction: 0.2,
            seed: 42,
            distributions: ParamDistributions::default(),
        }
    }
}

impl TuningConfig {
    pub fn validate(&self) -> Result<(), TuningError> {
        if self.n_iter == 0 {
            return Err(TuningError::InvalidConfig("n_iter must be >= 1".to_string()));
        }
        if self.cv_folds < 2 {
            return Err(TuningError::InvalidConfig("cv_folds must be >= 2".to_string()));
        }
        if self.n_jobs == Some(0) {
            return Err(TuningError::InvalidConfig("n_jobs must be >= 1".to_string()));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(TuningError::InvalidConfig(
                "test_fraction must be in (0, 1)".to_string(),
            ));
        }
        self.distributions.validate()
    }
}

/// One row of the cross-validation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvResult {
    pub rank_test_score: usize,
    pub config_index: usize,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub mean_test_score: f64,
    pub std_test_score: f64,
}

#[derive(Debug, Clone)]
pub struct TuningOutcome {
    pub best_index: usize,
    pub best_params: GradientBoostingParams,
    /// Mean negative RMSE of the winner across folds.
    pub best_score: f64,
    /// Ordered by rank.
    pub cv_results: Vec<CvResult>,
    pub test_metrics: RegressionMetrics,
    /// Refit on the whole training split.
    pub pipeline: Pipeline,
    pub feature_names: Vec<String>,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Draws `n_iter` configurations from one seeded stream.
pub fn sample_configurations(cfg: &TuningConfig) -> Vec<GradientBoostingParams> {
    let d = &cfg.distributions;
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    (0..cfg.n_iter)
        .map(|_| GradientBoostingParams {
            n_estimators: rng.gen_range(d.n_estimators.clone()),
            learning_rate: rng.gen_range(d.learning_rate.clone()),
            max_depth: rng.gen_range(d.max_depth.clone()),
            min_samples_split: rng.gen_range(d.min_samples_split.clone()),
            min_samples_leaf: rng.gen_range(d.min_samples_leaf.clone()),
            seed: cfg.seed,
        })
        .collect()
}

struct TaskScore {
    config: usize,
    score: f64,
}

pub fn tune_gradient_boosting(
    dataset: &NumericDataset,
    cfg: &TuningConfig,
) -> Result<TuningOutcome, TuningError> {
    cfg.validate()?;

    let split = train_test_split(dataset.n_samples(), cfg.test_fraction, cfg.seed)?;
    let train = dataset.select_rows(&split.train);
    let test = dataset.select_rows(&split.test);
    let folds = k_fold(train.n_samples(), cfg.cv_folds)?;
    let configs = sample_configurations(cfg);

    let tasks: Vec<(usize, usize)> = (0..configs.len())
        .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
        .collect();

    let mut pool = rayon::ThreadPoolBuilder::new();
    if let Some(n_jobs) = cfg.n_jobs {
        pool = pool.num_threads(n_jobs);
    }
    let pool = pool.build()?;

    info!(
        component = "tuning",
        event = "search.start",
        configurations = configs.len(),
        folds = folds.len(),
        tasks = tasks.len(),
        workers = pool.current_num_threads(),
        train_rows = train.n_samples(),
        test_rows = test.n_samples()
    );

    let scores = pool.install(|| {
        tasks
            .par_iter()
            .map(|&(config, fold)| -> Result<TaskScore, ModelError> {
                let fold_train = train.select_rows(&folds[fold].train);
                let fold_test = train.select_rows(&folds[fold].test);
                let spec = ModelSpec::GradientBoosting(configs[config].clone());
                let pipeline =
                    Pipeline::fit(&spec, fold_train.features.view(), fold_train.target.view())?;
                let predictions = pipeline.predict(fold_test.features.view())?;
                let score = -rmse(fold_test.target.view(), predictions.view());
                debug!(
                    component = "tuning",
                    event = "search.task.finish",
                    config,
                    fold,
                    score
                );
                Ok(TaskScore { config, score })
            })
            .collect::<Result<Vec<_>, _>>()
    })?;

    let cv_results = reduce_scores(&configs, &scores);
    let best_index = cv_results
        .first()
        .map(|r| r.config_index)
        .ok_or_else(|| TuningError::InvalidConfig("no configurations evaluated".to_string()))?;
    let best_params = configs[best_index].clone();
    let best_score = cv_results[0].mean_test_score;

    let pipeline = Pipeline::fit(
        &ModelSpec::GradientBoosting(best_params.clone()),
        train.features.view(),
        train.target.view(),
    )?;
    let test_metrics = pipeline.evaluate(test.features.view(), test.target.view())?;

    info!(
        component = "tuning",
        event = "search.finish",
        best_index,
        best_score,
        n_estimators = best_params.n_estimators,
        learning_rate = best_params.learning_rate,
        max_depth = best_params.max_depth,
        min_samples_split = best_params.min_samples_split,
        min_samples_leaf = best_params.min_samples_leaf,
        test_rmse = test_metrics.rmse,
        test_mae = test_metrics.mae,
        test_r2 = test_metrics.r2
    );

    Ok(TuningOutcome {
        best_index,
        best_params,
        best_score,
        cv_results,
        test_metrics,
        pipeline,
        feature_names: dataset.feature_names.clone(),
        train_rows: train.n_samples(),
        test_rows: test.n_samples(),
    })
}

/// Mean and population std per configuration, ranked by mean score
/// (higher is better), ties broken by the lower configuration index.
fn reduce_scores(configs: &[GradientBoostingParams], scores: &[TaskScore]) -> Vec<CvResult> {
    let mut per_config: Vec<Vec<f64>> = vec![Vec::new(); configs.len()];
    for task in scores {
        per_config[task.config].push(task.score);
    }

    let mut results: Vec<CvResult> = configs
        .iter()
        .zip(&per_config)
        .enumerate()
        .filter(|(_, (_, fold_scores))| !fold_scores.is_empty())
        .map(|(idx, (params, fold_scores))| {
            let n = fold_scores.len() as f64;
            let mean = fold_scores.iter().sum::<f64>() / n;
            let var = fold_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
            CvResult {
                rank_test_score: 0,
                config_index: idx,
                n_estimators: params.n_estimators,
                learning_rate: params.learning_rate,
                max_depth: params.max_depth,
                min_samples_split: params.min_samples_split,
                min_samples_leaf: params.min_samples_leaf,
                mean_test_score: mean,
                std_test_score: var.sqrt(),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.mean_test_score
            .total_cmp(&a.mean_test_score)
            .then(a.config_index.cmp(&b.config_index))
    });
    for (rank, row) in results.iter_mut().enumerate() {
        row.rank_test_score = rank + 1;
    }
    results
}

pub fn write_cv_results_csv(path: &Path, rows: &[CvResult]) -> Result<(), TuningError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| TableError::Io(err.into_error()))?;
    write_atomic(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn small_config() -> TuningConfig {
        TuningConfig {
            n_iter: 3,
            n_jobs: Some(2),
            distributions: ParamDistributions {
                n_estimators: 5..15,
                ..ParamDistributions::default()
            },
            ..TuningConfig::default()
        }
    }

    fn dataset() -> NumericDataset {
        let n = 45;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 5) as f64 });
        let y = Array1::from_shape_fn(n, |i| 2.0 * i as f64 + (i % 5) as f64);
        NumericDataset::new(vec!["a".to_string(), "b".to_string()], x, y).unwrap()
    }

    #[test]
    fn sampled_configurations_respect_ranges_and_seed() {
        let cfg = TuningConfig::default();
        let a = sample_configurations(&cfg);
        let b = sample_configurations(&cfg);
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        for p in &a {
            assert!((100..500).contains(&p.n_estimators));
            assert!(p.learning_rate >= 0.01 && p.learning_rate < 0.31);
            assert!((3..10).contains(&p.max_depth));
            assert!((2..20).contains(&p.min_samples_split));
            assert!((1..10).contains(&p.min_samples_leaf));
        }
    }

    #[test]
    fn reduction_breaks_ties_by_lowest_index() {
        let configs = vec![GradientBoostingParams::default(); 3];
        let scores = vec![
            TaskScore { config: 2, score: -1.0 },
            TaskScore { config: 1, score: -1.0 },
            TaskScore { config: 0, score: -3.0 },
            TaskScore { config: 1, score: -1.0 },
            TaskScore { config: 2, score: -1.0 },
            TaskScore { config: 0, score: -1.0 },
        ];
        let results = reduce_scores(&configs, &scores);
        let order: Vec<usize> = results.iter().map(|r| r.config_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(results[0].rank_test_score, 1);
        assert_eq!(results[2].mean_test_score, -2.0);
        assert_eq!(results[2].std_test_score, 1.0);
    }

    #[test]
    fn search_is_reproducible_across_worker_counts() {
        let ds = dataset();
        let single = tune_gradient_boosting(
            &ds,
            &TuningConfig {
                n_jobs: Some(1),
                ..small_config()
            },
        )
        .unwrap();
        let parallel = tune_gradient_boosting(&ds, &small_config()).unwrap();

        assert_eq!(single.best_index, parallel.best_index);
        assert_eq!(single.cv_results, parallel.cv_results);
        assert_eq!(single.test_metrics, parallel.test_metrics);
        assert_eq!(single.cv_results.len(), 3);
        assert_eq!(single.train_rows + single.test_rows, 45);
    }

    #[test]
    fn invalid_fold_count_is_rejected() {
        let cfg = TuningConfig {
            cv_folds: 1,
            ..TuningConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TuningError::InvalidConfig(_))));
    }
}
