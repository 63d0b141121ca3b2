//! Fitted preprocessing-plus-model pipelines and the diagnostic model comparison.

use std::path::Path;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::dataset::{train_test_split, DatasetError, NumericDataset};
use crate::ensemble::GradientBoostingParams;
use crate::kernel::SvrParams;
use crate::linear::LassoParams;
use crate::metrics::RegressionMetrics;
use crate::models::{FittedModel, ModelError, ModelSpec};
use crate::preprocessing::Preprocessor;
use crate::table::{write_atomic, TableError};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid comparison config: {0}")]
    InvalidConfig(String),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Preprocessor and model fitted together on the same training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub preprocessor: Preprocessor,
    pub model: FittedModel,
}

impl Pipeline {
    pub fn fit(
        spec: &ModelSpec,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<Self, ModelError> {
        let preprocessor = Preprocessor::fit(x)?;
        let transformed = preprocessor.transform(x)?;
        let model = spec.fit(transformed.view(), y)?;
        Ok(Self {
            preprocessor,
            model,
        })
    }

    pub fn n_features(&self) -> usize {
        self.preprocessor.n_features()
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let transformed = self.preprocessor.transform(x)?;
        self.model.predict(transformed.view())
    }

    pub fn evaluate(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<RegressionMetrics, ModelError> {
        let predictions = self.predict(x)?;
        Ok(RegressionMetrics::compute(y, predictions.view()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonConfig {
    pub test_fraction: f64,
    pub seed: u64,
    pub models: Vec<ModelSpec>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            models: default_candidates(42),
        }
    }
}

impl ComparisonConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.models.is_empty() {
            return Err(TrainingError::InvalidConfig(
                "at least one model is required".to_string(),
            ));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(TrainingError::InvalidConfig(
                "test_fraction must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// The six regressors compared before tuning.
pub fn default_candidates(seed: u64) -> Vec<ModelSpec> {
    vec![
        ModelSpec::LinearRegression,
        ModelSpec::Ridge { alpha: 1.0 },
        ModelSpec::Lasso(LassoParams::default()),
        ModelSpec::GradientBoosting(GradientBoostingParams {
            n_estimators: 200,
            seed,
            ..GradientBoostingParams::default()
        }),
        ModelSpec::Svr(SvrParams {
            seed,
            ..SvrParams::default()
        }),
        ModelSpec::Knn { k: 5 },
    ]
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "R2")]
    pub r2: f64,
    /// Training rows the model saw; below the split size when the model caps them.
    #[serde(rename = "TrainRows")]
    pub train_rows: usize,
}

/// Fits every candidate on the same seeded split and ranks by ascending RMSE.
pub fn compare_models(
    dataset: &NumericDataset,
    cfg: &ComparisonConfig,
) -> Result<Vec<ModelResult>, TrainingError> {
    cfg.validate()?;
    let split = train_test_split(dataset.n_samples(), cfg.test_fraction, cfg.seed)?;
    let train = dataset.select_rows(&split.train);
    let test = dataset.select_rows(&split.test);

    let mut results = Vec::with_capacity(cfg.models.len());
    for spec in &cfg.models {
        let pipeline = Pipeline::fit(spec, train.features.view(), train.target.view())?;
        let metrics = pipeline.evaluate(test.features.view(), test.target.view())?;
        let train_rows = spec.train_rows(split.train.len());
        info!(
            component = "training",
            event = "compare.model.finish",
            model = spec.display_name(),
            rmse = metrics.rmse,
            mae = metrics.mae,
            r2 = metrics.r2,
            train_rows
        );
        results.push(ModelResult {
            model: spec.display_name().to_string(),
            rmse: metrics.rmse,
            mae: metrics.mae,
            r2: metrics.r2,
            train_rows,
        });
    }

    results.sort_by(|a, b| a.rmse.total_cmp(&b.rmse));

    if let Some(best) = results.first() {
        info!(
            component = "training",
            event = "compare.finish",
            models = results.len(),
            best_model = %best.model,
            best_rmse = best.rmse,
            train_rows = split.train.len(),
            test_rows = split.test.len()
        );
    }

    Ok(results)
}

pub fn write_leaderboard_csv(path: &Path, results: &[ModelResult]) -> Result<(), TrainingError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in results {
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

    fn dataset() -> NumericDataset {
        let n = 50;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = Array1::from_shape_fn(n, |i| 4.0 * i as f64 + 10.0);
        NumericDataset::new(vec!["a".to_string(), "b".to_string()], x, y).unwrap()
    }

    #[test]
    fn leaderboard_is_sorted_by_rmse() {
        let cfg = ComparisonConfig {
            models: vec![
                ModelSpec::Knn { k: 5 },
                ModelSpec::LinearRegression,
                ModelSpec::Ridge { alpha: 1.0 },
            ],
            ..ComparisonConfig::default()
        };
        let results = compare_models(&dataset(), &cfg).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].rmse <= w[1].rmse));
    }

    #[test]
    fn capped_svr_rows_are_reported_on_the_leaderboard() {
        let cfg = ComparisonConfig {
            models: vec![
                ModelSpec::LinearRegression,
                ModelSpec::Svr(SvrParams {
                    max_train_rows: 15,
                    ..SvrParams::default()
                }),
            ],
            ..ComparisonConfig::default()
        };
        let results = compare_models(&dataset(), &cfg).unwrap();
        let rows = |name: &str| {
            results
                .iter()
                .find(|r| r.model == name)
                .map(|r| r.train_rows)
                .unwrap()
        };
        assert_eq!(rows("Linear Regression"), 40);
        assert_eq!(rows("Support Vector Regressor"), 15);
    }

    #[test]
    fn pipeline_predictions_are_repeatable() {
        let ds = dataset();
        let pipeline = Pipeline::fit(
            &ModelSpec::Ridge { alpha: 1.0 },
            ds.features.view(),
            ds.target.view(),
        )
        .unwrap();
        let a = pipeline.predict(ds.features.view()).unwrap();
        let b = pipeline.predict(ds.features.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn default_candidates_cover_six_models() {
        let names: Vec<&str> = default_candidates(42)
            .iter()
            .map(|m| m.display_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "Linear Regression",
                "Ridge Regression",
                "Lasso Regression",
                "Gradient Boosting",
                "Support Vector Regressor",
                "KNN Regressor"
            ]
        );
    }

    #[test]
    fn leaderboard_csv_uses_report_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/model_results.csv");
        let rows = vec![ModelResult {
            model: "Ridge Regression".to_string(),
            rmse: 1.5,
            mae: 1.0,
            r2: 0.9,
            train_rows: 120,
        }];
        write_leaderboard_csv(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Model,RMSE,MAE,R2,TrainRows\n"));
        assert!(text.contains("Ridge Regression,1.5,1.0,0.9,120\n"));
    }
}
