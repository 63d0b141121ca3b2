//! Random-forest importance ranking and top-K reduction of the engineered table.

use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::dataset::{numeric_candidates, train_test_split, DatasetError, NumericDataset, TARGET_COLUMN};
use crate::ensemble::{RandomForestModel, RandomForestParams};
use crate::metrics::r2;
use crate::models::ModelError;
use crate::preprocessing::{column_medians, impute};
use crate::table::{write_atomic, TableError};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid selection config: {0}")]
    InvalidConfig(String),
    #[error("no numeric candidate features besides '{0}'")]
    NoCandidates(String),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub target_column: String,
    pub exclude: Vec<String>,
    pub top_k: usize,
    pub test_fraction: f64,
    pub seed: u64,
    pub forest: RandomForestParams,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            target_column: TARGET_COLUMN.to_string(),
            exclude: vec!["Weekly_Sales_log".to_string(), "Unnamed: 0".to_string()],
            top_k: 10,
            test_fraction: 0.2,
            seed: 42,
            forest: RandomForestParams::default(),
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.top_k == 0 {
            return Err(SelectionError::InvalidConfig("top_k must be >= 1".to_string()));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(SelectionError::InvalidConfig(
                "test_fraction must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "Importance")]
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub candidates: usize,
    pub selected: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub holdout_r2: f64,
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Every candidate, ranked by descending importance.
    pub importances: Vec<FeatureImportance>,
    pub top_features: Vec<FeatureImportance>,
    /// Top-K columns in rank order, then the target.
    pub reduced: DataFrame,
    pub report: SelectionReport,
}

impl SelectionOutcome {
    pub fn selected_names(&self) -> Vec<String> {
        self.top_features.iter().map(|f| f.feature.clone()).collect()
    }
}

pub fn select_features(
    frame: &DataFrame,
    cfg: &SelectionConfig,
) -> Result<SelectionOutcome, SelectionError> {
    cfg.validate()?;

    let candidates = numeric_candidates(frame, &cfg.target_column, &cfg.exclude);
    if candidates.is_empty() {
        return Err(SelectionError::NoCandidates(cfg.target_column.clone()));
    }

    let dataset = NumericDataset::from_frame(frame, &cfg.target_column, &candidates)?;
    let split = train_test_split(dataset.n_samples(), cfg.test_fraction, cfg.seed)?;
    let mut train = dataset.select_rows(&split.train);
    let mut test = dataset.select_rows(&split.test);

    let medians = column_medians(train.features.view());
    impute(&mut train.features, &medians);
    impute(&mut test.features, &medians);

    let (forest, raw) = RandomForestModel::fit(train.features.view(), train.target.view(), &cfg.forest)?;
    let holdout_r2 = r2(test.target.view(), forest.predict(test.features.view()).view());

    let importances = rank_importances(&candidates, &raw);
    let top_features: Vec<FeatureImportance> =
        importances.iter().take(cfg.top_k).cloned().collect();

    let reduced = frame.select(
        top_features
            .iter()
            .map(|f| f.feature.as_str())
            .chain(std::iter::once(cfg.target_column.as_str())),
    )?;

    let report = SelectionReport {
        candidates: candidates.len(),
        selected: top_features.len(),
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        holdout_r2,
    };

    info!(
        component = "selection",
        event = "selection.finish",
        candidates = report.candidates,
        selected = report.selected,
        train_rows = report.train_rows,
        test_rows = report.test_rows,
        holdout_r2 = report.holdout_r2,
        top_feature = top_features.first().map(|f| f.feature.as_str()).unwrap_or_default()
    );

    Ok(SelectionOutcome {
        importances,
        top_features,
        reduced,
        report,
    })
}

/// Stable descending sort; equal importances keep candidate order.
pub fn rank_importances(names: &[String], importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = names
        .iter()
        .zip(importances)
        .map(|(feature, &importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

pub fn write_importances_csv(path: &Path, rows: &[FeatureImportance]) -> Result<(), SelectionError> {
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

pub fn read_importances_csv(path: &Path) -> Result<Vec<FeatureImportance>, SelectionError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<FeatureImportance>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        let n = 60;
        df!(
            "Dept" => (0..n).map(|i| i % 4).collect::<Vec<i64>>(),
            "lag_1" => (0..n).map(|i| i as f64 * 10.0).collect::<Vec<f64>>(),
            "IsHoliday" => (0..n).map(|i| i % 2 == 0).collect::<Vec<bool>>(),
            "Weekly_Sales_log" => (0..n).map(|i| i as f64).collect::<Vec<f64>>(),
            "Weekly_Sales" => (0..n).map(|i| i as f64 * 10.0 + 5.0).collect::<Vec<f64>>()
        )
        .unwrap()
    }

    fn config(top_k: usize) -> SelectionConfig {
        SelectionConfig {
            top_k,
            forest: RandomForestParams {
                n_estimators: 10,
                ..RandomForestParams::default()
            },
            ..SelectionConfig::default()
        }
    }

    #[test]
    fn ranks_signal_first_and_excludes_non_candidates() {
        let outcome = select_features(&frame(), &config(1)).unwrap();
        assert_eq!(outcome.report.candidates, 2);
        assert_eq!(outcome.selected_names(), vec!["lag_1"]);
        let reduced: Vec<String> = outcome
            .reduced
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(reduced, vec!["lag_1", "Weekly_Sales"]);

        let total: f64 = outcome.importances.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_candidates_than_k_keeps_all() {
        let outcome = select_features(&frame(), &config(10)).unwrap();
        assert_eq!(outcome.top_features.len(), 2);
    }

    #[test]
    fn ties_keep_candidate_order() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = rank_importances(&names, &[0.25, 0.5, 0.25]);
        let order: Vec<&str> = ranked.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        assert!(matches!(
            select_features(&frame(), &config(0)),
            Err(SelectionError::InvalidConfig(_))
        ));
    }
}
