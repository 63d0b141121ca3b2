//! Grouped lag and rolling-mean features over the merged sales table.
//!
//! The input is always re-sorted (stable) by the group columns and the date
//! before anything is derived; caller row order is never trusted. Lags and
//! rolling windows are partitioned by group, so they never reach across a
//! group boundary.

use std::collections::HashSet;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::table::{is_numeric_dtype, TableError};

/// Scratch column used to restore the original row order after a grouped pass.
pub(crate) const ROW_INDEX: &str = "__row_index";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    pub group_columns: Vec<String>,
    pub date_column: String,
    pub target_column: String,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            group_columns: vec!["Store".to_string(), "Dept".to_string()],
            date_column: "Date".to_string(),
            target_column: "Weekly_Sales".to_string(),
            lags: vec![1, 7, 30],
            rolling_windows: vec![7, 30],
        }
    }
}

impl TimeSeriesConfig {
    pub fn lag_column(lag: usize) -> String {
        format!("lag_{lag}")
    }

    pub fn rolling_column(window: usize) -> String {
        format!("rolling_{window}")
    }

    pub fn validate(&self) -> Result<(), FeatureGenError> {
        if self.group_columns.is_empty() {
            return Err(FeatureGenError::InvalidConfig(
                "at least one group column is required".to_string(),
            ));
        }
        for (label, values) in [("lags", &self.lags), ("rolling_windows", &self.rolling_windows)] {
            let mut seen = HashSet::new();
            for v in values {
                if *v == 0 {
                    return Err(FeatureGenError::InvalidConfig(format!(
                        "{label} entries must be > 0"
                    )));
                }
                if !seen.insert(*v) {
                    return Err(FeatureGenError::InvalidConfig(format!(
                        "{label} entries must be unique"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FeatureGenError {
    #[error("invalid time-series config: {0}")]
    InvalidConfig(String),
    #[error("target column '{0}' must be numeric")]
    NonNumericTarget(String),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub rows: usize,
    pub groups: usize,
    pub added_columns: Vec<String>,
}

/// Trailing window over the last `min(i + 1, window)` rows, inclusive of row `i`.
///
/// Missing values are skipped; a mean is missing only when the window holds
/// no observed value.
pub(crate) fn trailing_window(window: usize) -> RollingOptionsFixedWindow {
    RollingOptionsFixedWindow {
        window_size: window,
        min_periods: 1,
        ..Default::default()
    }
}

pub fn generate_time_series_features(
    frame: &DataFrame,
    cfg: &TimeSeriesConfig,
) -> Result<(DataFrame, TimeSeriesReport), FeatureGenError> {
    cfg.validate()?;

    let target = frame
        .column(&cfg.target_column)
        .map_err(|_| TableError::MissingColumn(cfg.target_column.clone()))?;
    if !is_numeric_dtype(target.dtype()) {
        return Err(FeatureGenError::NonNumericTarget(cfg.target_column.clone()));
    }

    let mut sort_by: Vec<&str> = cfg.group_columns.iter().map(String::as_str).collect();
    sort_by.push(cfg.date_column.as_str());
    for name in &sort_by {
        if frame.column(name).is_err() {
            return Err(TableError::MissingColumn(name.to_string()).into());
        }
    }

    let groups: Vec<Expr> = cfg.group_columns.iter().map(|c| col(c.as_str())).collect();
    let target = || col(cfg.target_column.as_str()).cast(DataType::Float64);

    let mut added_columns = Vec::new();
    let mut derived = Vec::new();
    for &lag in &cfg.lags {
        let periods = i64::try_from(lag)
            .map_err(|_| FeatureGenError::InvalidConfig(format!("lag {lag} is too large")))?;
        let name = TimeSeriesConfig::lag_column(lag);
        derived.push(
            target()
                .shift(lit(periods))
                .over(groups.clone())
                .alias(name.as_str()),
        );
        added_columns.push(name);
    }
    for &window in &cfg.rolling_windows {
        let name = TimeSeriesConfig::rolling_column(window);
        derived.push(
            target()
                .rolling_mean(trailing_window(window))
                .over(groups.clone())
                .alias(name.as_str()),
        );
        added_columns.push(name);
    }

    let engineered = frame
        .clone()
        .lazy()
        .sort(sort_by, SortMultipleOptions::default().with_maintain_order(true))
        .with_columns(derived)
        .collect()?;

    let group_count = engineered
        .clone()
        .lazy()
        .select(groups)
        .unique(None, UniqueKeepStrategy::Any)
        .collect()?
        .height();

    let report = TimeSeriesReport {
        rows: engineered.height(),
        groups: group_count,
        added_columns,
    };

    info!(
        component = "timeseries",
        event = "timeseries.generate.finish",
        rows = report.rows,
        groups = report.groups,
        columns = ?report.added_columns
    );

    Ok((engineered, report))
}
