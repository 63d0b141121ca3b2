//! Dense numeric view of a table plus the deterministic splits used for
//! selection, comparison and cross-validation.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::DataFrame;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::table::{float_values, is_missing_token, is_numeric_dtype, read_raw_table, TableError};

pub const TARGET_COLUMN: &str = "Weekly_Sales";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("column '{0}' is not numeric")]
    NonNumericColumn(String),
    #[error("column '{column}' row {row}: '{value}' is not a number")]
    NonNumericValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("target is missing at row {row}")]
    MissingTarget { row: usize },
    #[error("dataset shape mismatch: {0}")]
    Shape(String),
    #[error("need at least {required} rows, have {rows}")]
    NotEnoughRows { rows: usize, required: usize },
    #[error("invalid split: {0}")]
    InvalidSplit(String),
}

/// Feature matrix (NaN = missing) and target vector with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericDataset {
    pub feature_names: Vec<String>,
    pub features: Array2<f64>,
    pub target: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl NumericDataset {
    pub fn new(
        feature_names: Vec<String>,
        features: Array2<f64>,
        target: Array1<f64>,
    ) -> Result<Self, DatasetError> {
        if features.ncols() != feature_names.len() {
            return Err(DatasetError::Shape(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                features.ncols()
            )));
        }
        if features.nrows() != target.len() {
            return Err(DatasetError::Shape(format!(
                "{} feature rows for {} targets",
                features.nrows(),
                target.len()
            )));
        }
        Ok(Self {
            feature_names,
            features,
            target,
        })
    }

    /// Builds a dataset from the named numeric columns of a frame.
    pub fn from_frame(
        frame: &DataFrame,
        target_column: &str,
        feature_names: &[String],
    ) -> Result<Self, DatasetError> {
        require_numeric(frame, target_column)?;
        let target = float_values(frame, target_column)?
            .into_iter()
            .enumerate()
            .map(|(row, value)| value.ok_or(DatasetError::MissingTarget { row }))
            .collect::<Result<Vec<_>, _>>()?;

        let mut features = Array2::from_elem((frame.height(), feature_names.len()), f64::NAN);
        for (j, name) in feature_names.iter().enumerate() {
            require_numeric(frame, name)?;
            for (row, value) in float_values(frame, name)?.into_iter().enumerate() {
                if let Some(value) = value {
                    features[[row, j]] = value;
                }
            }
        }

        Self::new(feature_names.to_vec(), features, Array1::from(target))
    }

    pub fn n_samples(&self) -> usize {
        self.target.len()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    pub fn feature_column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_index(name)
            .map(|idx| self.features.column(idx))
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), indices),
            target: self.target.select(Axis(0), indices),
        }
    }
}

fn require_numeric(frame: &DataFrame, name: &str) -> Result<(), DatasetError> {
    let column = frame
        .column(name)
        .map_err(|_| TableError::MissingColumn(name.to_string()))?;
    if is_numeric_dtype(column.dtype()) {
        Ok(())
    } else {
        Err(DatasetError::NonNumericColumn(name.to_string()))
    }
}

/// Numeric columns of a frame except the target and the exclusions, in frame order.
pub fn numeric_candidates(frame: &DataFrame, target_column: &str, exclude: &[String]) -> Vec<String> {
    frame
        .get_columns()
        .iter()
        .filter(|c| is_numeric_dtype(c.dtype()))
        .map(|c| c.name().to_string())
        .filter(|name| name != target_column && !exclude.iter().any(|e| e == name))
        .collect()
}

/// Reads a persisted reduced table. Every column except the target becomes a feature.
pub fn read_dataset_csv(path: &Path, target_column: &str) -> Result<NumericDataset, DatasetError> {
    let raw = read_raw_table(path)?;
    let target_idx = raw
        .column_index(target_column)
        .ok_or_else(|| TableError::MissingColumn(target_column.to_string()))?;

    let feature_cols: Vec<usize> = (0..raw.headers.len()).filter(|&i| i != target_idx).collect();
    let feature_names = feature_cols
        .iter()
        .map(|&i| raw.headers[i].clone())
        .collect::<Vec<_>>();

    let mut features = Array2::from_elem((raw.len(), feature_cols.len()), f64::NAN);
    let mut target = Array1::zeros(raw.len());
    for row in 0..raw.len() {
        for (j, &col) in feature_cols.iter().enumerate() {
            features[[row, j]] = parse_numeric_cell(&raw.headers[col], row, raw.value(row, col))?;
        }
        let value = parse_numeric_cell(target_column, row, raw.value(row, target_idx))?;
        if value.is_nan() {
            return Err(DatasetError::MissingTarget { row });
        }
        target[row] = value;
    }

    NumericDataset::new(feature_names, features, target)
}

fn parse_numeric_cell(column: &str, row: usize, raw: &str) -> Result<f64, DatasetError> {
    if is_missing_token(raw) {
        return Ok(f64::NAN);
    }
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return Ok(value);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Ok(1.0),
        "false" => Ok(0.0),
        _ => Err(DatasetError::NonNumericValue {
            column: column.to_string(),
            row,
            value: raw.to_string(),
        }),
    }
}

/// Seeded shuffle split. The test part is the first `ceil(n * test_fraction)`
/// rows of the permutation.
pub fn train_test_split(
    n_samples: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<SplitIndices, DatasetError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(DatasetError::InvalidSplit(format!(
            "test fraction {test_fraction} must be in (0, 1)"
        )));
    }
    if n_samples < 2 {
        return Err(DatasetError::NotEnoughRows {
            rows: n_samples,
            required: 2,
        });
    }
    let n_test = ((n_samples as f64) * test_fraction).ceil() as usize;
    let n_test = n_test.clamp(1, n_samples - 1);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok(SplitIndices {
        train,
        test: indices,
    })
}

/// Contiguous, unshuffled folds; the first `n % k` folds get one extra row.
pub fn k_fold(n_samples: usize, k: usize) -> Result<Vec<SplitIndices>, DatasetError> {
    if k < 2 {
        return Err(DatasetError::InvalidSplit(format!(
            "at least 2 folds are required, got {k}"
        )));
    }
    if n_samples < k {
        return Err(DatasetError::NotEnoughRows {
            rows: n_samples,
            required: k,
        });
    }

    let base = n_samples / k;
    let extra = n_samples % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        folds.push(SplitIndices {
            train: (0..start).chain(end..n_samples).collect(),
            test: (start..end).collect(),
        });
        start = end;
    }
    Ok(folds)
}
