//! Regressor specifications and their fitted, serializable counterparts.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ensemble::{GradientBoostingModel, GradientBoostingParams};
use crate::kernel::{SvrModel, SvrParams};
use crate::linear::{LassoParams, LinearModel};
use crate::neighbors::KnnModel;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model parameters: {0}")]
    InvalidParams(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("training data contains a non-finite value in {0}")]
    NonFinite(String),
}

/// Unfitted model choice with its hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    LinearRegression,
    Ridge { alpha: f64 },
    Lasso(LassoParams),
    GradientBoosting(GradientBoostingParams),
    Svr(SvrParams),
    Knn { k: usize },
}

impl ModelSpec {
    /// Display name used in leaderboards.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::LinearRegression => "Linear Regression",
            Self::Ridge { .. } => "Ridge Regression",
            Self::Lasso(_) => "Lasso Regression",
            Self::GradientBoosting(_) => "Gradient Boosting",
            Self::Svr(_) => "Support Vector Regressor",
            Self::Knn { .. } => "KNN Regressor",
        }
    }

    /// Rows the model actually trains on out of `available`.
    pub fn train_rows(&self, available: usize) -> usize {
        match self {
            Self::Svr(params) => available.min(params.max_train_rows),
            _ => available,
        }
    }

    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<FittedModel, ModelError> {
        check_training_data(x, y)?;
        let fitted = match self {
            Self::LinearRegression => FittedModel::Linear(LinearModel::fit_ols(x, y)?),
            Self::Ridge { alpha } => FittedModel::Linear(LinearModel::fit_ridge(x, y, *alpha)?),
            Self::Lasso(params) => FittedModel::Linear(LinearModel::fit_lasso(x, y, params)?),
            Self::GradientBoosting(params) => {
                FittedModel::GradientBoosting(GradientBoostingModel::fit(x, y, params)?)
            }
            Self::Svr(params) => FittedModel::Svr(SvrModel::fit(x, y, params)?),
            Self::Knn { k } => FittedModel::Knn(KnnModel::fit(x, y, *k)?),
        };
        Ok(fitted)
    }
}

/// Fitted model; everything needed to predict is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Linear(LinearModel),
    GradientBoosting(GradientBoostingModel),
    Svr(SvrModel),
    Knn(KnnModel),
}

impl FittedModel {
    pub fn n_features(&self) -> usize {
        match self {
            Self::Linear(m) => m.coefficients.len(),
            Self::GradientBoosting(m) => m.n_features(),
            Self::Svr(m) => m.n_features(),
            Self::Knn(m) => m.n_features(),
        }
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        Ok(match self {
            Self::Linear(m) => m.predict(x),
            Self::GradientBoosting(m) => m.predict(x),
            Self::Svr(m) => m.predict(x),
            Self::Knn(m) => m.predict(x),
        })
    }
}

fn check_training_data(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("features".to_string()));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("target".to_string()));
    }
    Ok(())
}
