//! Linear regressors with an intercept: OLS, ridge and lasso.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::models::ModelError;

/// Relative diagonal jitter that keeps OLS solvable with exactly collinear columns.
const OLS_JITTER: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LassoParams {
    pub alpha: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for LassoParams {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

struct Centered {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

fn center(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Centered, ModelError> {
    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or(ModelError::EmptyTrainingSet)?;
    let y_mean = y.mean().ok_or(ModelError::EmptyTrainingSet)?;
    Ok(Centered {
        x: &x - &x_mean,
        y: y.mapv(|v| v - y_mean),
        x_mean,
        y_mean,
    })
}

impl LinearModel {
    fn from_centered(data: &Centered, weights: Array1<f64>) -> Self {
        let intercept = data.y_mean - data.x_mean.dot(&weights);
        Self {
            intercept,
            coefficients: weights.to_vec(),
        }
    }

    pub fn fit_ols(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self, ModelError> {
        let data = center(x, y)?;
        let mut gram = data.x.t().dot(&data.x);
        let p = gram.nrows();
        let scale = if p > 0 {
            gram.diag().sum() / p as f64
        } else {
            0.0
        };
        let jitter = OLS_JITTER * scale.max(1.0);
        gram.diag_mut().mapv_inplace(|d| d + jitter);
        let rhs = data.x.t().dot(&data.y);
        let weights = solve(gram, rhs)?;
        Ok(Self::from_centered(&data, weights))
    }

    /// Minimizes `||y - Xw - b||^2 + alpha * ||w||^2`; the intercept is not penalized.
    pub fn fit_ridge(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        alpha: f64,
    ) -> Result<Self, ModelError> {
        if !(alpha.is_finite() && alpha >= 0.0) {
            return Err(ModelError::InvalidParams("ridge alpha must be >= 0".to_string()));
        }
        let data = center(x, y)?;
        let mut gram = data.x.t().dot(&data.x);
        gram.diag_mut().mapv_inplace(|d| d + alpha.max(OLS_JITTER));
        let rhs = data.x.t().dot(&data.y);
        let weights = solve(gram, rhs)?;
        Ok(Self::from_centered(&data, weights))
    }

    /// Coordinate descent on `(1 / 2n) ||y - Xw - b||^2 + alpha * ||w||_1`.
    pub fn fit_lasso(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &LassoParams,
    ) -> Result<Self, ModelError> {
        if !(params.alpha.is_finite() && params.alpha >= 0.0) {
            return Err(ModelError::InvalidParams("lasso alpha must be >= 0".to_string()));
        }
        if params.max_iter == 0 {
            return Err(ModelError::InvalidParams("max_iter must be >= 1".to_string()));
        }

        let data = center(x, y)?;
        let n = data.x.nrows() as f64;
        let p = data.x.ncols();
        let col_sq: Vec<f64> = data
            .x
            .axis_iter(Axis(1))
            .map(|col| col.dot(&col) / n)
            .collect();

        let mut weights = Array1::<f64>::zeros(p);
        let mut residual = data.y.clone();

        for _ in 0..params.max_iter {
            let mut max_delta: f64 = 0.0;
            let mut max_weight: f64 = 0.0;
            for j in 0..p {
                if col_sq[j] == 0.0 {
                    continue;
                }
                let col = data.x.column(j);
                let old = weights[j];
                let rho = col.dot(&residual) / n + col_sq[j] * old;
                let new = soft_threshold(rho, params.alpha) / col_sq[j];
                if new != old {
                    residual.scaled_add(old - new, &col);
                    weights[j] = new;
                }
                max_delta = max_delta.max((new - old).abs());
                max_weight = max_weight.max(new.abs());
            }
            if max_weight == 0.0 || max_delta <= params.tol * max_weight {
                break;
            }
        }

        Ok(Self::from_centered(&data, weights))
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let weights = ArrayView1::from(self.coefficients.as_slice());
        x.dot(&weights) + self.intercept
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < f64::MIN_POSITIVE {
            return Err(ModelError::InvalidParams(
                "normal equations are singular".to_string(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ols_recovers_exact_coefficients() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 3.0]];
        let y = x.column(0).mapv(|v| 2.0 * v) + x.column(1).mapv(|v| -1.0 * v) + 4.0;
        let model = LinearModel::fit_ols(x.view(), y.view()).unwrap();
        assert!((model.coefficients[0] - 2.0).abs() < 1e-6);
        assert!((model.coefficients[1] + 1.0).abs() < 1e-6);
        assert!((model.intercept - 4.0).abs() < 1e-6);
    }

    #[test]
    fn ols_tolerates_duplicated_columns() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let model = LinearModel::fit_ols(x.view(), y.view()).unwrap();
        let pred = model.predict(x.view());
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-4);
        }
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let x = array![[-1.0], [0.0], [1.0]];
        let y = array![-2.0, 0.0, 2.0];
        let ols = LinearModel::fit_ols(x.view(), y.view()).unwrap();
        let ridge = LinearModel::fit_ridge(x.view(), y.view(), 2.0).unwrap();
        assert!((ols.coefficients[0] - 2.0).abs() < 1e-9);
        assert!((ridge.coefficients[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lasso_zeroes_weak_features() {
        let x = array![[-1.0, 0.1], [0.0, -0.1], [1.0, 0.1], [2.0, -0.1]];
        let y = array![-3.0, 0.0, 3.0, 6.0];
        let params = LassoParams {
            alpha: 0.5,
            ..LassoParams::default()
        };
        let model = LinearModel::fit_lasso(x.view(), y.view(), &params).unwrap();
        assert!(model.coefficients[0] > 2.0);
        assert_eq!(model.coefficients[1], 0.0);
    }

    #[test]
    fn soft_threshold_is_symmetric() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }
}
