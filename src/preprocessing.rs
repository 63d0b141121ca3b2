//! Median imputation, Yeo–Johnson power transform and standardization,
//! fitted once and then frozen.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cleaning::median;
use crate::models::ModelError;

const LAMBDA_BOUNDS: (f64, f64) = (-5.0, 5.0);
const LAMBDA_TOL: f64 = 1e-8;
const ZERO_LAMBDA: f64 = 1e-12;

/// Frozen preprocessing parameters, one entry per feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub medians: Vec<f64>,
    pub lambdas: Vec<f64>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl Preprocessor {
    /// Learns medians, then Yeo–Johnson lambdas on the imputed data, then
    /// mean and scale on the power-transformed data.
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self, ModelError> {
        if x.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let medians = column_medians(x);
        let mut work = x.to_owned();
        impute(&mut work, &medians);

        let lambdas: Vec<f64> = work
            .axis_iter(Axis(1))
            .map(fit_lambda)
            .collect();
        for (mut column, &lambda) in work.axis_iter_mut(Axis(1)).zip(&lambdas) {
            column.mapv_inplace(|v| yeo_johnson(v, lambda));
        }

        let mut means = Vec::with_capacity(work.ncols());
        let mut scales = Vec::with_capacity(work.ncols());
        for column in work.axis_iter(Axis(1)) {
            let mean = column.sum() / column.len() as f64;
            let std = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / column.len() as f64)
                .sqrt();
            means.push(mean);
            scales.push(if std > 0.0 && std.is_finite() { std } else { 1.0 });
        }

        Ok(Self {
            medians,
            lambdas,
            means,
            scales,
        })
    }

    pub fn n_features(&self) -> usize {
        self.medians.len()
    }

    /// Applies the frozen parameters. Never refits.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        impute(&mut out, &self.medians);
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (lambda, mean, scale) = (self.lambdas[j], self.means[j], self.scales[j]);
            column.mapv_inplace(|v| (yeo_johnson(v, lambda) - mean) / scale);
        }
        Ok(out)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Array1<f64>, ModelError> {
        let view = ArrayView2::from_shape((1, row.len()), row).map_err(|_| {
            ModelError::ShapeMismatch {
                expected: self.n_features(),
                found: row.len(),
            }
        })?;
        Ok(self.transform(view)?.row(0).to_owned())
    }
}

/// Median of the finite values of each column; an all-missing column gets 0.
pub fn column_medians(x: ArrayView2<'_, f64>) -> Vec<f64> {
    x.axis_iter(Axis(1))
        .enumerate()
        .map(|(j, column)| {
            let observed: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            median(&observed).unwrap_or_else(|| {
                warn!(
                    component = "preprocessing",
                    event = "impute.empty_column",
                    column = j
                );
                0.0
            })
        })
        .collect()
}

/// Replaces non-finite cells with the column's fill value.
pub fn impute(x: &mut Array2<f64>, medians: &[f64]) {
    for (mut column, &fill) in x.axis_iter_mut(Axis(1)).zip(medians) {
        column.mapv_inplace(|v| if v.is_finite() { v } else { fill });
    }
}

pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < ZERO_LAMBDA {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < ZERO_LAMBDA {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

/// Profile log-likelihood of the Yeo–Johnson transform under normality.
fn log_likelihood(column: ArrayView1<'_, f64>, lambda: f64) -> f64 {
    let n = column.len() as f64;
    let transformed: Vec<f64> = column.iter().map(|&v| yeo_johnson(v, lambda)).collect();
    let mean = transformed.iter().sum::<f64>() / n;
    let var = transformed.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    if !(var.is_finite() && var > 0.0) {
        return f64::NEG_INFINITY;
    }
    let jacobian: f64 = column.iter().map(|v| v.signum() * v.abs().ln_1p()).sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

/// Golden-section search for the maximum-likelihood lambda. Constant columns keep 1.
pub fn fit_lambda(column: ArrayView1<'_, f64>) -> f64 {
    let first = column.iter().next().copied().unwrap_or(0.0);
    if column.iter().all(|&v| v == first) {
        return 1.0;
    }

    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = LAMBDA_BOUNDS;
    let mut a = hi - inv_phi * (hi - lo);
    let mut b = lo + inv_phi * (hi - lo);
    let mut fa = log_likelihood(column, a);
    let mut fb = log_likelihood(column, b);

    while hi - lo > LAMBDA_TOL {
        if fa >= fb {
            hi = b;
            b = a;
            fb = fa;
            a = hi - inv_phi * (hi - lo);
            fa = log_likelihood(column, a);
        } else {
            lo = a;
            a = b;
            fa = fb;
            b = lo + inv_phi * (hi - lo);
            fb = log_likelihood(column, b);
        }
    }
    (lo + hi) / 2.0
}
