//! Epsilon-insensitive support vector regression with an RBF kernel.
//!
//! The dual is solved by coordinate descent with the bias folded into the
//! kernel (`K + 1`), so no equality constraint couples the coordinates.
//! Training needs the full kernel matrix, so rows are capped.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * var(X))`.
    Scale,
    Value(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrParams {
    pub c: f64,
    pub epsilon: f64,
    pub gamma: Gamma,
    pub max_train_rows: usize,
    pub max_epochs: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for SvrParams {
    fn default() -> Self {
        Self {
            c: 100.0,
            epsilon: 0.1,
            gamma: Gamma::Scale,
            max_train_rows: 3000,
            max_epochs: 200,
            tol: 1e-3,
            seed: 42,
        }
    }
}

impl SvrParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(ModelError::InvalidParams("C must be > 0".to_string()));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(ModelError::InvalidParams("epsilon must be >= 0".to_string()));
        }
        if let Gamma::Value(g) = self.gamma {
            if !(g.is_finite() && g > 0.0) {
                return Err(ModelError::InvalidParams("gamma must be > 0".to_string()));
            }
        }
        if self.max_train_rows == 0 || self.max_epochs == 0 {
            return Err(ModelError::InvalidParams(
                "max_train_rows and max_epochs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrModel {
    support_vectors: Array2<f64>,
    dual_coef: Array1<f64>,
    gamma: f64,
}

impl SvrModel {
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &SvrParams,
    ) -> Result<Self, ModelError> {
        params.validate()?;
        if x.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let rows = capped_rows(x.nrows(), params.max_train_rows, params.seed);
        if rows.len() < x.nrows() {
            info!(
                component = "kernel",
                event = "svr.fit.subsampled",
                available_rows = x.nrows(),
                max_train_rows = params.max_train_rows,
                seed = params.seed
            );
        }
        let x = x.select(Axis(0), &rows);
        let y = y.select(Axis(0), &rows);
        let n = x.nrows();

        let gamma = match params.gamma {
            Gamma::Value(g) => g,
            Gamma::Scale => scale_gamma(x.view()),
        };

        let mut q = rbf_kernel(x.view(), x.view(), gamma);
        q.mapv_inplace(|k| k + 1.0);

        let mut beta = Array1::<f64>::zeros(n);
        let mut fitted = Array1::<f64>::zeros(n);
        let mut epochs = 0;
        for _ in 0..params.max_epochs {
            epochs += 1;
            let mut max_delta: f64 = 0.0;
            for i in 0..n {
                let qii = q[[i, i]];
                let partial = y[i] - (fitted[i] - qii * beta[i]);
                let shrunk = if partial > params.epsilon {
                    partial - params.epsilon
                } else if partial < -params.epsilon {
                    partial + params.epsilon
                } else {
                    0.0
                };
                let new = (shrunk / qii).clamp(-params.c, params.c);
                let delta = new - beta[i];
                if delta != 0.0 {
                    fitted.scaled_add(delta, &q.row(i));
                    beta[i] = new;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta <= params.tol {
                break;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i] != 0.0).collect();
        debug!(
            component = "kernel",
            event = "svr.fit.finish",
            rows = n,
            support_vectors = support.len(),
            epochs,
            gamma
        );

        Ok(Self {
            support_vectors: x.select(Axis(0), &support),
            dual_coef: beta.select(Axis(0), &support),
            gamma,
        })
    }

    pub fn n_features(&self) -> usize {
        self.support_vectors.ncols()
    }

    pub fn n_support(&self) -> usize {
        self.dual_coef.len()
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        if self.dual_coef.is_empty() {
            return Array1::zeros(x.nrows());
        }
        let mut k = rbf_kernel(x, self.support_vectors.view(), self.gamma);
        k.mapv_inplace(|v| v + 1.0);
        k.dot(&self.dual_coef)
    }
}

fn capped_rows(n: usize, cap: usize, seed: u64) -> Vec<usize> {
    let mut rows: Vec<usize> = (0..n).collect();
    if n > cap {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rows.shuffle(&mut rng);
        rows.truncate(cap);
        rows.sort_unstable();
    }
    rows
}

fn scale_gamma(x: ArrayView2<'_, f64>) -> f64 {
    let var = x.var(0.0);
    if var > 0.0 && x.ncols() > 0 {
        1.0 / (x.ncols() as f64 * var)
    } else {
        1.0
    }
}

/// `exp(-gamma * ||a_i - b_j||^2)` for every row pair.
fn rbf_kernel(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, gamma: f64) -> Array2<f64> {
    let a_sq: Array1<f64> = a.rows().into_iter().map(|r| r.dot(&r)).collect();
    let b_sq: Array1<f64> = b.rows().into_iter().map(|r| r.dot(&r)).collect();
    let mut k = a.dot(&b.t());
    for ((i, j), value) in k.indexed_iter_mut() {
        let dist = (a_sq[i] + b_sq[j] - 2.0 * *value).max(0.0);
        *value = (-gamma * dist).exp();
    }
    k
}
