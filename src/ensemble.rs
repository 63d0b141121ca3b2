//! Tree ensembles: a bagged random forest (used for feature importance) and
//! squared-loss gradient boosting (the tuned production model).

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::ModelError;
use crate::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub bootstrap: bool,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            bootstrap: true,
            tree: TreeParams::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<RegressionTree>,
}

impl RandomForestModel {
    /// Fits every tree in parallel; tree `i` draws from `seed + i`.
    ///
    /// Also returns mean-decrease-in-impurity importances: normalized per
    /// tree, averaged, then normalized again. All-zero importances become uniform.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &RandomForestParams,
    ) -> Result<(Self, Vec<f64>), ModelError> {
        if params.n_estimators == 0 {
            return Err(ModelError::InvalidParams(
                "n_estimators must be >= 1".to_string(),
            ));
        }
        params.tree.validate()?;

        let n = x.nrows();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let fitted = (0..params.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let samples: Vec<usize> = if params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(x, y, &samples, &params.tree, &mut rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let n_features = x.ncols();
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, raw) in fitted {
            let total: f64 = raw.iter().sum();
            if total > 0.0 {
                for (acc, value) in importances.iter_mut().zip(&raw) {
                    *acc += value / total;
                }
            }
            trees.push(tree);
        }
        normalize_or_uniform(&mut importances);

        Ok((Self { trees }, importances))
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let sum = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .reduce(|| Array1::zeros(x.nrows()), |a, b| a + b);
        sum / self.trees.len().max(1) as f64
    }
}

fn normalize_or_uniform(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    } else if !values.is_empty() {
        let uniform = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = uniform);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

impl GradientBoostingParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParams(
                "n_estimators must be >= 1".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidParams(
                "learning_rate must be > 0".to_string(),
            ));
        }
        self.tree_params().validate()
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: Some(self.max_depth),
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl GradientBoostingModel {
    /// Squared-loss boosting: start at the target mean, then fit each stage
    /// to the current residuals and add it scaled by the learning rate.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &GradientBoostingParams,
    ) -> Result<Self, ModelError> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let tree_params = params.tree_params();
        let samples: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

        let init = y.sum() / n as f64;
        let mut current = Array1::from_elem(n, init);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals = &y - &current;
            let (tree, _) =
                RegressionTree::fit(x, residuals.view(), &samples, &tree_params, &mut rng)?;
            current.scaled_add(params.learning_rate, &tree.predict(x));
            trees.push(tree);
        }

        Ok(Self {
            init,
            learning_rate: params.learning_rate,
            trees,
            n_features: x.ncols(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_stages(&self) -> usize {
        self.trees.len()
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut out = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            out.scaled_add(self.learning_rate, &tree.predict(x));
        }
        out
    }
}
