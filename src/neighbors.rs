//! Brute-force k-nearest-neighbour regression with uniform weights.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    k: usize,
    train_x: Array2<f64>,
    train_y: Array1<f64>,
}

impl KnnModel {
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, k: usize) -> Result<Self, ModelError> {
        if k == 0 {
            return Err(ModelError::InvalidParams("k must be >= 1".to_string()));
        }
        if k > x.nrows() {
            return Err(ModelError::InvalidParams(format!(
                "k = {k} exceeds the {} training rows",
                x.nrows()
            )));
        }
        Ok(Self {
            k,
            train_x: x.to_owned(),
            train_y: y.to_owned(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.train_x.ncols()
    }

    /// Rows are scored in parallel. Equal distances resolve to the earlier training row.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(x.row(i)))
            .collect();
        Array1::from(predictions)
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut distances: Vec<(f64, usize)> = self
            .train_x
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, train)| {
                let d: f64 = train
                    .iter()
                    .zip(row.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (d, i)
            })
            .collect();

        let k = self.k.min(distances.len());
        let by_distance = |a: &(f64, usize), b: &(f64, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, by_distance);
            distances.truncate(k);
        }
        distances.iter().map(|&(_, i)| self.train_y[i]).sum::<f64>() / k as f64
    }
}
