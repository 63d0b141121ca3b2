//! CART regression tree shared by the random forest and gradient boosting.
//!
//! Nodes live in a flat vector so fitted trees serialize compactly and
//! prediction is a loop rather than recursion. Inputs must be NaN-free;
//! callers impute first.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::models::ModelError;

const PURE_NODE_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.min_samples_split < 2 {
            return Err(ModelError::InvalidParams(
                "min_samples_split must be >= 2".to_string(),
            ));
        }
        if self.min_samples_leaf < 1 {
            return Err(ModelError::InvalidParams(
                "min_samples_leaf must be >= 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ModelError::InvalidParams("max_depth must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct NodeStats {
    sum: f64,
    sse: f64,
    count: usize,
}

impl NodeStats {
    fn of(y: ArrayView1<'_, f64>, samples: &[usize]) -> Self {
        let count = samples.len();
        let sum: f64 = samples.iter().map(|&i| y[i]).sum();
        let mean = sum / count as f64;
        let sse = samples.iter().map(|&i| (y[i] - mean).powi(2)).sum();
        Self { sum, sse, count }
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    /// Decrease in summed squared error.
    gain: f64,
}

impl RegressionTree {
    /// Fits a tree on the rows listed in `samples` (repeats allowed for bootstrap).
    ///
    /// Returns the tree and its unnormalized impurity decrease per feature.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        samples: &[usize],
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Result<(Self, Vec<f64>), ModelError> {
        params.validate()?;
        if samples.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if x.nrows() != y.len() {
            return Err(ModelError::ShapeMismatch {
                expected: x.nrows(),
                found: y.len(),
            });
        }

        let n_features = x.ncols();
        let mut importances = vec![0.0; n_features];
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut stack = vec![(0usize, samples.to_vec(), 0usize)];

        while let Some((slot, rows, depth)) = stack.pop() {
            let stats = NodeStats::of(y, &rows);
            let splittable = params.max_depth.map_or(true, |max| depth < max)
                && rows.len() >= params.min_samples_split
                && rows.len() >= 2 * params.min_samples_leaf
                && stats.sse / stats.count as f64 > PURE_NODE_VARIANCE;

            let split = if splittable {
                best_split(x, y, &rows, &stats, params, rng)
            } else {
                None
            };

            let Some(split) = split else {
                nodes[slot] = Node::Leaf {
                    value: stats.mean(),
                };
                continue;
            };

            importances[split.feature] += split.gain;
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .partition(|&&i| x[[i, split.feature]] <= split.threshold);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[slot] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            stack.push((right, right_rows, depth + 1));
            stack.push((left, left_rows, depth + 1));
        }

        Ok((Self { nodes, n_features }, importances))
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

fn best_split(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    rows: &[usize],
    stats: &NodeStats,
    params: &TreeParams,
    rng: &mut ChaCha8Rng,
) -> Option<SplitCandidate> {
    let n = rows.len();
    let min_leaf = params.min_samples_leaf;

    // Visiting order is seeded so equal-gain ties resolve reproducibly per seed.
    let mut features: Vec<usize> = (0..x.ncols()).collect();
    features.shuffle(rng);

    let parent_proxy = stats.sum * stats.sum / n as f64;
    let min_gain = stats.sse * 1e-12;
    let mut best: Option<SplitCandidate> = None;
    let mut order = rows.to_vec();

    for feature in features {
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        for pos in 1..n {
            left_sum += y[order[pos - 1]];
            if pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            let lo = x[[order[pos - 1], feature]];
            let hi = x[[order[pos], feature]];
            if lo >= hi {
                continue;
            }

            let right_sum = stats.sum - left_sum;
            let proxy = left_sum * left_sum / pos as f64 + right_sum * right_sum / (n - pos) as f64;
            let gain = proxy - parent_proxy;
            if gain <= min_gain || best.as_ref().is_some_and(|b| gain <= b.gain) {
                continue;
            }

            let mut threshold = lo + (hi - lo) / 2.0;
            if threshold >= hi {
                threshold = lo;
            }
            best = Some(SplitCandidate {
                feature,
                threshold,
                gain,
            });
        }
    }

    best
}
