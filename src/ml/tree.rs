use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// CART-style regression tree fit by greedy variance reduction.
///
/// Shared by the forest (with bootstrap rows and per-split feature
/// subsampling) and the boosting stages (full rows, all features).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Number of candidate features per split; `None` considers all.
    pub feature_subsample: Option<usize>,
}

impl RegressionTree {
    pub fn fit(
        x: &Array2<f64>,
        y: &[f64],
        rows: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let root = build_node(x, y, rows, params, 0, rng);
        Self { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn mean(y: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
}

fn build_node(
    x: &Array2<f64>,
    y: &[f64],
    rows: &[usize],
    params: TreeParams,
    depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf {
        return Node::Leaf { value: mean(y, rows) };
    }

    let candidates = candidate_features(x.ncols(), params.feature_subsample, rng);

    match best_split(x, y, rows, &candidates, params.min_samples_leaf) {
        Some((feature, threshold)) => {
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                rows.iter().copied().partition(|&i| x[[i, feature]] <= threshold);

            let left = build_node(x, y, &left_rows, params, depth + 1, rng);
            let right = build_node(x, y, &right_rows, params, depth + 1, rng);
            Node::Split {
                feature,
                threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        None => Node::Leaf { value: mean(y, rows) },
    }
}

fn candidate_features(
    num_features: usize,
    subsample: Option<usize>,
    rng: &mut StdRng,
) -> Vec<usize> {
    let mut features: Vec<usize> = (0..num_features).collect();
    match subsample {
        Some(k) if k < num_features => {
            features.shuffle(rng);
            features.truncate(k);
            features.sort_unstable();
            features
        }
        _ => features,
    }
}

/// Best (feature, threshold) by summed squared error of the two halves.
/// Sorting each feature once and sweeping with prefix sums evaluates every
/// distinct threshold in one pass.
fn best_split(
    x: &Array2<f64>,
    y: &[f64],
    rows: &[usize],
    features: &[usize],
    min_samples_leaf: usize,
) -> Option<(usize, f64)> {
    let n = rows.len();
    let mut best: Option<(usize, f64, f64)> = None;

    for &feature in features {
        let mut order: Vec<(f64, f64)> = rows.iter().map(|&i| (x[[i, feature]], y[i])).collect();
        order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let total_sum: f64 = order.iter().map(|&(_, t)| t).sum();
        let total_sq: f64 = order.iter().map(|&(_, t)| t * t).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for split_at in 1..n {
            let (value, target) = order[split_at - 1];
            left_sum += target;
            left_sq += target * target;

            // Only cut between distinct feature values.
            if order[split_at].0 <= value {
                continue;
            }
            if split_at < min_samples_leaf || n - split_at < min_samples_leaf {
                continue;
            }

            let left_n = split_at as f64;
            let right_n = (n - split_at) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;

            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);

            let threshold = (value + order[split_at].0) / 2.0;
            if best.map(|(_, _, b)| sse < b).unwrap_or(true) {
                best = Some((feature, threshold, sse));
            }
        }
    }

    best.map(|(feature, threshold, _)| (feature, threshold))
}
