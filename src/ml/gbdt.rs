use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::tree::{RegressionTree, TreeParams};

/// Gradient boosting with squared-error loss: shallow trees fit to the
/// running residuals, each shrunk by the learning rate. Greedy fitting over
/// the full sample, so the result is deterministic without any sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

#[derive(Debug, Clone, Copy)]
pub struct BoostingParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 3,
            min_samples_leaf: 2,
            learning_rate: 0.1,
        }
    }
}

impl GradientBoosting {
    pub fn fit(x: &Array2<f64>, y: &[f64], params: BoostingParams) -> Self {
        let n = y.len();
        let base = if n == 0 {
            0.0
        } else {
            y.iter().sum::<f64>() / n as f64
        };

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            feature_subsample: None,
        };
        let rows: Vec<usize> = (0..n).collect();
        // No subsampling, so the rng never draws; seeded anyway for the
        // shared tree signature.
        let mut rng = StdRng::seed_from_u64(0);

        let mut predictions = vec![base; n];
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let residuals: Vec<f64> = y
                .iter()
                .zip(&predictions)
                .map(|(target, pred)| target - pred)
                .collect();

            let tree = RegressionTree::fit(x, &residuals, &rows, tree_params, &mut rng);
            for (i, pred) in predictions.iter_mut().enumerate() {
                *pred += params.learning_rate * tree.predict(&x.row(i).to_vec());
            }
            trees.push(tree);
        }

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let boost: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        self.base + self.learning_rate * boost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fits_a_step_function_closely() {
        let n = 30;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..n).map(|i| if i < n / 2 { -2.0 } else { 2.0 }).collect();

        let model = GradientBoosting::fit(&x, &y, BoostingParams::default());
        assert!(model.predict(&[3.0]) < -1.0);
        assert!(model.predict(&[25.0]) > 1.0);
    }

    #[test]
    fn constant_target_returns_base() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64);
        let y = vec![1.5; 10];
        let model = GradientBoosting::fit(&x, &y, BoostingParams::default());
        assert_relative_eq!(model.predict(&[4.0, 2.0]), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn deterministic_across_fits() {
        let n = 25;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * 31 + j * 7) % 13) as f64);
        let y: Vec<f64> = (0..n).map(|i| ((i * 11) % 5) as f64 - 2.0).collect();

        let a = GradientBoosting::fit(&x, &y, BoostingParams::default());
        let b = GradientBoosting::fit(&x, &y, BoostingParams::default());
        for i in 0..n {
            let row = x.row(i).to_vec();
            assert_eq!(a.predict(&row), b.predict(&row));
        }
    }
}
