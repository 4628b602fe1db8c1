use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Z-score scaler persisted alongside the fitted models.
///
/// Fitted on the training partition only; near-constant columns transform
/// to 0 instead of dividing by a vanishing std.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let means = x
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; x.ncols()]);
        let stds = x.std_axis(Axis(0), 0.0).to_vec();
        Self { means, stds }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| {
                let std = self.stds[j];
                if std > 1e-10 {
                    (v - self.means[j]) / std
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
            let scaled = self.transform_row(&x.row(i).to_vec());
            for (j, v) in scaled.into_iter().enumerate() {
                row[j] = v;
            }
        }
        out
    }
}
