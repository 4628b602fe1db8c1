use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Ridge regression solved in closed form: `(XᵀX + λI) w = Xᵀy` on centered
/// data, intercept recovered from the means. The normal-equation system is
/// small (one row/column per feature) and solved by Gaussian elimination
/// with partial pivoting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    coefficients: Vec<f64>,
    intercept: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RidgeParams {
    pub lambda: f64,
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self { lambda: 1.0 }
    }
}

impl RidgeRegression {
    pub fn fit(x: &Array2<f64>, y: &[f64], params: RidgeParams) -> Self {
        let n = x.nrows();
        let p = x.ncols();
        if n == 0 {
            return Self {
                coefficients: vec![0.0; p],
                intercept: 0.0,
            };
        }

        let x_means: Vec<f64> = (0..p)
            .map(|j| (0..n).map(|i| x[[i, j]]).sum::<f64>() / n as f64)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n as f64;

        // Gram matrix of the centered design, plus the ridge penalty.
        let mut gram = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        for i in 0..n {
            for j in 0..p {
                let xj = x[[i, j]] - x_means[j];
                xty[j] += xj * (y[i] - y_mean);
                for k in j..p {
                    gram[j][k] += xj * (x[[i, k]] - x_means[k]);
                }
            }
        }
        for j in 0..p {
            for k in 0..j {
                gram[j][k] = gram[k][j];
            }
            gram[j][j] += params.lambda;
        }

        let coefficients = solve(gram, xty);
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_means)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        Self {
            coefficients,
            intercept,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting. The ridge penalty keeps the
/// system positive definite, so a vanishing pivot only appears for a
/// degenerate all-zero column; its coefficient collapses to 0.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let p = b.len();

    for col in 0..p {
        let pivot_row = (col..p)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        if pivot.abs() < 1e-12 {
            continue;
        }

        for row in (col + 1)..p {
            let factor = a[row][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..p {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; p];
    for col in (0..p).rev() {
        let mut sum = b[col];
        for k in (col + 1)..p {
            sum -= a[col][k] * x[k];
        }
        x[col] = if a[col][col].abs() < 1e-12 {
            0.0
        } else {
            sum / a[col][col]
        };
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_a_linear_relation() {
        // y = 2*x0 - 1*x1 + 3, tiny lambda keeps shrinkage negligible.
        let n = 50;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                (i % 10) as f64
            } else {
                ((i * 7) % 13) as f64
            }
        });
        let y: Vec<f64> = (0..n)
            .map(|i| 2.0 * x[[i, 0]] - x[[i, 1]] + 3.0)
            .collect();

        let model = RidgeRegression::fit(&x, &y, RidgeParams { lambda: 1e-6 });
        assert_relative_eq!(model.predict(&[4.0, 2.0]), 9.0, epsilon = 1e-3);
        assert_relative_eq!(model.predict(&[0.0, 0.0]), 3.0, epsilon = 1e-3);
    }

    #[test]
    fn shrinkage_pulls_coefficients_toward_zero() {
        let n = 20;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..n).map(|i| 5.0 * i as f64).collect();

        let loose = RidgeRegression::fit(&x, &y, RidgeParams { lambda: 1e-6 });
        let tight = RidgeRegression::fit(&x, &y, RidgeParams { lambda: 1e4 });
        assert!(tight.coefficients[0].abs() < loose.coefficients[0].abs());
    }

    #[test]
    fn constant_column_does_not_blow_up() {
        let n = 10;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let model = RidgeRegression::fit(&x, &y, RidgeParams::default());
        assert!(model.predict(&[5.0, 1.0]).is_finite());
    }
}
