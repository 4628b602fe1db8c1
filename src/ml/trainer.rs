use chrono::NaiveDate;
use ndarray::Array2;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::features::{FeatureRow, FeatureVector};

use super::forest::{ForestParams, RandomForest};
use super::gbdt::{BoostingParams, GradientBoosting};
use super::model::{AlgorithmKind, CandidateModel, EvalMetrics, FittedModel, ModelBundle};
use super::ridge::{RidgeParams, RidgeRegression};
use super::scaler::Scaler;

/// Chronological split ratios: train / validation / test.
const TRAIN_FRACTION: f64 = 0.8;
const VALIDATION_FRACTION: f64 = 0.1;

/// Direction accuracies closer than this are treated as tied and broken
/// by R².
const TIE_EPSILON: f64 = 1e-9;

/// Outcome of one per-sector training pass.
#[derive(Debug, Clone)]
pub struct TrainResult {
    pub sector: String,
    pub bundle: ModelBundle,
    pub best: AlgorithmKind,
    /// Metrics of the selected model on the held-out test partition. These
    /// are the reported numbers; the validation partition only drives
    /// selection.
    pub test_metrics: EvalMetrics,
    pub validation_metrics: EvalMetrics,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

/// Fits the three candidate algorithms for one sector and selects the best.
#[derive(Debug, Clone)]
pub struct Trainer {
    min_training_samples: usize,
    seed: u64,
}

impl Trainer {
    pub fn new(min_training_samples: usize, seed: u64) -> Self {
        Self {
            min_training_samples,
            seed,
        }
    }

    /// Train on the rows whose target is already known.
    ///
    /// Rows are split 80/10/10 in date order; shuffling would leak future
    /// closes into the training partition and overstate every metric.
    pub fn train(&self, sector: &str, rows: &[FeatureRow]) -> EngineResult<TrainResult> {
        let aligned: Vec<(&FeatureRow, f64)> = rows
            .iter()
            .filter_map(|r| r.target.map(|t| (r, t)))
            .collect();

        let n = aligned.len();
        if n < self.min_training_samples {
            return Err(EngineError::InsufficientData {
                sector: sector.to_string(),
                rows: n,
                required: self.min_training_samples,
            });
        }

        let (train_end, val_end) = split_points(n);
        let x = Array2::from_shape_fn((n, FeatureVector::NUM_FEATURES), |(i, j)| {
            aligned[i].0.features.to_array()[j]
        });
        let y: Vec<f64> = aligned.iter().map(|(_, t)| *t).collect();

        let scaler = Scaler::fit(&x.slice(ndarray::s![..train_end, ..]).to_owned());
        let scaled = scaler.transform(&x);

        let x_train = scaled.slice(ndarray::s![..train_end, ..]).to_owned();
        let y_train = &y[..train_end];

        let mut candidates = Vec::with_capacity(AlgorithmKind::ALL.len());
        for kind in AlgorithmKind::ALL {
            let model = self.fit(kind, &x_train, y_train);
            let validation =
                evaluate(&model, &scaled, &y, train_end..val_end);
            debug!(
                sector,
                algorithm = %kind,
                direction_accuracy = validation.direction_accuracy,
                r2 = validation.r2,
                "candidate evaluated"
            );
            candidates.push(CandidateModel {
                kind,
                model,
                validation,
            });
        }

        let best = select_best(
            &candidates
                .iter()
                .map(|c| (c.kind, c.validation))
                .collect::<Vec<_>>(),
        );
        let best_candidate = candidates
            .iter()
            .find(|c| c.kind == best)
            .expect("selected kind is one of the candidates");

        let validation_metrics = best_candidate.validation;
        let test_metrics = evaluate(&best_candidate.model, &scaled, &y, val_end..n);

        info!(
            sector,
            best = %best,
            test_direction_accuracy = test_metrics.direction_accuracy,
            test_r2 = test_metrics.r2,
            samples = n,
            "sector model trained"
        );

        Ok(TrainResult {
            sector: sector.to_string(),
            best,
            bundle: ModelBundle {
                scaler,
                candidates,
                best,
            },
            test_metrics,
            validation_metrics,
            train_samples: train_end,
            validation_samples: val_end - train_end,
            test_samples: n - val_end,
            window_start: aligned[0].0.date,
            window_end: aligned[n - 1].0.date,
        })
    }

    fn fit(&self, kind: AlgorithmKind, x: &Array2<f64>, y: &[f64]) -> FittedModel {
        match kind {
            AlgorithmKind::RandomForest => FittedModel::RandomForest(RandomForest::fit(
                x,
                y,
                ForestParams {
                    seed: self.seed,
                    ..ForestParams::default()
                },
            )),
            AlgorithmKind::GradientBoosting => {
                FittedModel::GradientBoosting(GradientBoosting::fit(x, y, BoostingParams::default()))
            }
            AlgorithmKind::Ridge => {
                FittedModel::Ridge(RidgeRegression::fit(x, y, RidgeParams::default()))
            }
        }
    }
}

/// Partition boundaries, each partition guaranteed non-empty.
fn split_points(n: usize) -> (usize, usize) {
    let train_end = ((n as f64 * TRAIN_FRACTION) as usize).clamp(1, n - 2);
    let val_end = ((n as f64 * (TRAIN_FRACTION + VALIDATION_FRACTION)) as usize)
        .clamp(train_end + 1, n - 1);
    (train_end, val_end)
}

fn evaluate(
    model: &FittedModel,
    scaled: &Array2<f64>,
    y: &[f64],
    range: std::ops::Range<usize>,
) -> EvalMetrics {
    let actual: Vec<f64> = range.clone().map(|i| y[i]).collect();
    let predicted: Vec<f64> = range
        .map(|i| model.predict(&scaled.row(i).to_vec()))
        .collect();

    EvalMetrics {
        r2: r_squared(&actual, &predicted),
        mse: mean_squared_error(&actual, &predicted),
        mae: mean_absolute_error(&actual, &predicted),
        direction_accuracy: direction_accuracy(&actual, &predicted),
    }
}

/// Highest validation direction accuracy wins; ties go to the higher R².
pub fn select_best(candidates: &[(AlgorithmKind, EvalMetrics)]) -> AlgorithmKind {
    let mut best = candidates[0];
    for &candidate in &candidates[1..] {
        let (_, metrics) = candidate;
        let (_, best_metrics) = best;
        let diff = metrics.direction_accuracy - best_metrics.direction_accuracy;
        if diff > TIE_EPSILON || (diff.abs() <= TIE_EPSILON && metrics.r2 > best_metrics.r2) {
            best = candidate;
        }
    }
    best.0
}

pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Fraction of rows whose predicted sign matches the realized sign.
pub fn direction_accuracy(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let matches = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| sign(**a) == sign(**p))
        .count();
    matches as f64 / actual.len() as f64
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metrics(direction_accuracy: f64, r2: f64) -> EvalMetrics {
        EvalMetrics {
            r2,
            mse: 0.0,
            mae: 0.0,
            direction_accuracy,
        }
    }

    fn uptrend_rows(n: usize) -> Vec<FeatureRow> {
        use crate::types::{DailySeries, SectorBar};
        use crate::features::FeatureBuilder;
        use rust_decimal::Decimal;
        use rust_decimal_macros::dec;

        let mut series = DailySeries::new("Energy");
        for i in 0..n {
            let close = Decimal::from(100 + i as i64) + Decimal::new((i as i64 * 7) % 10, 1);
            series.push(SectorBar {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(1000) + Decimal::from((i as i64 * 13) % 200),
                amount: dec!(0),
                turnover: dec!(0),
            });
        }
        FeatureBuilder::new(n.min(60)).build(&series, &[]).unwrap()
    }

    #[test]
    fn selection_prefers_higher_direction_accuracy() {
        let best = select_best(&[
            (AlgorithmKind::RandomForest, metrics(0.55, 0.9)),
            (AlgorithmKind::GradientBoosting, metrics(0.55, 0.9)),
            (AlgorithmKind::Ridge, metrics(0.60, 0.1)),
        ]);
        assert_eq!(best, AlgorithmKind::Ridge);
    }

    #[test]
    fn selection_breaks_ties_by_r2() {
        let best = select_best(&[
            (AlgorithmKind::RandomForest, metrics(0.55, 0.1)),
            (AlgorithmKind::GradientBoosting, metrics(0.55, 0.3)),
            (AlgorithmKind::Ridge, metrics(0.55, 0.2)),
        ]);
        assert_eq!(best, AlgorithmKind::GradientBoosting);
    }

    #[test]
    fn split_points_keep_every_partition_nonempty() {
        for n in [30usize, 31, 59, 60, 100] {
            let (train_end, val_end) = split_points(n);
            assert!(train_end >= 1);
            assert!(val_end > train_end);
            assert!(n > val_end, "n = {n}");
        }
        assert_eq!(split_points(100), (80, 90));
    }

    #[test]
    fn metric_formulas_match_definitions() {
        let actual = [1.0, -1.0, 2.0, 0.5];
        let predicted = [0.5, -0.5, 2.5, -0.5];
        assert_relative_eq!(mean_absolute_error(&actual, &predicted), 0.625, epsilon = 1e-12);
        assert_relative_eq!(mean_squared_error(&actual, &predicted), 0.4375, epsilon = 1e-12);
        assert_relative_eq!(direction_accuracy(&actual, &predicted), 0.75, epsilon = 1e-12);
        // Perfect predictions give R² = 1.
        assert_relative_eq!(r_squared(&actual, &actual), 1.0, epsilon = 1e-12);
        // Constant actuals are defined as 0, not NaN.
        assert_eq!(r_squared(&[2.0, 2.0], &[1.0, 3.0]), 0.0);
    }

    #[test]
    fn too_few_aligned_rows_is_insufficient_data() {
        let trainer = Trainer::new(30, 42);
        let rows = uptrend_rows(20);
        let err = trainer.train("Energy", &rows).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[test]
    fn training_is_deterministic() {
        let trainer = Trainer::new(30, 42);
        let rows = uptrend_rows(90);
        let a = trainer.train("Energy", &rows).unwrap();
        let b = trainer.train("Energy", &rows).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.test_metrics.r2, b.test_metrics.r2);
        assert_eq!(
            a.test_metrics.direction_accuracy,
            b.test_metrics.direction_accuracy
        );
    }

    #[test]
    fn window_and_partitions_cover_aligned_rows() {
        let trainer = Trainer::new(30, 42);
        let rows = uptrend_rows(90);
        let result = trainer.train("Energy", &rows).unwrap();

        // 89 rows carry targets (the tail row is unreconciled).
        let total = result.train_samples + result.validation_samples + result.test_samples;
        assert_eq!(total, 89);
        assert_eq!(result.window_start, rows[0].date);
        assert_eq!(result.window_end, rows[88].date);
        assert!(result.train_samples > result.validation_samples);
    }

    #[test]
    fn uptrend_test_split_direction_accuracy_at_least_half() {
        let trainer = Trainer::new(30, 42);
        let rows = uptrend_rows(90);
        let result = trainer.train("Energy", &rows).unwrap();
        assert!(
            result.test_metrics.direction_accuracy >= 0.5,
            "direction accuracy {}",
            result.test_metrics.direction_accuracy
        );
    }
}
