use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

use super::forest::RandomForest;
use super::gbdt::GradientBoosting;
use super::ridge::RidgeRegression;
use super::scaler::Scaler;

/// The closed set of model algorithms the trainer fits per sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    RandomForest,
    GradientBoosting,
    Ridge,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::RandomForest,
        AlgorithmKind::GradientBoosting,
        AlgorithmKind::Ridge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::RandomForest => "random_forest",
            AlgorithmKind::GradientBoosting => "gradient_boosting",
            AlgorithmKind::Ridge => "ridge",
        }
    }
}

impl FromStr for AlgorithmKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random_forest" => Ok(AlgorithmKind::RandomForest),
            "gradient_boosting" => Ok(AlgorithmKind::GradientBoosting),
            "ridge" => Ok(AlgorithmKind::Ridge),
            _ => Err(anyhow!("unknown algorithm kind: {s}")),
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fitted model of any algorithm kind, with one uniform predict surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FittedModel {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    Ridge(RidgeRegression),
}

impl FittedModel {
    pub fn predict(&self, scaled_row: &[f64]) -> f64 {
        match self {
            FittedModel::RandomForest(m) => m.predict(scaled_row),
            FittedModel::GradientBoosting(m) => m.predict(scaled_row),
            FittedModel::Ridge(m) => m.predict(scaled_row),
        }
    }
}

/// Evaluation metrics for one model on one partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub r2: f64,
    pub mse: f64,
    pub mae: f64,
    pub direction_accuracy: f64,
}

/// One fitted candidate with its validation metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateModel {
    pub kind: AlgorithmKind,
    pub model: FittedModel,
    pub validation: EvalMetrics,
}

/// Everything the predictor needs for one sector, serialized as the model
/// version's params blob: the scaler, every fitted candidate (kept for the
/// ensemble-agreement confidence term), and which candidate won selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub scaler: Scaler,
    pub candidates: Vec<CandidateModel>,
    pub best: AlgorithmKind,
}

/// A scored next-day prediction.
#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub predicted_change: f64,
    pub confidence: f64,
    pub candidate_predictions: Vec<(AlgorithmKind, f64)>,
}

impl ModelBundle {
    pub fn best_candidate(&self) -> &CandidateModel {
        self.candidates
            .iter()
            .find(|c| c.kind == self.best)
            .unwrap_or(&self.candidates[0])
    }

    /// Score one feature row.
    ///
    /// The predicted change comes from the selected candidate. Confidence
    /// blends the winner's validation direction accuracy with how tightly
    /// the candidates agree:
    /// `0.6 × direction_accuracy + 0.4 × 1/(1 + spread)`, where spread is
    /// the candidate-prediction std over their mean magnitude. Both terms
    /// live in [0, 1] and tighter agreement can only raise the result.
    pub fn predict(&self, features: &FeatureVector) -> PredictionOutput {
        let scaled = self.scaler.transform_row(&features.to_array());

        let candidate_predictions: Vec<(AlgorithmKind, f64)> = self
            .candidates
            .iter()
            .map(|c| (c.kind, c.model.predict(&scaled)))
            .collect();

        let best = self.best_candidate();
        let predicted_change = candidate_predictions
            .iter()
            .find(|(kind, _)| *kind == self.best)
            .map(|(_, p)| *p)
            .unwrap_or_else(|| best.model.predict(&scaled));

        let agreement = agreement(&candidate_predictions);
        let confidence =
            (0.6 * best.validation.direction_accuracy + 0.4 * agreement).clamp(0.0, 1.0);

        PredictionOutput {
            predicted_change,
            confidence,
            candidate_predictions,
        }
    }
}

fn agreement(predictions: &[(AlgorithmKind, f64)]) -> f64 {
    if predictions.len() < 2 {
        return 1.0;
    }
    let values: Vec<f64> = predictions.iter().map(|(_, p)| *p).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let mean_abs = values.iter().map(|v| v.abs()).sum::<f64>() / n;

    let spread = variance.sqrt() / (mean_abs + 1e-8);
    1.0 / (1.0 + spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ridge::RidgeParams;
    use ndarray::Array2;

    fn neutral_features() -> FeatureVector {
        FeatureVector {
            ma5: 100.0,
            ma10: 100.0,
            ma20: 100.0,
            ma30: 100.0,
            ma60: 100.0,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            kdj_k: 50.0,
            kdj_d: 50.0,
            kdj_j: 50.0,
            boll_upper: 100.0,
            boll_mid: 100.0,
            boll_lower: 100.0,
            wr: -50.0,
            sentiment_score: 0.0,
            sentiment_positive_ratio: 0.5,
            sentiment_volatility: 0.0,
            price_position: 0.0,
            momentum: 0.0,
            trend_strength: 0.0,
            volume_ratio: 1.0,
        }
    }

    fn ridge_candidate(direction_accuracy: f64) -> CandidateModel {
        let x = Array2::from_shape_fn((10, FeatureVector::NUM_FEATURES), |(i, j)| {
            ((i * 7 + j) % 5) as f64
        });
        let y = vec![0.01; 10];
        CandidateModel {
            kind: AlgorithmKind::Ridge,
            model: FittedModel::Ridge(RidgeRegression::fit(&x, &y, RidgeParams::default())),
            validation: EvalMetrics {
                r2: 0.1,
                mse: 0.0,
                mae: 0.0,
                direction_accuracy,
            },
        }
    }

    #[test]
    fn algorithm_kind_round_trips() {
        for kind in AlgorithmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlgorithmKind>().unwrap(), kind);
        }
        assert!("mystery".parse::<AlgorithmKind>().is_err());
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        for acc in [0.0, 0.3, 0.55, 1.0] {
            let candidate = ridge_candidate(acc);
            let bundle = ModelBundle {
                scaler: Scaler::fit(&Array2::zeros((2, FeatureVector::NUM_FEATURES))),
                candidates: vec![candidate],
                best: AlgorithmKind::Ridge,
            };
            let out = bundle.predict(&neutral_features());
            assert!(
                (0.0..=1.0).contains(&out.confidence),
                "confidence {} for accuracy {acc}",
                out.confidence
            );
        }
    }

    #[test]
    fn tighter_agreement_raises_confidence() {
        let tight = agreement(&[
            (AlgorithmKind::Ridge, 0.010),
            (AlgorithmKind::RandomForest, 0.011),
            (AlgorithmKind::GradientBoosting, 0.009),
        ]);
        let loose = agreement(&[
            (AlgorithmKind::Ridge, 0.010),
            (AlgorithmKind::RandomForest, -0.020),
            (AlgorithmKind::GradientBoosting, 0.040),
        ]);
        assert!(tight > loose);
        assert!((0.0..=1.0).contains(&tight));
        assert!((0.0..=1.0).contains(&loose));
    }

    #[test]
    fn unanimous_candidates_score_full_agreement() {
        let a = agreement(&[
            (AlgorithmKind::Ridge, 0.02),
            (AlgorithmKind::RandomForest, 0.02),
        ]);
        assert!((a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bundle_blob_round_trips_through_json() {
        let candidate = ridge_candidate(0.6);
        let bundle = ModelBundle {
            scaler: Scaler::fit(&Array2::zeros((2, FeatureVector::NUM_FEATURES))),
            candidates: vec![candidate],
            best: AlgorithmKind::Ridge,
        };
        let json = serde_json::to_string(&bundle).unwrap();
        let restored: ModelBundle = serde_json::from_str(&json).unwrap();
        let features = neutral_features();
        assert_eq!(
            bundle.predict(&features).predicted_change,
            restored.predict(&features).predicted_change
        );
    }
}
