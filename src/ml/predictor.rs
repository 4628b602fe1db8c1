use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::features::FeatureRow;

use super::model::AlgorithmKind;
use super::store::{ModelStore, ModelVersion};

/// One scored sector for one target date.
#[derive(Debug, Clone, Serialize)]
pub struct SectorPrediction {
    pub sector: String,
    pub date: NaiveDate,
    pub predicted_change: f64,
    pub confidence: f64,
    pub version: ModelVersion,
    pub algorithm: AlgorithmKind,
    /// Test-split metrics of the model that produced this prediction,
    /// carried along so the tracker can store them with the record.
    pub model_r2: f64,
    pub model_direction_accuracy: f64,
}

/// Scores sectors with their active persisted models.
#[derive(Debug, Clone)]
pub struct Predictor {
    store: ModelStore,
}

impl Predictor {
    pub fn new(store: ModelStore) -> Self {
        Self { store }
    }

    /// Score `target_date` for one sector from its latest feature row,
    /// using the sector's active model.
    pub async fn predict(
        &self,
        sector: &str,
        latest: &FeatureRow,
        target_date: NaiveDate,
    ) -> EngineResult<SectorPrediction> {
        let stored = self.store.get_active(sector).await?.ok_or_else(|| {
            EngineError::NoModelAvailable {
                sector: sector.to_string(),
            }
        })?;

        let output = stored.bundle.predict(&latest.features);
        debug!(
            sector,
            features_as_of = %latest.date,
            target_date = %target_date,
            predicted_change = output.predicted_change,
            confidence = output.confidence,
            version = %stored.version,
            "sector scored"
        );

        Ok(SectorPrediction {
            sector: sector.to_string(),
            date: target_date,
            predicted_change: output.predicted_change,
            confidence: output.confidence,
            version: stored.version,
            algorithm: stored.algorithm,
            model_r2: stored.metrics.r2,
            model_direction_accuracy: stored.metrics.direction_accuracy,
        })
    }
}

/// Expected top gainers and losers, each strongest-first.
pub fn top_movers(
    predictions: &[SectorPrediction],
    n: usize,
) -> (Vec<String>, Vec<String>) {
    let mut sorted: Vec<&SectorPrediction> = predictions.iter().collect();
    sorted.sort_by(|a, b| {
        b.predicted_change
            .partial_cmp(&a.predicted_change)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let gainers = sorted
        .iter()
        .filter(|p| p.predicted_change > 0.0)
        .take(n)
        .map(|p| p.sector.clone())
        .collect();
    let losers = sorted
        .iter()
        .rev()
        .filter(|p| p.predicted_change < 0.0)
        .take(n)
        .map(|p| p.sector.clone())
        .collect();

    (gainers, losers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(sector: &str, change: f64) -> SectorPrediction {
        SectorPrediction {
            sector: sector.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            predicted_change: change,
            confidence: 0.5,
            version: ModelVersion::initial(),
            algorithm: AlgorithmKind::Ridge,
            model_r2: 0.0,
            model_direction_accuracy: 0.5,
        }
    }

    #[test]
    fn top_movers_split_by_sign() {
        let predictions = vec![
            prediction("Energy", 0.02),
            prediction("Tech", 0.04),
            prediction("Utilities", -0.01),
            prediction("Finance", -0.03),
            prediction("Health", 0.0),
        ];
        let (gainers, losers) = top_movers(&predictions, 3);
        assert_eq!(gainers, vec!["Tech", "Energy"]);
        assert_eq!(losers, vec!["Finance", "Utilities"]);
    }

    #[test]
    fn top_movers_respects_limit() {
        let predictions: Vec<SectorPrediction> = (0..6)
            .map(|i| prediction(&format!("S{i}"), 0.01 * (i as f64 + 1.0)))
            .collect();
        let (gainers, losers) = top_movers(&predictions, 3);
        assert_eq!(gainers.len(), 3);
        assert_eq!(gainers[0], "S5");
        assert!(losers.is_empty());
    }
}
