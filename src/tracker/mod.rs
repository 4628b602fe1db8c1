use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::ml::SectorPrediction;

/// Floor for the accuracy denominator, so near-zero realized changes do not
/// blow the relative error up.
const ACCURACY_EPSILON: f64 = 1e-4;

/// Records predictions and reconciles them against realized outcomes.
///
/// One `model_performance` row per (date, sector). Recording is idempotent
/// while the outcome is unknown; once reconciled the row is frozen and any
/// further write attempt fails `AlreadyReconciled`.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    pool: SqlitePool,
    top_n: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub window_days: u32,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub total_predictions: u64,
    pub reconciled: u64,
    pub pending: u64,
    /// Mean per-record accuracy over reconciled rows.
    pub overall_accuracy: f64,
    /// Fraction of reconciled rows with the correct sign.
    pub overall_direction_accuracy: f64,
    /// How often the predicted top-N gainers landed in the realized top
    /// quartile of their day (and losers in the bottom quartile).
    pub top_gainer_hit_rate: f64,
    pub top_loser_hit_rate: f64,
    pub sectors: Vec<SectorPerformance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectorPerformance {
    pub sector: String,
    pub predictions: u64,
    pub reconciled: u64,
    pub accuracy: f64,
    pub direction_accuracy: f64,
}

#[derive(Debug, Clone)]
struct PerformanceRow {
    date: NaiveDate,
    sector: String,
    prediction: f64,
    actual_change: Option<f64>,
    accuracy: Option<f64>,
    direction_correct: Option<bool>,
}

impl PerformanceTracker {
    pub fn new(pool: SqlitePool, top_n: usize) -> Self {
        Self { pool, top_n }
    }

    /// Append (or overwrite, while unreconciled) the prediction record for
    /// one (date, sector).
    pub async fn record(&self, prediction: &SectorPrediction) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO model_performance
                (date, sector, prediction, confidence, r2_score, direction_accuracy)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(date, sector) DO UPDATE SET
                prediction = excluded.prediction,
                confidence = excluded.confidence,
                r2_score = excluded.r2_score,
                direction_accuracy = excluded.direction_accuracy
            WHERE model_performance.actual_change IS NULL
            "#,
        )
        .bind(prediction.date.to_string())
        .bind(&prediction.sector)
        .bind(prediction.predicted_change)
        .bind(prediction.confidence)
        .bind(prediction.model_r2)
        .bind(prediction.model_direction_accuracy)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::AlreadyReconciled {
                date: prediction.date,
                sector: prediction.sector.clone(),
            });
        }

        debug!(
            sector = %prediction.sector,
            date = %prediction.date,
            predicted_change = prediction.predicted_change,
            "prediction recorded"
        );
        Ok(())
    }

    /// Attach the realized outcome to a recorded prediction, exactly once.
    pub async fn reconcile(
        &self,
        date: NaiveDate,
        sector: &str,
        actual_change: f64,
    ) -> EngineResult<()> {
        let row = sqlx::query(
            r#"
            SELECT prediction, actual_change FROM model_performance
            WHERE date = ? AND sector = ?
            "#,
        )
        .bind(date.to_string())
        .bind(sector)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| EngineError::UpstreamData {
            scope: sector.to_string(),
            reason: format!("no prediction recorded for {date}"),
        })?;

        if row.get::<Option<f64>, _>("actual_change").is_some() {
            return Err(EngineError::AlreadyReconciled {
                date,
                sector: sector.to_string(),
            });
        }

        let predicted: f64 = row.get("prediction");
        let accuracy = accuracy(predicted, actual_change);
        let direction_correct = sign(predicted) == sign(actual_change);

        // The IS NULL guard serializes racing reconcilers: the loser
        // matches zero rows.
        let result = sqlx::query(
            r#"
            UPDATE model_performance
            SET actual_change = ?, accuracy = ?, direction_correct = ?
            WHERE date = ? AND sector = ? AND actual_change IS NULL
            "#,
        )
        .bind(actual_change)
        .bind(accuracy)
        .bind(direction_correct)
        .bind(date.to_string())
        .bind(sector)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::AlreadyReconciled {
                date,
                sector: sector.to_string(),
            });
        }

        info!(
            sector,
            %date,
            predicted,
            actual_change,
            accuracy,
            direction_correct,
            "outcome reconciled"
        );
        Ok(())
    }

    /// Sectors with a recorded but not yet reconciled prediction for `date`.
    pub async fn unreconciled_sectors(&self, date: NaiveDate) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT sector FROM model_performance
            WHERE date = ? AND actual_change IS NULL
            ORDER BY sector
            "#,
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("sector")).collect())
    }

    /// Distinct dates that still have unreconciled predictions at or before
    /// `cutoff`, ascending.
    pub async fn pending_dates(&self, cutoff: NaiveDate) -> EngineResult<Vec<NaiveDate>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT date FROM model_performance
            WHERE actual_change IS NULL AND date <= ?
            ORDER BY date ASC
            "#,
        )
        .bind(cutoff.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let date: String = row.get("date");
                NaiveDate::from_str(&date).map_err(|_| EngineError::UpstreamData {
                    scope: "model_performance".to_string(),
                    reason: format!("invalid date: {date}"),
                })
            })
            .collect()
    }

    /// Rolling statistics over the trailing window, anchored at the newest
    /// recorded date so historical backtests stay stable.
    pub async fn summary(&self, window_days: u32) -> EngineResult<PerformanceSummary> {
        let newest = sqlx::query("SELECT MAX(date) AS newest FROM model_performance")
            .fetch_one(&self.pool)
            .await?
            .get::<Option<String>, _>("newest");

        let Some(newest) = newest else {
            return Ok(empty_summary(window_days));
        };
        let window_end = NaiveDate::from_str(&newest).map_err(|_| EngineError::UpstreamData {
            scope: "model_performance".to_string(),
            reason: format!("invalid date: {newest}"),
        })?;
        let window_start = window_end - Duration::days(window_days.saturating_sub(1) as i64);

        let rows = self.rows_between(window_start, window_end).await?;
        Ok(summarize(window_days, window_start, window_end, &rows, self.top_n))
    }

    async fn rows_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<Vec<PerformanceRow>> {
        let rows = sqlx::query(
            r#"
            SELECT date, sector, prediction, actual_change, accuracy, direction_correct
            FROM model_performance
            WHERE date >= ? AND date <= ?
            ORDER BY date ASC, sector ASC
            "#,
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let date_str: String = row.get("date");
            out.push(PerformanceRow {
                date: NaiveDate::from_str(&date_str).map_err(|_| EngineError::UpstreamData {
                    scope: "model_performance".to_string(),
                    reason: format!("invalid date: {date_str}"),
                })?,
                sector: row.get("sector"),
                prediction: row.get("prediction"),
                actual_change: row.get("actual_change"),
                accuracy: row.get("accuracy"),
                direction_correct: row
                    .get::<Option<i64>, _>("direction_correct")
                    .map(|v| v == 1),
            });
        }
        Ok(out)
    }
}

/// `1 − |pred − actual| / max(|actual|, ε)`, clipped to [0, 1].
fn accuracy(predicted: f64, actual: f64) -> f64 {
    let denom = actual.abs().max(ACCURACY_EPSILON);
    (1.0 - (predicted - actual).abs() / denom).clamp(0.0, 1.0)
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

fn empty_summary(window_days: u32) -> PerformanceSummary {
    PerformanceSummary {
        window_days,
        window_start: None,
        window_end: None,
        total_predictions: 0,
        reconciled: 0,
        pending: 0,
        overall_accuracy: 0.0,
        overall_direction_accuracy: 0.0,
        top_gainer_hit_rate: 0.0,
        top_loser_hit_rate: 0.0,
        sectors: Vec::new(),
    }
}

fn summarize(
    window_days: u32,
    window_start: NaiveDate,
    window_end: NaiveDate,
    rows: &[PerformanceRow],
    top_n: usize,
) -> PerformanceSummary {
    let reconciled: Vec<&PerformanceRow> =
        rows.iter().filter(|r| r.actual_change.is_some()).collect();

    let overall_accuracy = mean(reconciled.iter().filter_map(|r| r.accuracy));
    let overall_direction_accuracy = mean(
        reconciled
            .iter()
            .filter_map(|r| r.direction_correct.map(|c| if c { 1.0 } else { 0.0 })),
    );

    let mut by_sector: BTreeMap<&str, (u64, u64, f64, f64)> = BTreeMap::new();
    for row in rows {
        let entry = by_sector.entry(&row.sector).or_default();
        entry.0 += 1;
        if row.actual_change.is_some() {
            entry.1 += 1;
            entry.2 += row.accuracy.unwrap_or(0.0);
            entry.3 += row.direction_correct.map(|c| c as u8 as f64).unwrap_or(0.0);
        }
    }
    let sectors = by_sector
        .into_iter()
        .map(|(sector, (predictions, reconciled, acc_sum, dir_sum))| SectorPerformance {
            sector: sector.to_string(),
            predictions,
            reconciled,
            accuracy: if reconciled > 0 { acc_sum / reconciled as f64 } else { 0.0 },
            direction_accuracy: if reconciled > 0 { dir_sum / reconciled as f64 } else { 0.0 },
        })
        .collect();

    let (top_gainer_hit_rate, top_loser_hit_rate) = top_hit_rates(&reconciled, top_n);

    PerformanceSummary {
        window_days,
        window_start: Some(window_start),
        window_end: Some(window_end),
        total_predictions: rows.len() as u64,
        reconciled: reconciled.len() as u64,
        pending: (rows.len() - reconciled.len()) as u64,
        overall_accuracy,
        overall_direction_accuracy,
        top_gainer_hit_rate,
        top_loser_hit_rate,
        sectors,
    }
}

/// Per day: did the predicted top-N gainers land in the realized top
/// quartile (and the predicted losers in the bottom quartile)? Aggregated
/// as hits over picks across the window.
fn top_hit_rates(reconciled: &[&PerformanceRow], top_n: usize) -> (f64, f64) {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PerformanceRow>> = BTreeMap::new();
    for row in reconciled {
        by_date.entry(row.date).or_default().push(row);
    }

    let mut gainer_hits = 0usize;
    let mut gainer_picks = 0usize;
    let mut loser_hits = 0usize;
    let mut loser_picks = 0usize;

    for rows in by_date.values() {
        let mut actuals: Vec<f64> = rows.iter().filter_map(|r| r.actual_change).collect();
        if actuals.is_empty() {
            continue;
        }
        actuals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let upper = quantile(&actuals, 0.75);
        let lower = quantile(&actuals, 0.25);

        let mut by_prediction: Vec<&&PerformanceRow> = rows.iter().collect();
        by_prediction.sort_by(|a, b| {
            b.prediction
                .partial_cmp(&a.prediction)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for row in by_prediction.iter().filter(|r| r.prediction > 0.0).take(top_n) {
            gainer_picks += 1;
            if row.actual_change.unwrap_or(f64::MIN) >= upper {
                gainer_hits += 1;
            }
        }
        for row in by_prediction
            .iter()
            .rev()
            .filter(|r| r.prediction < 0.0)
            .take(top_n)
        {
            loser_picks += 1;
            if row.actual_change.unwrap_or(f64::MAX) <= lower {
                loser_hits += 1;
            }
        }
    }

    let rate = |hits: usize, picks: usize| {
        if picks == 0 {
            0.0
        } else {
            hits as f64 / picks as f64
        }
    };
    (rate(gainer_hits, gainer_picks), rate(loser_hits, loser_picks))
}

/// Nearest-rank quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        return 0.0;
    }
    collected.iter().sum::<f64>() / collected.len() as f64
}
