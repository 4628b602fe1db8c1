use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::data::{MarketDataProvider, SqliteMarketData};
use crate::database;
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureBuilder;
use crate::ml::{top_movers, ModelStore, Predictor, SectorPrediction, Trainer};
use crate::tracker::{PerformanceSummary, PerformanceTracker};
use crate::types::SectorDef;

use super::run::{DailyTrainingRun, RunPhase, RunStatus, SectorFailure};

/// Batch prediction result: successes plus the sectors that could not be
/// scored, never a silent partial answer.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionBatch {
    pub date: NaiveDate,
    pub predictions: Vec<SectorPrediction>,
    pub top_gainers: Vec<String>,
    pub top_losers: Vec<String>,
    pub failures: Vec<SectorFailure>,
}

/// Outcome of reconciling one date's predictions against realized closes.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub date: NaiveDate,
    pub reconciled: Vec<String>,
    pub failures: Vec<SectorFailure>,
}

/// One cron-style daily invocation: reconcile what can be reconciled, then
/// retrain, then score the next day.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub date: NaiveDate,
    pub reconciled: usize,
    pub training: DailyTrainingRun,
    pub predictions: PredictionBatch,
}

enum TrainOutcome {
    Trained { samples: usize, r2: f64, direction_accuracy: f64 },
    Failed { sector: String, error: EngineError },
    Cancelled,
    Fatal(EngineError),
}

enum PredictOutcome {
    Predicted(Box<SectorPrediction>),
    Failed { sector: String, error: EngineError },
    Fatal(EngineError),
}

/// Drives the daily pipeline over every sector, isolating per-sector
/// failures. Only the store being unreachable fails a whole run.
pub struct SectorAgent {
    settings: Settings,
    pool: SqlitePool,
    data: Arc<dyn MarketDataProvider>,
    builder: FeatureBuilder,
    trainer: Trainer,
    store: ModelStore,
    predictor: Predictor,
    tracker: PerformanceTracker,
    cancel: Arc<AtomicBool>,
}

impl SectorAgent {
    pub async fn connect(settings: Settings) -> anyhow::Result<Self> {
        let pool = database::connect(&settings.database_url).await?;
        let agent = Self::with_pool(settings, pool);
        agent.log_idle();
        Ok(agent)
    }

    pub fn with_pool(settings: Settings, pool: SqlitePool) -> Self {
        let store = ModelStore::new(pool.clone());
        Self {
            data: Arc::new(SqliteMarketData::new(pool.clone())),
            builder: FeatureBuilder::new(settings.data.min_history_days),
            trainer: Trainer::new(settings.training.min_training_samples, settings.training.seed),
            predictor: Predictor::new(store.clone()),
            tracker: PerformanceTracker::new(pool.clone(), settings.prediction.top_n),
            store,
            pool,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn log_idle(&self) {
        info!(phase = %RunPhase::Idle, "sector agent ready");
    }

    /// Cooperative cancellation: setting the flag stops the run before the
    /// next sector; records already written stay valid.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Train every sector for `date` and append the audit row.
    ///
    /// Re-running for an already-trained date appends new model versions
    /// rather than erroring.
    pub async fn run_daily_training(&self, date: NaiveDate) -> EngineResult<DailyTrainingRun> {
        let run_id = Uuid::new_v4();
        info!(%run_id, %date, phase = %RunPhase::FetchingFeatures, "daily training started");

        let sectors = self.data.sectors().await?;
        if sectors.is_empty() {
            warn!(%date, "no sectors in the membership feed");
        }

        info!(phase = %RunPhase::Training, sectors = sectors.len(), "training sectors");
        let outcomes: Vec<TrainOutcome> = stream::iter(sectors)
            .map(|sector| self.train_sector(sector, date))
            .buffer_unordered(self.settings.pipeline.max_concurrent_sectors)
            .collect()
            .await;

        let mut sectors_trained = 0usize;
        let mut total_samples = 0usize;
        let mut r2_sum = 0.0;
        let mut dir_sum = 0.0;
        let mut failures = Vec::new();
        let mut cancelled = false;

        for outcome in outcomes {
            match outcome {
                TrainOutcome::Trained { samples, r2, direction_accuracy } => {
                    sectors_trained += 1;
                    total_samples += samples;
                    r2_sum += r2;
                    dir_sum += direction_accuracy;
                }
                TrainOutcome::Failed { sector, error } => failures.push(SectorFailure {
                    sector,
                    error: error.to_string(),
                }),
                TrainOutcome::Cancelled => cancelled = true,
                TrainOutcome::Fatal(error) => {
                    error!(%error, "store unreachable, daily training failed");
                    return Err(error);
                }
            }
        }
        failures.sort_by(|a, b| a.sector.cmp(&b.sector));

        let status = if cancelled || self.cancel.load(Ordering::SeqCst) {
            RunStatus::Cancelled
        } else if failures.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };

        let divisor = sectors_trained.max(1) as f64;
        let run = DailyTrainingRun {
            run_id,
            date,
            sectors_trained,
            total_samples,
            avg_r2: r2_sum / divisor,
            avg_direction_accuracy: dir_sum / divisor,
            status,
            failures,
        };

        info!(phase = %RunPhase::Recording, "persisting run audit row");
        run.persist(&self.pool).await?;
        info!(
            phase = %RunPhase::Done,
            status = %run.status,
            sectors_trained = run.sectors_trained,
            failures = run.failures.len(),
            "daily training finished"
        );
        Ok(run)
    }

    async fn train_sector(&self, sector: SectorDef, date: NaiveDate) -> TrainOutcome {
        if self.cancel.load(Ordering::SeqCst) {
            return TrainOutcome::Cancelled;
        }

        let name = sector.name.clone();
        match self.train_sector_inner(&sector, date).await {
            Ok((samples, r2, direction_accuracy)) => TrainOutcome::Trained {
                samples,
                r2,
                direction_accuracy,
            },
            Err(error) if error.is_fatal() => TrainOutcome::Fatal(error),
            Err(error) => {
                warn!(sector = %name, %error, "sector skipped during training");
                TrainOutcome::Failed { sector: name, error }
            }
        }
    }

    async fn train_sector_inner(
        &self,
        sector: &SectorDef,
        date: NaiveDate,
    ) -> EngineResult<(usize, f64, f64)> {
        let series = self.data.sector_series(sector, date).await?;
        let sentiment = self.data.sentiment(&sector.name, date).await?;
        let rows = self.builder.build(&series, &sentiment)?;

        let result = self.trainer.train(&sector.name, &rows)?;
        let samples = result.train_samples + result.validation_samples + result.test_samples;
        let r2 = result.test_metrics.r2;
        let direction_accuracy = result.test_metrics.direction_accuracy;
        self.store.save(&result).await?;

        Ok((samples, r2, direction_accuracy))
    }

    /// Score `target_date` for every sector with an active model, recording
    /// each prediction. Sectors that cannot be scored land in the failure
    /// list without aborting the batch.
    pub async fn predict_sectors(&self, target_date: NaiveDate) -> EngineResult<PredictionBatch> {
        info!(%target_date, phase = %RunPhase::Predicting, "scoring sectors");
        let sectors = self.data.sectors().await?;

        let outcomes: Vec<PredictOutcome> = stream::iter(sectors)
            .map(|sector| self.predict_sector(sector, target_date))
            .buffer_unordered(self.settings.pipeline.max_concurrent_sectors)
            .collect()
            .await;

        let mut predictions = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                PredictOutcome::Predicted(p) => predictions.push(*p),
                PredictOutcome::Failed { sector, error } => failures.push(SectorFailure {
                    sector,
                    error: error.to_string(),
                }),
                PredictOutcome::Fatal(error) => {
                    error!(%error, "store unreachable, prediction batch failed");
                    return Err(error);
                }
            }
        }
        predictions.sort_by(|a, b| a.sector.cmp(&b.sector));
        failures.sort_by(|a, b| a.sector.cmp(&b.sector));

        let (top_gainers, top_losers) = top_movers(&predictions, self.settings.prediction.top_n);
        info!(
            %target_date,
            predicted = predictions.len(),
            failures = failures.len(),
            top_gainers = ?top_gainers,
            top_losers = ?top_losers,
            "prediction batch finished"
        );

        Ok(PredictionBatch {
            date: target_date,
            predictions,
            top_gainers,
            top_losers,
            failures,
        })
    }

    async fn predict_sector(&self, sector: SectorDef, target_date: NaiveDate) -> PredictOutcome {
        let name = sector.name.clone();
        match self.predict_sector_inner(&sector, target_date).await {
            Ok(prediction) => PredictOutcome::Predicted(Box::new(prediction)),
            Err(error) if error.is_fatal() => PredictOutcome::Fatal(error),
            Err(error) => {
                warn!(sector = %name, %error, "sector skipped during prediction");
                PredictOutcome::Failed { sector: name, error }
            }
        }
    }

    async fn predict_sector_inner(
        &self,
        sector: &SectorDef,
        target_date: NaiveDate,
    ) -> EngineResult<SectorPrediction> {
        // Features come from bars strictly before the day being predicted.
        let as_of = target_date - Duration::days(1);
        let series = self.data.sector_series(sector, as_of).await?;
        let sentiment = self.data.sentiment(&sector.name, as_of).await?;
        let rows = self.builder.build(&series, &sentiment)?;

        let latest = rows.last().ok_or_else(|| EngineError::InsufficientData {
            sector: sector.name.clone(),
            rows: 0,
            required: 1,
        })?;

        let prediction = self.predictor.predict(&sector.name, latest, target_date).await?;
        self.tracker.record(&prediction).await?;
        Ok(prediction)
    }

    /// Reconcile every recorded-but-pending prediction for `date` against
    /// the realized close-to-close change.
    pub async fn reconcile_outcomes(&self, date: NaiveDate) -> EngineResult<ReconcileReport> {
        let pending = self.tracker.unreconciled_sectors(date).await?;
        let sectors: HashMap<String, SectorDef> = self
            .data
            .sectors()
            .await?
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut reconciled = Vec::new();
        let mut failures = Vec::new();

        for name in pending {
            let result = match sectors.get(&name) {
                Some(sector) => self.reconcile_sector(sector, date).await,
                None => Err(EngineError::UpstreamData {
                    scope: name.clone(),
                    reason: "sector no longer in the membership feed".to_string(),
                }),
            };
            match result {
                Ok(()) => reconciled.push(name),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(sector = %name, %error, "outcome left pending");
                    failures.push(SectorFailure {
                        sector: name,
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            %date,
            reconciled = reconciled.len(),
            pending = failures.len(),
            "reconciliation finished"
        );
        Ok(ReconcileReport {
            date,
            reconciled,
            failures,
        })
    }

    async fn reconcile_sector(&self, sector: &SectorDef, date: NaiveDate) -> EngineResult<()> {
        let series = self.data.sector_series(sector, date).await?;
        let idx = series
            .bars
            .iter()
            .position(|b| b.date == date)
            .ok_or_else(|| EngineError::UpstreamData {
                scope: sector.name.clone(),
                reason: format!("no bar for {date} yet"),
            })?;
        if idx == 0 {
            return Err(EngineError::UpstreamData {
                scope: sector.name.clone(),
                reason: format!("no prior close before {date}"),
            });
        }

        let prev = series.bars[idx - 1].close;
        let curr = series.bars[idx].close;
        if prev.is_zero() {
            return Err(EngineError::UpstreamData {
                scope: sector.name.clone(),
                reason: "zero prior close".to_string(),
            });
        }
        let actual_change: f64 = ((curr - prev) / prev).try_into().unwrap_or(0.0);

        self.tracker.reconcile(date, &sector.name, actual_change).await
    }

    /// The cron entry point: settle pending outcomes up to `date`, retrain
    /// on everything known at `date`, then score the next day.
    pub async fn run_daily_workflow(&self, date: NaiveDate) -> EngineResult<WorkflowReport> {
        let mut reconciled = 0usize;
        for pending_date in self.tracker.pending_dates(date).await? {
            reconciled += self.reconcile_outcomes(pending_date).await?.reconciled.len();
        }

        let training = self.run_daily_training(date).await?;
        let predictions = self.predict_sectors(date + Duration::days(1)).await?;

        Ok(WorkflowReport {
            date,
            reconciled,
            training,
            predictions,
        })
    }

    pub async fn performance_summary(&self, window_days: u32) -> EngineResult<PerformanceSummary> {
        self.tracker.summary(window_days).await
    }
}
