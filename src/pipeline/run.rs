use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::EngineResult;

/// Stages of one daily run. Per-sector failures never leave this machine's
/// happy path; they land in the run's failure list instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    FetchingFeatures,
    Training,
    Predicting,
    Recording,
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::FetchingFeatures => "fetching_features",
            RunPhase::Training => "training",
            RunPhase::Predicting => "predicting",
            RunPhase::Recording => "recording",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every sector completed.
    Success,
    /// At least one sector failed; the rest completed.
    PartialSuccess,
    /// The store itself was unreachable.
    Failed,
    /// An operator aborted mid-batch; completed records remain valid.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sector's failure, as surfaced in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorFailure {
    pub sector: String,
    pub error: String,
}

/// Append-only audit row for one orchestrator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DailyTrainingRun {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub sectors_trained: usize,
    pub total_samples: usize,
    pub avg_r2: f64,
    pub avg_direction_accuracy: f64,
    pub status: RunStatus,
    pub failures: Vec<SectorFailure>,
}

impl DailyTrainingRun {
    pub async fn persist(&self, pool: &SqlitePool) -> EngineResult<()> {
        let failures_json = serde_json::to_string(&self.failures)?;
        sqlx::query(
            r#"
            INSERT INTO daily_training (
                run_id, date, sectors_trained, total_samples,
                avg_r2_score, avg_direction_accuracy, status, failures_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.run_id.to_string())
        .bind(self.date.to_string())
        .bind(self.sectors_trained as i64)
        .bind(self.total_samples as i64)
        .bind(self.avg_r2)
        .bind(self.avg_direction_accuracy)
        .bind(self.status.as_str())
        .bind(failures_json)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    }
}
