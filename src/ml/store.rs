use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{EngineError, EngineResult};

use super::model::{AlgorithmKind, EvalMetrics, ModelBundle};
use super::trainer::TrainResult;

/// Semantic version for sector models; each retrain bumps the patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    pub fn bump_patch(&self) -> Self {
        Self::new(self.major, self.minor, self.patch + 1)
    }
}

impl FromStr for ModelVersion {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let parse = |p: &str| {
            p.parse::<u32>().map_err(|_| EngineError::UpstreamData {
                scope: "sector_models".to_string(),
                reason: format!("invalid version string: {s}"),
            })
        };
        if parts.len() != 3 {
            return Err(EngineError::UpstreamData {
                scope: "sector_models".to_string(),
                reason: format!("invalid version string: {s}"),
            });
        }
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A persisted model version hydrated from the store.
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub sector: String,
    pub version: ModelVersion,
    pub algorithm: AlgorithmKind,
    pub bundle: ModelBundle,
    pub metrics: EvalMetrics,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Versioned model store over `sector_models`.
///
/// Models are immutable rows; exactly one per sector carries `is_active`.
/// Saving deactivates the previous versions and inserts the new row in one
/// transaction, so readers never observe zero or two active models. The
/// unique (sector, version_id) index turns a concurrent same-version insert
/// into `VersionConflict` for the loser.
#[derive(Debug, Clone)]
pub struct ModelStore {
    pool: SqlitePool,
}

impl ModelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn latest_version(&self, sector: &str) -> EngineResult<Option<ModelVersion>> {
        let row = sqlx::query(
            r#"
            SELECT version_id FROM sector_models
            WHERE sector = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(sector)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let version: String = row.get("version_id");
                Ok(Some(ModelVersion::from_str(&version)?))
            }
            None => Ok(None),
        }
    }

    async fn next_version(&self, sector: &str) -> EngineResult<ModelVersion> {
        Ok(match self.latest_version(sector).await? {
            Some(latest) => latest.bump_patch(),
            None => ModelVersion::initial(),
        })
    }

    /// Persist a training result as a new active version.
    pub async fn save(&self, result: &TrainResult) -> EngineResult<ModelVersion> {
        let version = self.next_version(&result.sector).await?;
        let blob = serde_json::to_string(&result.bundle)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE sector_models SET is_active = 0 WHERE sector = ?")
            .bind(&result.sector)
            .execute(&mut *tx)
            .await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO sector_models (
                sector, version_id, algorithm_kind, params_blob,
                training_window_start, training_window_end,
                r2, mse, mae, direction_accuracy, created_at, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&result.sector)
        .bind(version.to_string())
        .bind(result.best.as_str())
        .bind(&blob)
        .bind(result.window_start.to_string())
        .bind(result.window_end.to_string())
        .bind(result.test_metrics.r2)
        .bind(result.test_metrics.mse)
        .bind(result.test_metrics.mae)
        .bind(result.test_metrics.direction_accuracy)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) => {
                if is_unique_violation(&e) {
                    return Err(EngineError::VersionConflict {
                        sector: result.sector.clone(),
                        version: version.to_string(),
                    });
                }
                return Err(e.into());
            }
        }

        tx.commit().await?;

        info!(
            sector = %result.sector,
            version = %version,
            algorithm = %result.best,
            "model version activated"
        );

        Ok(version)
    }

    /// The single active model for a sector, if any training succeeded yet.
    pub async fn get_active(&self, sector: &str) -> EngineResult<Option<StoredModel>> {
        let row = sqlx::query(
            r#"
            SELECT sector, version_id, algorithm_kind, params_blob,
                   training_window_start, training_window_end,
                   r2, mse, mae, direction_accuracy, created_at, is_active
            FROM sector_models
            WHERE sector = ? AND is_active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(sector)
        .fetch_optional(&self.pool)
        .await?;

        row.map(hydrate).transpose()
    }

    /// Every sector's active model, for status reporting.
    pub async fn list_active(&self) -> EngineResult<Vec<StoredModel>> {
        let rows = sqlx::query(
            r#"
            SELECT sector, version_id, algorithm_kind, params_blob,
                   training_window_start, training_window_end,
                   r2, mse, mae, direction_accuracy, created_at, is_active
            FROM sector_models
            WHERE is_active = 1
            ORDER BY sector
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate).collect()
    }

    pub async fn version_count(&self, sector: &str) -> EngineResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM sector_models WHERE sector = ?")
            .bind(sector)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn active_count(&self, sector: &str) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM sector_models WHERE sector = ? AND is_active = 1",
        )
        .bind(sector)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.is_unique_violation()
    )
}

fn hydrate(row: sqlx::sqlite::SqliteRow) -> EngineResult<StoredModel> {
    let sector: String = row.get("sector");
    let version: String = row.get("version_id");
    let algorithm: String = row.get("algorithm_kind");
    let blob: String = row.get("params_blob");
    let window_start: String = row.get("training_window_start");
    let window_end: String = row.get("training_window_end");
    let created_at: String = row.get("created_at");

    let parse_date = |s: &str| {
        NaiveDate::from_str(s).map_err(|_| EngineError::UpstreamData {
            scope: "sector_models".to_string(),
            reason: format!("invalid date: {s}"),
        })
    };

    Ok(StoredModel {
        version: ModelVersion::from_str(&version)?,
        algorithm: AlgorithmKind::from_str(&algorithm).map_err(|e| {
            EngineError::UpstreamData {
                scope: "sector_models".to_string(),
                reason: e.to_string(),
            }
        })?,
        bundle: serde_json::from_str(&blob)?,
        metrics: EvalMetrics {
            r2: row.get("r2"),
            mse: row.get("mse"),
            mae: row.get("mae"),
            direction_accuracy: row.get("direction_accuracy"),
        },
        window_start: parse_date(&window_start)?,
        window_end: parse_date(&window_end)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| EngineError::UpstreamData {
                scope: "sector_models".to_string(),
                reason: format!("invalid timestamp: {created_at}"),
            })?
            .with_timezone(&Utc),
        is_active: row.get::<i64, _>("is_active") == 1,
        sector,
    })
}
