use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::EngineResult;

/// Open (creating if missing) the SQLite store and ensure the schema.
pub async fn connect(db_url: &str) -> EngineResult<SqlitePool> {
    info!("initializing database at {db_url}");

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    // An in-memory database exists per connection, so the pool must not
    // fan out across connections for it.
    let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent schema creation for every table the engine persists.
async fn create_schema(pool: &SqlitePool) -> EngineResult<()> {
    // Upstream feed landing tables: OHLCV bars, sector membership and
    // per-day sentiment aggregates, written by the external collectors.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector_bars (
            instrument_id TEXT NOT NULL,
            date TEXT NOT NULL,
            open TEXT NOT NULL,
            high TEXT NOT NULL,
            low TEXT NOT NULL,
            close TEXT NOT NULL,
            volume TEXT NOT NULL,
            amount TEXT NOT NULL DEFAULT '0',
            turnover TEXT NOT NULL DEFAULT '0',
            PRIMARY KEY (instrument_id, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sector_bars_date ON sector_bars(date)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector_members (
            sector TEXT NOT NULL,
            instrument_id TEXT NOT NULL,
            valid_from TEXT NOT NULL DEFAULT '1970-01-01',
            PRIMARY KEY (sector, instrument_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sentiment_daily (
            scope TEXT NOT NULL,
            date TEXT NOT NULL,
            sentiment_score REAL NOT NULL,
            positive_ratio REAL NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (scope, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Versioned per-sector models; one active version per sector.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector_models (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sector TEXT NOT NULL,
            version_id TEXT NOT NULL,
            algorithm_kind TEXT NOT NULL,
            params_blob TEXT NOT NULL,
            training_window_start TEXT NOT NULL,
            training_window_end TEXT NOT NULL,
            r2 REAL NOT NULL,
            mse REAL NOT NULL,
            mae REAL NOT NULL,
            direction_accuracy REAL NOT NULL,
            created_at TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            UNIQUE (sector, version_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sector_models_active
        ON sector_models(sector, is_active)
        "#,
    )
    .execute(pool)
    .await?;

    // Prediction records, reconciled in place by the outcome columns; the
    // primary key serializes concurrent writers per (date, sector).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS model_performance (
            date TEXT NOT NULL,
            sector TEXT NOT NULL,
            prediction REAL NOT NULL,
            actual_change REAL,
            accuracy REAL,
            direction_correct INTEGER,
            confidence REAL NOT NULL,
            r2_score REAL NOT NULL,
            direction_accuracy REAL NOT NULL,
            PRIMARY KEY (date, sector)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_model_performance_date
        ON model_performance(date)
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only audit log, one row per orchestrator invocation.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_training (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            date TEXT NOT NULL,
            sectors_trained INTEGER NOT NULL,
            total_samples INTEGER NOT NULL,
            avg_r2_score REAL NOT NULL,
            avg_direction_accuracy REAL NOT NULL,
            status TEXT NOT NULL,
            failures_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_daily_training_date ON daily_training(date)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_model_version_is_rejected() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let insert = r#"
            INSERT INTO sector_models (
                sector, version_id, algorithm_kind, params_blob,
                training_window_start, training_window_end,
                r2, mse, mae, direction_accuracy, created_at, is_active
            ) VALUES ('Energy', '1.0.0', 'ridge', '{}', '2024-01-01', '2024-03-01',
                      0, 0, 0, 0.5, '2024-03-01T00:00:00Z', 1)
        "#;
        sqlx::query(insert).execute(&pool).await.unwrap();
        let err = sqlx::query(insert).execute(&pool).await.unwrap_err();
        match err {
            sqlx::Error::Database(db) => assert!(db.is_unique_violation()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
