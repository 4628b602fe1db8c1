mod config;
mod data;
mod database;
mod error;
mod features;
mod indicators;
mod ml;
mod pipeline;
mod tracker;
mod types;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::Settings;
use pipeline::SectorAgent;

#[derive(Parser)]
#[command(name = "sector-agent")]
#[command(author = "Sector Agent")]
#[command(version = "0.1.0")]
#[command(about = "Daily sector prediction and backtest engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train models for every sector as of a trading day
    Train {
        /// Target date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Score the next trading day for every sector with an active model
    Predict {
        /// Date being predicted (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Attach realized outcomes to recorded predictions for a date
    Reconcile {
        /// Date whose close is now known (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Full daily cycle: reconcile pending, retrain, score tomorrow
    Workflow {
        /// Trading day to run for (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Rolling accuracy statistics over a trailing window
    Summary {
        /// Window length in days
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Show every sector's active model
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Sector Agent v0.1.0");

    let settings = Settings::load(&cli.config)?;
    let agent = SectorAgent::connect(settings.clone()).await?;

    match cli.command {
        Commands::Train { date } => {
            let date = parse_date(date)?;
            let run = agent.run_daily_training(date).await?;
            info!(
                status = %run.status,
                sectors_trained = run.sectors_trained,
                avg_r2 = run.avg_r2,
                avg_direction_accuracy = run.avg_direction_accuracy,
                "training run complete"
            );
            for failure in &run.failures {
                info!(sector = %failure.sector, error = %failure.error, "sector failed");
            }
        }
        Commands::Predict { date } => {
            let date = parse_date(date)?;
            let batch = agent.predict_sectors(date).await?;
            for p in &batch.predictions {
                info!(
                    sector = %p.sector,
                    predicted_change = %format!("{:+.4}%", p.predicted_change * 100.0),
                    confidence = %format!("{:.2}", p.confidence),
                    model = %p.algorithm,
                    version = %p.version,
                    "prediction"
                );
            }
            info!(gainers = ?batch.top_gainers, losers = ?batch.top_losers, "expected top movers");
            for failure in &batch.failures {
                info!(sector = %failure.sector, error = %failure.error, "sector skipped");
            }
        }
        Commands::Reconcile { date } => {
            let date = parse_date(date)?;
            let report = agent.reconcile_outcomes(date).await?;
            info!(
                reconciled = report.reconciled.len(),
                pending = report.failures.len(),
                "reconciliation complete"
            );
        }
        Commands::Workflow { date } => {
            let date = parse_date(date)?;
            let report = agent.run_daily_workflow(date).await?;
            info!(
                reconciled = report.reconciled,
                training_status = %report.training.status,
                predicted = report.predictions.predictions.len(),
                "daily workflow complete"
            );
        }
        Commands::Summary { days } => {
            let days = days.unwrap_or(settings.tracking.default_window_days);
            let summary = agent.performance_summary(days).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Status => {
            let models = agent.store().list_active().await?;
            if models.is_empty() {
                info!("no trained models yet");
            }
            for model in models {
                info!(
                    sector = %model.sector,
                    version = %model.version,
                    algorithm = %model.algorithm,
                    direction_accuracy = model.metrics.direction_accuracy,
                    r2 = model.metrics.r2,
                    trained = %model.created_at,
                    "active model"
                );
            }
        }
    }

    Ok(())
}

fn parse_date(arg: Option<String>) -> Result<NaiveDate> {
    match arg {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|_| anyhow!("invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(Utc::now().date_naive()),
    }
}
