use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for the prediction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub data: DataSettings,
    pub training: TrainingSettings,
    pub prediction: PredictionSettings,
    pub pipeline: PipelineSettings,
    pub tracking: TrackingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://sector_agent.db".to_string(),
            data: DataSettings::default(),
            training: TrainingSettings::default(),
            prediction: PredictionSettings::default(),
            pipeline: PipelineSettings::default(),
            tracking: TrackingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist. A `DATABASE_URL` environment variable overrides
    /// the configured store location.
    pub fn load(path: &str) -> Result<Self> {
        let mut settings = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path}"))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {path}"))?
        } else {
            Settings::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = url;
        }

        settings
            .validate()
            .map_err(|errors| anyhow::anyhow!("invalid configuration: {}", errors.join(", ")))?;
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database_url.is_empty() {
            errors.push("database_url must not be empty".to_string());
        }
        if self.data.min_history_days == 0 {
            errors.push("data.min_history_days must be > 0".to_string());
        }
        if self.training.min_training_samples < 10 {
            errors.push("training.min_training_samples must be >= 10".to_string());
        }
        if self.training.min_training_samples > self.data.min_history_days {
            errors.push(
                "training.min_training_samples must not exceed data.min_history_days".to_string(),
            );
        }
        if self.prediction.top_n == 0 {
            errors.push("prediction.top_n must be > 0".to_string());
        }
        if self.pipeline.max_concurrent_sectors == 0 {
            errors.push("pipeline.max_concurrent_sectors must be > 0".to_string());
        }
        if self.tracking.default_window_days == 0 {
            errors.push("tracking.default_window_days must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Sectors with fewer trading days than this are skipped.
    pub min_history_days: usize,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            min_history_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Minimum target-aligned rows required to train one sector.
    pub min_training_samples: usize,
    /// Seed for the forest's bootstrap and feature subsampling.
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            min_training_samples: 30,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    /// Size of the reported top gainer/loser rankings.
    pub top_n: usize,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self { top_n: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Bounded worker pool size for per-sector training/prediction.
    pub max_concurrent_sectors: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sectors: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Trailing window for the performance summary.
    pub default_window_days: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            default_window_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn validation_collects_every_error() {
        let mut settings = Settings::default();
        settings.prediction.top_n = 0;
        settings.pipeline.max_concurrent_sectors = 0;
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [training]
            min_training_samples = 40
            "#,
        )
        .unwrap();
        assert_eq!(settings.training.min_training_samples, 40);
        assert_eq!(settings.training.seed, 42);
        assert_eq!(settings.data.min_history_days, 60);
    }

    #[test]
    fn sample_floor_cannot_exceed_history_floor() {
        let mut settings = Settings::default();
        settings.training.min_training_samples = 90;
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_training_samples")));
    }
}
