use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the prediction engine.
///
/// Everything except `Store` is a per-sector condition: it is caught at the
/// sector-iteration boundary, reported in the run's failure list, and never
/// aborts the batch. `Store` means the persistence layer itself is
/// unreachable and terminates the run as `Failed`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Too few aligned feature rows to train or evaluate a sector.
    #[error("insufficient data for sector {sector}: {rows} rows, need {required}")]
    InsufficientData {
        sector: String,
        rows: usize,
        required: usize,
    },

    /// Prediction requested before any successful training for the sector.
    #[error("no model available for sector {sector}")]
    NoModelAvailable { sector: String },

    /// A prediction for this (date, sector) already has a reconciled outcome.
    #[error("prediction for {sector} on {date} is already reconciled")]
    AlreadyReconciled { date: NaiveDate, sector: String },

    /// A concurrent writer persisted the same (sector, version) first.
    #[error("model version {version} for sector {sector} already exists")]
    VersionConflict { sector: String, version: String },

    /// Collaborator feed malformed or empty for a sector.
    #[error("upstream data error for {scope}: {reason}")]
    UpstreamData { scope: String, reason: String },

    /// A model blob failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistence layer is unreachable. Run-fatal.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    /// Whether the error terminates the whole run rather than one sector.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
