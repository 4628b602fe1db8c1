pub mod orchestrator;
pub mod run;

pub use orchestrator::{PredictionBatch, ReconcileReport, SectorAgent, WorkflowReport};
pub use run::{DailyTrainingRun, RunPhase, RunStatus, SectorFailure};
