pub mod forest;
pub mod gbdt;
pub mod model;
pub mod predictor;
pub mod ridge;
pub mod scaler;
pub mod store;
pub mod trainer;
pub mod tree;

pub use model::{AlgorithmKind, EvalMetrics, FittedModel, ModelBundle};
pub use predictor::{top_movers, Predictor, SectorPrediction};
pub use scaler::Scaler;
pub use store::{ModelStore, ModelVersion, StoredModel};
pub use trainer::{TrainResult, Trainer};
