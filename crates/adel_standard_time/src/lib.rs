//! Adel Standard Time
//!
//! Predicts how late Adel will arrive relative to a stated meeting time,
//! learning from recorded arrivals.

mod error;
pub mod predictor;
pub mod statistics;
pub mod worker;

pub use error::PredictError;
pub use predictor::{
    Confidence, ConfidenceLevel, HourDistance, ModelInfo, PredictionResult, Predictor,
    PredictorSettings, RetrainOutcome, SimilarEvents, parse_world_time,
};
pub use statistics::{Statistics, summarize};
pub use worker::RetrainWorker;
