use chrono::{DateTime, FixedOffset};
use entry_structs::EntryInputError;
use ml_model::{InferenceError, StoreError, TrainError};
use thiserror::Error;

/// Failures surfaced by the predictor.
///
/// Too little data is not an error; the predictor falls back to the median
/// delay instead.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    InvalidInput(#[from] EntryInputError),

    #[error("Failed to read entries: {0}")]
    Source(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Training failed: {0}")]
    Training(#[from] TrainError),

    #[error("Training task failed: {0}")]
    TrainingTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("A delay of {delay_minutes} minutes after {world_time} is out of range")]
    OutOfRange {
        world_time: DateTime<FixedOffset>,
        delay_minutes: i64,
    },
}
