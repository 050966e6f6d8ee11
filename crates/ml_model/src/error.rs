//! Error types for training, inference and model persistence.

use thiserror::Error;

/// Training failures.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Need at least {required} samples to train, got {got}")]
    NotEnoughSamples { required: usize, got: usize },

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Training input contains non-finite values")]
    NonFiniteInput,

    #[error("Training diverged at epoch {epoch}: loss is not finite")]
    Diverged { epoch: usize },
}

/// Inference failures.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to read model output: {0}")]
    Output(String),

    #[error("Model produced {got} outputs for {expected} inputs")]
    OutputCount { expected: usize, got: usize },
}

/// Model store failures.
///
/// A missing model is not an error; loaders return `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is reachable but the persisted model cannot be read back.
    #[error("Persisted model is corrupted: {0}")]
    Corrupted(String),

    /// The persisted model was produced for a different feature encoding.
    #[error(
        "Persisted model is incompatible: encoding version {found_version} (expected {expected_version}), input width {found_width} (expected {expected_width})"
    )]
    Incompatible {
        found_version: u32,
        expected_version: u32,
        found_width: usize,
        expected_width: usize,
    },

    #[error("Failed to encode model: {0}")]
    Encode(String),

    /// The underlying storage could not be reached.
    #[error("Model storage unavailable: {0}")]
    Unavailable(#[from] object_store::Error),
}

impl StoreError {
    /// Whether the stored model must be discarded and retrained.
    #[must_use]
    pub const fn requires_retrain(&self) -> bool {
        matches!(self, Self::Corrupted(_) | Self::Incompatible { .. })
    }
}
