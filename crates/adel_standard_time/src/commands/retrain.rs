//! Retrain command - rebuilds the model from all recorded arrivals.

use adel_standard_time::RetrainOutcome;
use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{App, print_json};

/// Runs the retrain command.
///
/// # Errors
///
/// Returns an error if training or saving fails. The previous model is kept.
pub async fn run(app: &App) -> Result<()> {
    info!("Retraining model");

    let outcome = app.predictor.retrain().await.context("Retrain failed")?;
    match &outcome {
        RetrainOutcome::Trained { metadata } => info!(
            trained_on = metadata.trained_on,
            mae = metadata.mae,
            "Model saved"
        ),
        RetrainOutcome::Skipped { samples, required } => {
            warn!("Only {samples} entries recorded, need {required} to train");
        }
    }

    print_json(&outcome)
}
