//! Predict command - forecasts Adel's arrival for stated meeting times.

use adel_standard_time::parse_world_time;
use anyhow::{Context, Result};
use tracing::info;

use super::{App, print_json};

/// Runs the predict command.
///
/// # Errors
///
/// Returns an error if the time is invalid or prediction fails.
pub async fn run(app: &App, world_time: &str) -> Result<()> {
    let world_time = parse_world_time(world_time)?;

    let prediction = app
        .predictor
        .predict(&world_time)
        .await
        .context("Prediction failed")?;

    info!(
        delay = prediction.delay_minutes,
        confidence = %prediction.confidence.level,
        "Predicted arrival"
    );
    print_json(&prediction)
}

/// Runs the predict-batch command. Results keep the order of `world_times`.
///
/// # Errors
///
/// Returns an error if any time is invalid or any prediction fails.
pub async fn run_batch(app: &App, world_times: &[String]) -> Result<()> {
    let world_times = world_times
        .iter()
        .map(|t| parse_world_time(t))
        .collect::<Result<Vec<_>, _>>()?;

    let predictions = app
        .predictor
        .predict_batch(&world_times)
        .await
        .context("Batch prediction failed")?;

    info!(count = predictions.len(), "Predicted arrivals");
    print_json(&serde_json::json!({ "predictions": predictions }))
}
