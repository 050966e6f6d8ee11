//! Model-info command - describes the stored model.

use anyhow::{Context, Result};

use super::{App, print_json};

/// Runs the model-info command.
///
/// # Errors
///
/// Returns an error if the model metadata cannot be read.
pub async fn run(app: &App) -> Result<()> {
    let info = app
        .predictor
        .model_info()
        .await
        .context("Failed to read model metadata")?;

    print_json(&info)
}
