//! Stats command - summarizes recorded arrivals.

use adel_standard_time::summarize;
use anyhow::{Context, Result};
use database::EntrySource;

use super::{App, print_json};

/// Runs the stats command.
///
/// # Errors
///
/// Returns an error if the entries cannot be read.
pub async fn run(app: &App) -> Result<()> {
    let entries = app
        .repository
        .list_entries()
        .await
        .context("Failed to list entries")?;

    print_json(&summarize(&entries))
}
