//! Entry commands - record, remove and list arrivals.

use std::sync::Arc;

use adel_standard_time::RetrainWorker;
use anyhow::{Context, Result, bail};
use database::EntrySource;
use entry_structs::NewTimeEntry;
use tracing::info;

use super::{App, print_json};

/// Runs the add command.
///
/// The model is retrained in the background; the command waits for that
/// retrain before returning so the work is not lost on exit.
///
/// # Errors
///
/// Returns an error if the input is invalid or the entry cannot be stored.
pub async fn add(app: &App, world_time: &str, adel_time: &str, reason: Option<&str>) -> Result<()> {
    let input = NewTimeEntry::parse(world_time, adel_time, reason).context("Invalid entry")?;

    let worker = RetrainWorker::spawn(Arc::clone(&app.predictor));
    let entry = app.repository.create(input).await;
    let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
            worker.drain().await;
            return Err(e).context("Failed to store entry");
        }
    };

    info!(id = entry.id(), delay = entry.delay_minutes(), "Recorded arrival");
    print_json(&entry)?;

    worker.drain().await;
    Ok(())
}

/// Runs the delete command.
///
/// # Errors
///
/// Returns an error if no entry has the given id or the deletion fails.
pub async fn delete(app: &App, id: i64) -> Result<()> {
    let worker = RetrainWorker::spawn(Arc::clone(&app.predictor));
    let deleted = app.repository.delete(id).await;
    worker.drain().await;

    if !deleted.context("Failed to delete entry")? {
        bail!("No entry with id {id}");
    }

    info!(id, "Deleted arrival");
    Ok(())
}

/// Runs the list command.
///
/// # Errors
///
/// Returns an error if the entries cannot be read.
pub async fn list(app: &App) -> Result<()> {
    let entries = app
        .repository
        .list_entries()
        .await
        .context("Failed to list entries")?;

    print_json(&entries)
}
