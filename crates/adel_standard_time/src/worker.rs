//! Background retraining.
//!
//! Every create or delete bumps the entry [`ChangeFeed`](database::ChangeFeed).
//! The worker waits on that feed and retrains once per wake-up, so writes
//! landing during a retrain collapse into a single follow-up run.

use std::sync::Arc;

use database::EntrySource;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{Predictor, RetrainOutcome};

/// Handle to the background retrain task.
#[derive(Debug)]
pub struct RetrainWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetrainWorker {
    /// Starts retraining `predictor` whenever its entries change.
    ///
    /// Changes made before this call are not picked up.
    pub fn spawn<S: EntrySource + 'static>(predictor: Arc<Predictor<S>>) -> Self {
        let changes = predictor.source().changes().subscribe();
        let (shutdown, stop) = watch::channel(false);

        let handle = tokio::spawn(worker_loop(predictor, changes, stop));

        Self { shutdown, handle }
    }

    /// Finishes any pending retrain, then stops the task.
    pub async fn drain(self) {
        // The loop also exits if the receiver is already gone.
        let _ = self.shutdown.send(true);

        if let Err(e) = self.handle.await {
            error!("Retrain worker panicked: {e}");
        }
    }
}

async fn worker_loop<S: EntrySource>(
    predictor: Arc<Predictor<S>>,
    mut changes: watch::Receiver<u64>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("Retrain worker started");

    loop {
        tokio::select! {
            biased;

            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Entry source dropped");
                    break;
                }
                let version = *changes.borrow_and_update();
                retrain(&predictor, version).await;
            }

            _ = stop.changed() => {
                if changes.has_changed().unwrap_or(false) {
                    let version = *changes.borrow_and_update();
                    retrain(&predictor, version).await;
                }
                break;
            }
        }
    }

    debug!("Retrain worker stopped");
}

/// Failures are logged; the previous model stays in service.
async fn retrain<S: EntrySource>(predictor: &Predictor<S>, version: u64) {
    match predictor.retrain().await {
        Ok(RetrainOutcome::Trained { metadata }) => {
            info!(version, trained_on = metadata.trained_on, "Background retrain finished");
        }
        Ok(RetrainOutcome::Skipped { samples, required }) => {
            debug!(version, samples, required, "Background retrain skipped");
        }
        Err(e) => error!(version, "Background retrain failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use database::MemoryEntryRepository;
    use entry_structs::NewTimeEntry;
    use ml_model::ModelStore;
    use object_store::memory::InMemory;

    use super::*;
    use crate::PredictorSettings;

    #[tokio::test]
    async fn test_drain_without_changes() {
        let predictor = Arc::new(Predictor::new(
            Arc::new(MemoryEntryRepository::new()),
            ModelStore::new(Arc::new(InMemory::new()), "delay_model"),
            PredictorSettings::default(),
        ));

        let worker = RetrainWorker::spawn(Arc::clone(&predictor));
        tokio::time::timeout(Duration::from_secs(5), worker.drain())
            .await
            .expect("drain returns promptly");
    }

    #[tokio::test]
    async fn test_drain_handles_pending_change() {
        let settings = PredictorSettings {
            min_samples: 2,
            ..PredictorSettings::default()
        };
        let predictor = Arc::new(Predictor::new(
            Arc::new(MemoryEntryRepository::new()),
            ModelStore::new(Arc::new(InMemory::new()), "delay_model"),
            PredictorSettings {
                training: settings.training.clone().with_epochs(2).with_seed(Some(1)),
                ..settings
            },
        ));
        let worker = RetrainWorker::spawn(Arc::clone(&predictor));

        for (world, adel) in [
            ("2024-03-04T09:00:00Z", "2024-03-04T09:10:00Z"),
            ("2024-03-05T09:00:00Z", "2024-03-05T09:20:00Z"),
        ] {
            predictor
                .source()
                .create(NewTimeEntry::parse(world, adel, None).expect("valid"))
                .await
                .expect("create");
        }

        worker.drain().await;

        let info = predictor.model_info().await.expect("info");
        assert!(info.exists);
        assert_eq!(info.trained_on, 2);
    }
}
