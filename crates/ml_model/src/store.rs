//! Durable storage for the trained model.
//!
//! Every save writes a new generation directory holding the topology, the
//! weights and the metadata, and only then repoints the `CURRENT` object at
//! it. Readers follow `CURRENT`, so they see either the previous model or
//! the new one in full, never a mix.
//!
//! Several processes may save under the same key at once. Pruning never
//! removes the generation `CURRENT` names, nor anything saved within
//! [`PRUNE_GRACE_SECS`] of the generation just written, since that may be a
//! save still in flight.
//!
//! ```text
//! <key>/CURRENT
//! <key>/<generation>/model.json
//! <key>/<generation>/weights.bin
//! <key>/<generation>/metadata.json
//! ```

use std::sync::Arc;

use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use bytes::Bytes;
use chrono::{NaiveDateTime, TimeDelta, Utc};
use feature_extractor::{ENCODING_VERSION, FEATURE_COUNT};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{DelayModel, ModelConfig, ModelMetadata, StoreError};

const CURRENT: &str = "CURRENT";
const TOPOLOGY_FILE: &str = "model.json";
const WEIGHTS_FILE: &str = "weights.bin";
const METADATA_FILE: &str = "metadata.json";
const GENERATION_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Older generations are only pruned once they predate the saved one by this much.
pub const PRUNE_GRACE_SECS: i64 = 60;

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Persisted description of the network layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Topology {
    encoding_version: u32,
    model: ModelConfig,
}

/// A model read back from the store.
#[derive(Debug)]
pub struct StoredModel<B: Backend> {
    pub model: DelayModel<B>,
    pub config: ModelConfig,
    pub metadata: ModelMetadata,
}

/// Model persistence on top of any [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct ModelStore {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl ModelStore {
    /// Creates a store keeping its artifacts under `key`.
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Whether a model has been saved and not deleted since.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be reached.
    pub async fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.current_generation().await?.is_some())
    }

    /// Persists `model` and its metadata, replacing any previous model.
    ///
    /// The model is consumed; clone it first to keep serving it.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails. The previous model is
    /// left untouched in that case.
    pub async fn save<B: Backend>(
        &self,
        model: DelayModel<B>,
        config: &ModelConfig,
        metadata: &ModelMetadata,
    ) -> Result<(), StoreError> {
        let topology = Topology {
            encoding_version: ENCODING_VERSION,
            model: config.clone(),
        };
        let topology = serde_json::to_vec_pretty(&topology)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let metadata_json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let weights = Recorder::<B>::record(
            &WeightsRecorder::default(),
            model.into_record(),
            (),
        )
        .map_err(|e| StoreError::Encode(e.to_string()))?;

        let generation = format!(
            "{}-{}",
            Utc::now().format(GENERATION_TIME_FORMAT),
            Uuid::new_v4().simple()
        );

        let written = async {
            self.put(&generation, TOPOLOGY_FILE, topology).await?;
            self.put(&generation, WEIGHTS_FILE, weights).await?;
            self.put(&generation, METADATA_FILE, metadata_json).await
        }
        .await;

        if let Err(e) = written {
            self.remove_generation(&generation).await;
            return Err(e);
        }

        let pointed = self
            .store
            .put(
                &self.path(CURRENT),
                PutPayload::from(generation.clone().into_bytes()),
            )
            .await;
        if let Err(e) = pointed {
            self.remove_generation(&generation).await;
            return Err(e.into());
        }

        info!(key = %self.key, %generation, trained_on = metadata.trained_on, "Saved model");

        self.prune_except(&generation).await;
        Ok(())
    }

    /// Loads the current model.
    ///
    /// Returns `Ok(None)` if no model has been saved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] or [`StoreError::Incompatible`] if
    /// the artifacts cannot be used, and [`StoreError::Unavailable`] if the
    /// storage cannot be reached.
    pub async fn load<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Option<StoredModel<B>>, StoreError> {
        let Some(generation) = self.current_generation().await? else {
            return Ok(None);
        };

        let topology: Topology =
            parse_json(&self.artifact(&generation, TOPOLOGY_FILE).await?, TOPOLOGY_FILE)?;
        if topology.encoding_version != ENCODING_VERSION
            || topology.model.input_width != FEATURE_COUNT
        {
            return Err(StoreError::Incompatible {
                found_version: topology.encoding_version,
                expected_version: ENCODING_VERSION,
                found_width: topology.model.input_width,
                expected_width: FEATURE_COUNT,
            });
        }

        let metadata: ModelMetadata =
            parse_json(&self.artifact(&generation, METADATA_FILE).await?, METADATA_FILE)?;

        let weights = self.artifact(&generation, WEIGHTS_FILE).await?;
        let record = Recorder::<B>::load(&WeightsRecorder::default(), weights.to_vec(), device)
            .map_err(|e| StoreError::Corrupted(format!("{WEIGHTS_FILE}: {e}")))?;

        let model = topology.model.init::<B>(device, 0).load_record(record);
        if !model.matches(&topology.model) {
            return Err(StoreError::Corrupted(format!(
                "{WEIGHTS_FILE} does not match the layout in {TOPOLOGY_FILE}"
            )));
        }

        debug!(key = %self.key, %generation, "Loaded model");

        Ok(Some(StoredModel {
            model,
            config: topology.model,
            metadata,
        }))
    }

    /// Reads the current model's metadata without loading its weights.
    ///
    /// # Errors
    ///
    /// Same as [`ModelStore::load`], minus weight decoding.
    pub async fn get_metadata(&self) -> Result<Option<ModelMetadata>, StoreError> {
        let Some(generation) = self.current_generation().await? else {
            return Ok(None);
        };

        let bytes = self.artifact(&generation, METADATA_FILE).await?;
        parse_json(&bytes, METADATA_FILE).map(Some)
    }

    /// Removes the persisted model. A missing model is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be reached.
    pub async fn delete(&self) -> Result<(), StoreError> {
        match self.store.delete(&self.path(CURRENT)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        for location in self.list_all().await? {
            self.delete_quietly(&location).await;
        }

        info!(key = %self.key, "Deleted model");
        Ok(())
    }

    fn path(&self, name: &str) -> Path {
        Path::from(format!("{}/{name}", self.key))
    }

    fn artifact_path(&self, generation: &str, file: &str) -> Path {
        Path::from(format!("{}/{generation}/{file}", self.key))
    }

    async fn put(&self, generation: &str, file: &str, data: Vec<u8>) -> Result<(), StoreError> {
        self.store
            .put(&self.artifact_path(generation, file), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Option<Bytes>, StoreError> {
        match self.store.get(path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_generation(&self) -> Result<Option<String>, StoreError> {
        let Some(bytes) = self.read(&self.path(CURRENT)).await? else {
            return Ok(None);
        };

        let generation = std::str::from_utf8(&bytes)
            .map(str::trim)
            .map_err(|_| StoreError::Corrupted(format!("{CURRENT} is not valid UTF-8")))?;
        if generation.is_empty() || generation.contains('/') {
            return Err(StoreError::Corrupted(format!(
                "{CURRENT} does not name a generation"
            )));
        }
        Ok(Some(generation.to_string()))
    }

    async fn artifact(&self, generation: &str, file: &str) -> Result<Bytes, StoreError> {
        self.read(&self.artifact_path(generation, file))
            .await?
            .ok_or_else(|| StoreError::Corrupted(format!("{file} is missing from {generation}")))
    }

    async fn list_all(&self) -> Result<Vec<Path>, StoreError> {
        let prefix = Path::from(self.key.as_str());
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        Ok(objects.into_iter().map(|meta| meta.location).collect())
    }

    /// Deletes generations that predate `keep` by more than the grace period.
    /// The generation `CURRENT` names is always kept, whoever wrote it.
    /// Failures only leave garbage behind and are logged.
    async fn prune_except(&self, keep: &str) {
        let grace = TimeDelta::seconds(PRUNE_GRACE_SECS);
        let Some(cutoff) = generation_time(keep).map(|t| t - grace) else {
            return;
        };

        let objects = match self.list_all().await {
            Ok(objects) => objects,
            Err(e) => {
                warn!(key = %self.key, "Failed to list old model generations: {e}");
                return;
            }
        };
        // Read after listing so a concurrent repoint is seen.
        let current = match self.current_generation().await {
            Ok(current) => current,
            Err(e) => {
                warn!(key = %self.key, "Skipping prune, {CURRENT} unreadable: {e}");
                return;
            }
        };

        for location in objects {
            let Some(generation) = self.generation_of(&location) else {
                continue;
            };
            if generation == keep || current.as_deref() == Some(generation.as_str()) {
                continue;
            }
            if generation_time(&generation).is_some_and(|t| t < cutoff) {
                self.delete_quietly(&location).await;
            }
        }
    }

    async fn remove_generation(&self, generation: &str) {
        for file in [TOPOLOGY_FILE, WEIGHTS_FILE, METADATA_FILE] {
            self.delete_quietly(&self.artifact_path(generation, file)).await;
        }
    }

    async fn delete_quietly(&self, location: &Path) {
        match self.store.delete(location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => warn!(%location, "Failed to delete model artifact: {e}"),
        }
    }

    /// The generation segment of an artifact path, `None` for `CURRENT`.
    fn generation_of(&self, location: &Path) -> Option<String> {
        let rest = location.as_ref().strip_prefix(&self.key)?.strip_prefix('/')?;
        let (generation, _file) = rest.split_once('/')?;
        Some(generation.to_string())
    }
}

/// When a generation was saved, from its name.
fn generation_time(generation: &str) -> Option<NaiveDateTime> {
    let (stamp, _id) = generation.split_once('-')?;
    NaiveDateTime::parse_from_str(stamp, GENERATION_TIME_FORMAT).ok()
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8], file: &str) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupted(format!("{file}: {e}")))
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use feature_extractor::FeatureVector;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;

    use super::*;
    use crate::{default_device, predict};

    type TestBackend = NdArray;

    fn metadata(trained_on: usize) -> ModelMetadata {
        ModelMetadata {
            version: ENCODING_VERSION,
            trained_on,
            last_trained: Utc::now(),
            mae: 4.0,
            loss: 25.0,
            val_mae: Some(5.0),
            val_loss: Some(30.0),
            epochs: 10,
        }
    }

    fn features() -> Vec<FeatureVector> {
        vec![
            FeatureVector::new([0.5, 0.86, 0.43, -0.9, 0.0, 0.25]),
            FeatureVector::new([-0.5, -0.86, 0.0, 1.0, 1.0, 1.0]),
            FeatureVector::default(),
        ]
    }

    fn memory_store() -> ModelStore {
        ModelStore::new(Arc::new(InMemory::new()), "delay_model")
    }

    async fn object_count(store: &ModelStore) -> usize {
        store.list_all().await.expect("list").len()
    }

    #[tokio::test]
    async fn test_absent_store() {
        let store = memory_store();
        let device = default_device();

        assert!(!store.exists().await.expect("exists"));
        assert!(store.get_metadata().await.expect("metadata").is_none());
        assert!(store.load::<TestBackend>(&device).await.expect("load").is_none());
        store.delete().await.expect("deleting nothing is fine");
    }

    #[tokio::test]
    async fn test_save_then_load_predicts_identically() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 9);

        store.save(model.clone(), &config, &metadata(12)).await.expect("save");
        assert!(store.exists().await.expect("exists"));

        let loaded = store
            .load::<TestBackend>(&device)
            .await
            .expect("load")
            .expect("model present");

        assert_eq!(loaded.metadata.trained_on, 12);
        assert_eq!(loaded.config.hidden_layers, config.hidden_layers);
        assert_eq!(
            predict(&model, &features(), &device).expect("predict"),
            predict(&loaded.model, &features(), &device).expect("predict")
        );
    }

    #[tokio::test]
    async fn test_save_replaces_previous_model() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();

        let first: DelayModel<TestBackend> = config.init(&device, 1);
        store.save(first.clone(), &config, &metadata(10)).await.expect("save");
        let second: DelayModel<TestBackend> = config.init(&device, 2);
        store.save(second.clone(), &config, &metadata(20)).await.expect("save");

        let meta = store.get_metadata().await.expect("metadata").expect("present");
        assert_eq!(meta.trained_on, 20);
        // The first generation is younger than the grace period and survives.
        assert_eq!(object_count(&store).await, 7);

        let loaded = store
            .load::<TestBackend>(&device)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(
            predict(&second, &features(), &device).expect("predict"),
            predict(&loaded.model, &features(), &device).expect("predict")
        );
    }

    #[tokio::test]
    async fn test_save_prunes_stale_generations_only() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();

        let stale = "20000101T000000.000Z-0000";
        let future = "29990101T000000.000Z-ffff";
        for generation in [stale, future, "scratch"] {
            store
                .put(generation, METADATA_FILE, b"{}".to_vec())
                .await
                .expect("seed");
        }

        let model: DelayModel<TestBackend> = config.init(&device, 4);
        store.save(model, &config, &metadata(6)).await.expect("save");

        let generations: Vec<String> = store
            .list_all()
            .await
            .expect("list")
            .iter()
            .filter_map(|location| store.generation_of(location))
            .collect();
        assert!(!generations.iter().any(|g| g == stale));
        assert!(generations.iter().any(|g| g == future));
        assert!(generations.iter().any(|g| g == "scratch"));
        assert_eq!(
            store.get_metadata().await.expect("metadata").expect("present").trained_on,
            6
        );
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_a_loadable_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let open = || {
            ModelStore::new(
                Arc::new(LocalFileSystem::new_with_prefix(dir.path()).expect("local store")),
                "delay_model",
            )
        };
        let (left, right, reader) = (open(), open(), open());
        let device = default_device();
        let config = ModelConfig::new();

        for round in 0..20 {
            let a: DelayModel<TestBackend> = config.init(&device, round);
            let b: DelayModel<TestBackend> = config.init(&device, round + 100);

            let (meta_a, meta_b) = (metadata(1), metadata(2));
            let (saved_a, saved_b) = tokio::join!(
                left.save(a, &config, &meta_a),
                right.save(b, &config, &meta_b),
            );
            saved_a.expect("left save");
            saved_b.expect("right save");

            let loaded = reader
                .load::<TestBackend>(&device)
                .await
                .unwrap_or_else(|e| panic!("round {round}: {e}"))
                .expect("present");
            assert!([1, 2].contains(&loaded.metadata.trained_on));
        }
    }

    #[tokio::test]
    async fn test_corrupted_weights() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 3);
        store.save(model.clone(), &config, &metadata(5)).await.expect("save");

        let generation = store
            .current_generation()
            .await
            .expect("read")
            .expect("present");
        store
            .put(&generation, WEIGHTS_FILE, b"not a model".to_vec())
            .await
            .expect("overwrite");

        let err = store
            .load::<TestBackend>(&device)
            .await
            .expect_err("corrupted");
        assert!(matches!(err, StoreError::Corrupted(_)));
        assert!(err.requires_retrain());

        // Metadata alone is still readable.
        assert!(store.get_metadata().await.expect("metadata").is_some());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_corruption() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 3);
        store.save(model.clone(), &config, &metadata(5)).await.expect("save");

        let generation = store
            .current_generation()
            .await
            .expect("read")
            .expect("present");
        store
            .store
            .delete(&store.artifact_path(&generation, METADATA_FILE))
            .await
            .expect("delete");

        let err = store.get_metadata().await.expect_err("corrupted");
        assert!(matches!(err, StoreError::Corrupted(_)));

        store
            .store
            .put(&store.path(CURRENT), PutPayload::from_static(b"gone"))
            .await
            .expect("repoint");
        let err = store
            .load::<TestBackend>(&device)
            .await
            .expect_err("dangling pointer");
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_mismatched_layout_is_corruption() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 3);
        store.save(model.clone(), &config, &metadata(5)).await.expect("save");

        let generation = store
            .current_generation()
            .await
            .expect("read")
            .expect("present");
        let other = Topology {
            encoding_version: ENCODING_VERSION,
            model: ModelConfig::new().with_hidden_layers(vec![4, 4]),
        };
        store
            .put(
                &generation,
                TOPOLOGY_FILE,
                serde_json::to_vec(&other).expect("encode"),
            )
            .await
            .expect("overwrite");

        let err = store
            .load::<TestBackend>(&device)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_incompatible_encoding() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 3);
        store.save(model.clone(), &config, &metadata(5)).await.expect("save");

        let generation = store
            .current_generation()
            .await
            .expect("read")
            .expect("present");
        let old = Topology {
            encoding_version: ENCODING_VERSION + 1,
            model: config,
        };
        store
            .put(&generation, TOPOLOGY_FILE, serde_json::to_vec(&old).expect("encode"))
            .await
            .expect("overwrite");

        let err = store
            .load::<TestBackend>(&device)
            .await
            .expect_err("incompatible");
        assert!(matches!(err, StoreError::Incompatible { .. }));
        assert!(err.requires_retrain());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = memory_store();
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 3);
        store.save(model.clone(), &config, &metadata(5)).await.expect("save");

        store.delete().await.expect("delete");

        assert!(!store.exists().await.expect("exists"));
        assert!(store.load::<TestBackend>(&device).await.expect("load").is_none());
        assert_eq!(object_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_local_filesystem_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = LocalFileSystem::new_with_prefix(dir.path()).expect("local store");
        let store = ModelStore::new(Arc::new(local), "delay_model");
        let device = default_device();
        let config = ModelConfig::new();
        let model: DelayModel<TestBackend> = config.init(&device, 11);

        store.save(model.clone(), &config, &metadata(8)).await.expect("save");

        let reopened = ModelStore::new(
            Arc::new(LocalFileSystem::new_with_prefix(dir.path()).expect("local store")),
            "delay_model",
        );
        let loaded = reopened
            .load::<TestBackend>(&device)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(
            predict(&model, &features(), &device).expect("predict"),
            predict(&loaded.model, &features(), &device).expect("predict")
        );
        assert!(dir.path().join("delay_model").join(CURRENT).exists());
    }
}
