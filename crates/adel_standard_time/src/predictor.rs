//! Arrival prediction.
//!
//! The predictor moves between three states depending on how much history
//! exists and whether a model is at hand:
//!
//! - too few entries: answer with the median recorded delay;
//! - enough entries but no model in memory: load the stored one, or train
//!   one on the spot;
//! - model loaded: evaluate it on freshly extracted features.
//!
//! A single model handle is shared by all requests. Retrains are serialized
//! and only swap the handle once the new model has been saved.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use burn::prelude::Backend;
use chrono::{DateTime, FixedOffset, Utc};
use config::Config;
use database::EntrySource;
use entry_structs::{
    EntryInputError, TimeEntry, add_minutes, hour_of_day, parse_timestamp, round_half_up,
};
use feature_extractor::{FeatureConfig, FeatureExtractor, FeatureVector};
use ml_model::{
    DelayModel, InferenceBackend, InferenceError, ModelConfig, ModelMetadata, ModelStore,
    TrainingBackend, TrainingConfig, default_device, predict, train,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::PredictError;

type Device = <InferenceBackend as Backend>::Device;

/// Entries at or above which confidence is `medium`.
const MEDIUM_CONFIDENCE_POINTS: usize = 10;
/// Entries at or above which confidence is `high`.
const HIGH_CONFIDENCE_POINTS: usize = 30;

/// How the hour gap between two times of day is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HourDistance {
    /// Plain difference: 23:00 and 01:00 are 22 hours apart.
    #[default]
    Absolute,
    /// Around the clock: 23:00 and 01:00 are 2 hours apart.
    Circular,
}

impl HourDistance {
    #[must_use]
    pub const fn between(self, a: u32, b: u32) -> u32 {
        let gap = a.abs_diff(b);
        match self {
            Self::Absolute => gap,
            Self::Circular => {
                if gap > 12 {
                    24 - gap
                } else {
                    gap
                }
            }
        }
    }
}

/// Tunables of the predictor.
#[derive(Debug, Clone)]
pub struct PredictorSettings {
    /// Entries required before the model is used.
    pub min_samples: usize,
    /// Delay reported when nothing has been recorded.
    pub default_delay_minutes: i64,
    pub hour_distance: HourDistance,
    /// Hours either side of the query that count as similar.
    pub similar_hours_window: u32,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            min_samples: 10,
            default_delay_minutes: 30,
            hour_distance: HourDistance::Absolute,
            similar_hours_window: 2,
            features: FeatureConfig::default(),
            training: TrainingConfig::new(ModelConfig::new()),
        }
    }
}

impl PredictorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let model = ModelConfig::new().with_hidden_layers(config.hidden_layers.clone());
        let training = TrainingConfig::new(model)
            .with_learning_rate(config.learning_rate)
            .with_epochs(config.training_epochs)
            .with_batch_size(config.batch_size)
            .with_validation_split(config.validation_split)
            .with_seed(config.training_seed);

        Self {
            min_samples: config.min_training_samples,
            default_delay_minutes: config.default_delay_minutes,
            hour_distance: if config.circular_similar_hours {
                HourDistance::Circular
            } else {
                HourDistance::Absolute
            },
            similar_hours_window: 2,
            features: FeatureConfig {
                rolling_window: config.rolling_window,
                default_delay_minutes: config.default_delay_minutes as f32,
            },
            training,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub data_points_used: usize,
}

impl Confidence {
    #[must_use]
    pub const fn from_data_points(data_points_used: usize) -> Self {
        let level = if data_points_used < MEDIUM_CONFIDENCE_POINTS {
            ConfidenceLevel::Low
        } else if data_points_used < HIGH_CONFIDENCE_POINTS {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        };

        Self {
            level,
            data_points_used,
        }
    }
}

/// Past arrivals at about the same time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarEvents {
    pub average_delay: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub world_time: DateTime<FixedOffset>,
    pub predicted_adel_time: DateTime<FixedOffset>,
    pub delay_minutes: i64,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_events: Option<SimilarEvents>,
}

/// Summary of the stored model, read from metadata only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub exists: bool,
    pub trained_on: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trained: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f32>,
}

impl From<Option<ModelMetadata>> for ModelInfo {
    fn from(metadata: Option<ModelMetadata>) -> Self {
        metadata.map_or(
            Self {
                exists: false,
                trained_on: 0,
                last_trained: None,
                version: None,
                mae: None,
            },
            |m| Self {
                exists: true,
                trained_on: m.trained_on,
                last_trained: Some(m.last_trained),
                version: Some(m.version),
                mae: Some(m.mae),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RetrainOutcome {
    /// A new model was trained, saved and swapped in.
    Trained { metadata: ModelMetadata },
    /// Too few entries; the previous model, if any, stays in place.
    Skipped { samples: usize, required: usize },
}

/// A model ready for inference.
#[derive(Debug)]
struct LoadedModel {
    model: Mutex<DelayModel<InferenceBackend>>,
    metadata: ModelMetadata,
}

impl LoadedModel {
    fn new(model: DelayModel<InferenceBackend>, metadata: ModelMetadata) -> Self {
        Self {
            model: Mutex::new(model),
            metadata,
        }
    }

    fn evaluate(&self, features: &FeatureVector, device: &Device) -> Result<f32, PredictError> {
        let model = self
            .model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let output = predict(&model, std::slice::from_ref(features), device)?;
        output
            .first()
            .copied()
            .ok_or_else(|| InferenceError::OutputCount { expected: 1, got: 0 }.into())
    }
}

/// Predicts arrival delays from the entries in `S`.
#[derive(Debug)]
pub struct Predictor<S> {
    source: Arc<S>,
    store: ModelStore,
    extractor: FeatureExtractor,
    settings: PredictorSettings,
    device: Device,
    current: RwLock<Option<Arc<LoadedModel>>>,
    retrain_lock: tokio::sync::Mutex<()>,
}

impl<S: EntrySource> Predictor<S> {
    pub fn new(source: Arc<S>, store: ModelStore, settings: PredictorSettings) -> Self {
        Self {
            source,
            store,
            extractor: FeatureExtractor::new(settings.features),
            settings,
            device: default_device(),
            current: RwLock::new(None),
            retrain_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Predicts the arrival for a meeting stated at `world_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries cannot be read, the stored model is
    /// unreachable, or a needed training run fails.
    pub async fn predict(
        &self,
        world_time: &DateTime<FixedOffset>,
    ) -> Result<PredictionResult, PredictError> {
        let entries = self.source.list_entries().await?;
        self.predict_with(&entries, world_time).await
    }

    /// Predicts each time in order, with the same rules as [`Predictor::predict`].
    ///
    /// # Errors
    ///
    /// Fails on the first prediction that fails.
    pub async fn predict_batch(
        &self,
        world_times: &[DateTime<FixedOffset>],
    ) -> Result<Vec<PredictionResult>, PredictError> {
        let entries = self.source.list_entries().await?;

        let mut results = Vec::with_capacity(world_times.len());
        for world_time in world_times {
            results.push(self.predict_with(&entries, world_time).await?);
        }
        Ok(results)
    }

    /// Rebuilds the model from the full history, synchronously.
    ///
    /// The current model stays in service until the new one is saved. On
    /// failure it stays authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if reading, training or saving fails.
    pub async fn retrain(&self) -> Result<RetrainOutcome, PredictError> {
        let _guard = self.retrain_lock.lock().await;
        self.retrain_locked().await
    }

    /// Describes the stored model without loading its weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub async fn model_info(&self) -> Result<ModelInfo, PredictError> {
        Ok(self.store.get_metadata().await?.into())
    }

    async fn predict_with(
        &self,
        entries: &[TimeEntry],
        world_time: &DateTime<FixedOffset>,
    ) -> Result<PredictionResult, PredictError> {
        let count = entries.len();

        let delay_minutes = match self.model_for(count).await? {
            Some(model) => {
                let features = self.extractor.extract(world_time, entries);
                let raw = model.evaluate(&features, &self.device)?;
                debug!(raw, trained_on = model.metadata.trained_on, "Model prediction");
                round_half_up(f64::from(raw))
            }
            None => {
                let delay = fallback_delay(entries, self.settings.default_delay_minutes);
                debug!(count, delay, "Using median fallback");
                delay
            }
        };

        let predicted_adel_time =
            add_minutes(world_time, delay_minutes).ok_or(PredictError::OutOfRange {
                world_time: *world_time,
                delay_minutes,
            })?;

        Ok(PredictionResult {
            world_time: *world_time,
            predicted_adel_time,
            delay_minutes,
            confidence: Confidence::from_data_points(count),
            similar_events: similar_events(
                entries,
                hour_of_day(world_time),
                self.settings.similar_hours_window,
                self.settings.hour_distance,
            ),
        })
    }

    /// The model to answer with, or `None` when the fallback applies.
    async fn model_for(&self, count: usize) -> Result<Option<Arc<LoadedModel>>, PredictError> {
        if count < self.settings.min_samples {
            return Ok(None);
        }
        if let Some(model) = self.loaded() {
            return Ok(Some(model));
        }

        let _guard = self.retrain_lock.lock().await;
        // Another request may have installed one while we waited.
        if let Some(model) = self.loaded() {
            return Ok(Some(model));
        }

        match self.store.load::<InferenceBackend>(&self.device).await {
            Ok(Some(stored)) => {
                info!(trained_on = stored.metadata.trained_on, "Loaded stored model");
                return Ok(Some(self.install(LoadedModel::new(stored.model, stored.metadata))));
            }
            Ok(None) => info!("No stored model, training one now"),
            Err(e) if e.requires_retrain() => warn!("Discarding stored model: {e}"),
            Err(e) => return Err(e.into()),
        }

        match self.retrain_locked().await? {
            RetrainOutcome::Trained { .. } => Ok(self.loaded()),
            RetrainOutcome::Skipped { .. } => Ok(None),
        }
    }

    /// Must be called with `retrain_lock` held.
    async fn retrain_locked(&self) -> Result<RetrainOutcome, PredictError> {
        let entries = self.source.list_entries().await?;
        if entries.len() < self.settings.min_samples {
            info!(
                samples = entries.len(),
                required = self.settings.min_samples,
                "Not enough entries to train"
            );
            return Ok(RetrainOutcome::Skipped {
                samples: entries.len(),
                required: self.settings.min_samples,
            });
        }

        let set = self.extractor.prepare_training_data(&entries);
        let config = self.settings.training.clone();
        let model_config = config.model.clone();
        let device = self.device;

        info!(samples = set.len(), epochs = config.epochs, "Training model");
        let (model, metrics) = tokio::task::spawn_blocking(move || {
            train::<TrainingBackend>(&config, &set.features, &set.labels, &device)
        })
        .await??;

        let metadata = ModelMetadata::from_metrics(&metrics, Utc::now());
        self.store
            .save(model.clone(), &model_config, &metadata)
            .await?;

        self.install(LoadedModel::new(model, metadata.clone()));
        info!(
            trained_on = metadata.trained_on,
            mae = metadata.mae,
            loss = metadata.loss,
            "Model retrained"
        );

        Ok(RetrainOutcome::Trained { metadata })
    }

    fn loaded(&self) -> Option<Arc<LoadedModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let model = Arc::new(model);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&model));
        model
    }
}

/// Parses a stated meeting time.
///
/// # Errors
///
/// Returns [`PredictError::InvalidInput`] if `value` is not RFC 3339.
pub fn parse_world_time(value: &str) -> Result<DateTime<FixedOffset>, PredictError> {
    parse_timestamp(value).map_err(|e| EntryInputError::InvalidWorldTime(e.to_string()).into())
}

/// Median recorded delay, the upper middle one for even counts.
fn fallback_delay(entries: &[TimeEntry], default_delay_minutes: i64) -> i64 {
    let mut delays: Vec<i64> = entries.iter().map(TimeEntry::delay_minutes).collect();
    delays.sort_unstable();
    delays
        .get(delays.len() / 2)
        .copied()
        .unwrap_or(default_delay_minutes)
}

fn similar_events(
    entries: &[TimeEntry],
    hour: u32,
    window: u32,
    distance: HourDistance,
) -> Option<SimilarEvents> {
    let (sum, count) = entries
        .iter()
        .filter(|e| distance.between(e.hour_of_day(), hour) <= window)
        .fold((0_i64, 0_usize), |(sum, count), e| {
            (sum + e.delay_minutes(), count + 1)
        });

    (count > 0).then(|| SimilarEvents {
        average_delay: round_half_up(sum as f64 / count as f64),
        count,
    })
}
