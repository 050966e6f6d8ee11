//! Training logic for the delay model.

use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use feature_extractor::{FEATURE_COUNT, FeatureVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::dataset::{DelayBatcher, DelayDataset, DelayDatasetItem};
use crate::{DelayModel, TrainError, TrainingConfig};

/// Fewest samples a model can be fitted on.
pub const MIN_SAMPLES: usize = 2;

const LOG_EVERY_EPOCHS: usize = 20;

/// Output from training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingMetrics {
    /// Final training loss (mean squared error).
    pub loss: f32,
    /// Final training mean absolute error, in minutes.
    pub mae: f32,
    /// Final validation loss, if a validation split was held out.
    pub val_loss: Option<f32>,
    pub val_mae: Option<f32>,
    /// Number of epochs completed.
    pub epochs: usize,
    /// Number of samples handed to training, both splits included.
    pub sample_count: usize,
    /// Seed used for initialisation and shuffling.
    pub seed: u64,
}

/// Trains a fresh model on the provided data.
///
/// Uses a plain mini-batch loop with the Adam optimizer and MSE loss. The
/// last `validation_split` fraction of the samples is held out before
/// shuffling. With a fixed seed the result is fully reproducible.
///
/// # Arguments
///
/// * `config` - Training configuration.
/// * `features` - Feature vectors, in chronological order.
/// * `labels` - Delays in minutes, one per feature vector.
/// * `device` - The device to train on.
///
/// # Errors
///
/// Returns an error if the inputs are malformed or the loss stops being
/// finite.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    features: &[FeatureVector],
    labels: &[f32],
    device: &B::Device,
) -> Result<(DelayModel<B::InnerBackend>, TrainingMetrics), TrainError> {
    validate(config, features, labels)?;

    let seed = config.seed.unwrap_or_else(rand::random);
    let (train_set, valid_set) =
        DelayDataset::new(features, labels).split(config.validation_split);

    debug!(
        train = train_set.len(),
        validation = valid_set.len(),
        seed,
        "Starting training"
    );

    let mut model: DelayModel<B> = config.model.init(device, seed);
    let batcher = DelayBatcher::<B>::new(device.clone());
    let valid_batcher = DelayBatcher::<B::InnerBackend>::new(device.clone());
    let mut optimizer = AdamConfig::new().init();
    let loss_fn = MseLoss::new();

    let mut metrics = TrainingMetrics {
        loss: f32::NAN,
        mae: f32::NAN,
        val_loss: None,
        val_mae: None,
        epochs: 0,
        sample_count: features.len(),
        seed,
    };

    let num_samples = train_set.len();
    let mut indices: Vec<usize> = (0..num_samples).collect();
    let mut items: Vec<DelayDatasetItem> = Vec::with_capacity(config.batch_size);

    for epoch in 0..config.epochs {
        let mut loss_sum = 0.0_f64;
        let mut mae_sum = 0.0_f64;

        indices.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)));

        for batch_indices in indices.chunks(config.batch_size) {
            items.clear();
            items.extend(batch_indices.iter().filter_map(|&i| train_set.get(i)));
            if items.is_empty() {
                continue;
            }

            let batch = batcher.batch(&items);

            let predictions = model.forward(batch.inputs);
            let abs_error = (predictions.clone() - batch.targets.clone()).abs().mean();
            let loss = loss_fn.forward(predictions, batch.targets, Reduction::Mean);

            let weight = items.len() as f64;
            loss_sum += f64::from(scalar(loss.clone())) * weight;
            mae_sum += f64::from(scalar(abs_error)) * weight;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }

        metrics.loss = (loss_sum / num_samples as f64) as f32;
        metrics.mae = (mae_sum / num_samples as f64) as f32;
        metrics.epochs = epoch + 1;

        if !metrics.loss.is_finite() {
            return Err(TrainError::Diverged { epoch: epoch + 1 });
        }

        if !valid_set.is_empty() {
            let (val_loss, val_mae) =
                evaluate(&model.valid(), &valid_set, &valid_batcher, &loss_fn);
            metrics.val_loss = Some(val_loss);
            metrics.val_mae = Some(val_mae);
        }

        if epoch % LOG_EVERY_EPOCHS == 0 || epoch + 1 == config.epochs {
            log_progress(&metrics);
        }
    }

    Ok((model.valid(), metrics))
}

fn validate(
    config: &TrainingConfig,
    features: &[FeatureVector],
    labels: &[f32],
) -> Result<(), TrainError> {
    if features.len() != labels.len() {
        return Err(TrainError::ShapeMismatch(format!(
            "{} feature vectors but {} labels",
            features.len(),
            labels.len()
        )));
    }
    if config.model.input_width != FEATURE_COUNT {
        return Err(TrainError::ShapeMismatch(format!(
            "model expects {} inputs, features have {FEATURE_COUNT}",
            config.model.input_width
        )));
    }
    if features.len() < MIN_SAMPLES {
        return Err(TrainError::NotEnoughSamples {
            required: MIN_SAMPLES,
            got: features.len(),
        });
    }
    if config.epochs == 0 || config.batch_size == 0 {
        return Err(TrainError::InvalidConfig(
            "epochs and batch size must be positive".to_string(),
        ));
    }
    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(TrainError::InvalidConfig(format!(
            "learning rate {} is not positive",
            config.learning_rate
        )));
    }
    if !(0.0..1.0).contains(&config.validation_split) {
        return Err(TrainError::InvalidConfig(format!(
            "validation split {} is outside [0, 1)",
            config.validation_split
        )));
    }
    let finite = labels.iter().all(|l| l.is_finite())
        && features
            .iter()
            .all(|f| f.values().iter().all(|v| v.is_finite()));
    if !finite {
        return Err(TrainError::NonFiniteInput);
    }
    Ok(())
}

/// Loss and mean absolute error over a whole dataset.
fn evaluate<B: Backend>(
    model: &DelayModel<B>,
    dataset: &DelayDataset,
    batcher: &DelayBatcher<B>,
    loss_fn: &MseLoss,
) -> (f32, f32) {
    let items: Vec<_> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();
    let batch = batcher.batch(&items);

    let predictions = model.forward(batch.inputs);
    let abs_error = (predictions.clone() - batch.targets.clone()).abs().mean();
    let loss = loss_fn.forward(predictions, batch.targets, Reduction::Mean);

    (scalar(loss), scalar(abs_error))
}

/// Reads a single-element tensor. Unreadable values become NaN so that
/// divergence checks trip on them.
fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor
        .into_data()
        .to_vec::<f32>()
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(f32::NAN)
}

fn log_progress(metrics: &TrainingMetrics) {
    match (metrics.val_loss, metrics.val_mae) {
        (Some(val_loss), Some(val_mae)) => info!(
            "Epoch {}: loss = {:.4}, mae = {:.4}, val_loss = {val_loss:.4}, val_mae = {val_mae:.4}",
            metrics.epochs, metrics.loss, metrics.mae
        ),
        _ => info!(
            "Epoch {}: loss = {:.4}, mae = {:.4}",
            metrics.epochs, metrics.loss, metrics.mae
        ),
    }
}
