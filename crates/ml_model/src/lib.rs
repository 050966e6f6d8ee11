//! Delay regression model.
//!
//! This crate uses the Burn deep learning framework to define, train,
//! persist and run inference with a small feed-forward network that
//! predicts arrival delay in minutes from an encoded feature vector.

pub mod dataset;
mod error;
pub mod store;
pub mod training;

use burn::backend::NdArray;
use burn::backend::ndarray::NdArrayDevice;
use burn::module::Param;
use burn::nn::{Linear, Relu};
use burn::prelude::*;
use chrono::{DateTime, Utc};
use feature_extractor::{ENCODING_VERSION, FEATURE_COUNT, FeatureVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use error::{InferenceError, StoreError, TrainError};
pub use store::{ModelStore, StoredModel};
pub use training::{TrainingMetrics, train};

/// Backend used for inference and persisted models.
pub type InferenceBackend = NdArray;

/// Backend used for training.
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

/// The device all models run on.
///
/// This function only exists to be able to change the device at a single
/// location.
#[must_use]
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Architecture of the delay model.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Width of the input feature vector.
    #[config(default = "feature_extractor::FEATURE_COUNT")]
    pub input_width: usize,
    /// Units per hidden layer, input side first.
    #[config(default = "vec![32, 16, 8]")]
    pub hidden_layers: Vec<usize>,
}

/// Configuration for training the model.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Model architecture configuration.
    pub model: ModelConfig,
    /// Learning rate for the optimizer.
    #[config(default = 0.01)]
    pub learning_rate: f64,
    /// Number of training epochs.
    #[config(default = 100)]
    pub epochs: usize,
    /// Batch size for training.
    #[config(default = 16)]
    pub batch_size: usize,
    /// Fraction of samples, taken from the tail, held out for validation.
    #[config(default = 0.2)]
    pub validation_split: f64,
    /// Seed for weight initialisation and shuffling. Random when unset.
    pub seed: Option<u64>,
}

/// The delay prediction model.
///
/// ReLU hidden layers followed by a single linear output unit.
#[derive(Module, Debug)]
pub struct DelayModel<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

impl ModelConfig {
    /// Creates a model with He-uniform weights and zero biases drawn from
    /// `seed`. The same seed always yields the same weights.
    pub fn init<B: Backend>(&self, device: &B::Device, seed: u64) -> DelayModel<B> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut width = self.input_width;

        let hidden = self
            .hidden_layers
            .iter()
            .map(|&units| {
                let layer = he_uniform_linear(&mut rng, width, units, device);
                width = units;
                layer
            })
            .collect();
        let output = he_uniform_linear(&mut rng, width, 1, device);

        DelayModel {
            hidden,
            output,
            activation: Relu::new(),
        }
    }
}

fn he_uniform_linear<B: Backend>(
    rng: &mut StdRng,
    d_input: usize,
    d_output: usize,
    device: &B::Device,
) -> Linear<B> {
    let limit = (6.0 / d_input.max(1) as f32).sqrt();
    let weights: Vec<f32> = (0..d_input * d_output)
        .map(|_| rng.gen_range(-limit..limit))
        .collect();

    let weight =
        Tensor::<B, 1>::from_floats(weights.as_slice(), device).reshape([d_input, d_output]);
    let bias = Tensor::<B, 1>::zeros([d_output], device);

    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

impl<B: Backend> DelayModel<B> {
    /// Forward pass through the network.
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape [`batch_size`, `input_width`]
    ///
    /// # Returns
    ///
    /// Tensor of shape [`batch_size`, 1] containing predicted delays in minutes.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for layer in &self.hidden {
            x = self.activation.forward(layer.forward(x));
        }
        self.output.forward(x)
    }

    /// Whether the layer shapes agree with `config`.
    pub fn matches(&self, config: &ModelConfig) -> bool {
        if self.hidden.len() != config.hidden_layers.len() {
            return false;
        }

        let mut width = config.input_width;
        for (layer, &units) in self.hidden.iter().zip(&config.hidden_layers) {
            if layer.weight.dims() != [width, units] {
                return false;
            }
            width = units;
        }
        self.output.weight.dims() == [width, 1]
    }
}

/// Predicts delays, in minutes, for each feature vector.
///
/// # Errors
///
/// Returns an error if the output tensor cannot be read back.
pub fn predict<B: Backend>(
    model: &DelayModel<B>,
    features: &[FeatureVector],
    device: &B::Device,
) -> Result<Vec<f32>, InferenceError> {
    if features.is_empty() {
        return Ok(Vec::new());
    }

    let input_data: Vec<f32> = features
        .iter()
        .flat_map(|f| f.values().iter().copied())
        .collect();
    let input = Tensor::<B, 1>::from_floats(input_data.as_slice(), device)
        .reshape([features.len(), FEATURE_COUNT]);

    let output: Vec<f32> = model
        .forward(input)
        .into_data()
        .to_vec()
        .map_err(|e| InferenceError::Output(format!("{e:?}")))?;

    if output.len() != features.len() {
        return Err(InferenceError::OutputCount {
            expected: features.len(),
            got: output.len(),
        });
    }
    Ok(output)
}

/// Facts about a trained model, persisted next to its weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// Feature encoding version the model was trained against.
    pub version: u32,
    /// Number of samples the model was trained on.
    pub trained_on: usize,
    pub last_trained: DateTime<Utc>,
    /// Mean absolute error on the training split, in minutes.
    pub mae: f32,
    /// Mean squared error on the training split.
    pub loss: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_mae: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f32>,
    pub epochs: usize,
}

impl ModelMetadata {
    #[must_use]
    pub fn from_metrics(metrics: &TrainingMetrics, last_trained: DateTime<Utc>) -> Self {
        Self {
            version: ENCODING_VERSION,
            trained_on: metrics.sample_count,
            last_trained,
            mae: metrics.mae,
            loss: metrics.loss,
            val_mae: metrics.val_mae,
            val_loss: metrics.val_loss,
            epochs: metrics.epochs,
        }
    }
}
