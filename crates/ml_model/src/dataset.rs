//! Dataset and batching for Burn training.

use burn::prelude::*;
use feature_extractor::{FEATURE_COUNT, FeatureVector};

/// A single item in the delay dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayDatasetItem {
    /// Encoded features for one arrival.
    pub features: [f32; FEATURE_COUNT],
    /// Observed delay in minutes.
    pub target: f32,
}

/// Dataset for delay training, in chronological order.
#[derive(Debug, Clone, Default)]
pub struct DelayDataset {
    items: Vec<DelayDatasetItem>,
}

impl DelayDataset {
    /// Pairs features with labels. Extra elements on either side are ignored;
    /// callers check the lengths first.
    #[must_use]
    pub fn new(features: &[FeatureVector], labels: &[f32]) -> Self {
        let items = features
            .iter()
            .zip(labels)
            .map(|(f, &target)| DelayDatasetItem {
                features: *f.values(),
                target,
            })
            .collect();
        Self { items }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<DelayDatasetItem> {
        self.items.get(index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Splits off the last `validation_split` fraction as a validation set,
    /// before any shuffling. At least one sample always stays in training.
    #[must_use]
    pub fn split(mut self, validation_split: f64) -> (Self, Self) {
        let len = self.items.len();
        let held_out = ((len as f64) * validation_split).floor() as usize;
        let held_out = held_out.min(len.saturating_sub(1));

        let validation = self.items.split_off(len - held_out);
        (self, Self { items: validation })
    }
}

/// A batch of training data.
#[derive(Debug, Clone)]
pub struct DelayBatch<B: Backend> {
    /// Input features tensor of shape `[batch_size, FEATURE_COUNT]`.
    pub inputs: Tensor<B, 2>,
    /// Target delays tensor of shape `[batch_size, 1]`.
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating training batches.
#[derive(Debug, Clone)]
pub struct DelayBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> DelayBatcher<B> {
    /// Creates a new batcher for the given device.
    #[must_use]
    pub const fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Creates a batch from a slice of items.
    pub fn batch(&self, items: &[DelayDatasetItem]) -> DelayBatch<B> {
        let batch_size = items.len();

        let mut features_data = Vec::with_capacity(batch_size * FEATURE_COUNT);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            features_data.extend_from_slice(&item.features);
            targets_data.push(item.target);
        }

        let inputs = Tensor::<B, 1>::from_floats(features_data.as_slice(), &self.device)
            .reshape([batch_size, FEATURE_COUNT]);

        let targets = Tensor::<B, 1>::from_floats(targets_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        DelayBatch { inputs, targets }
    }
}
