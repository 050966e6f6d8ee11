//! Feature extractor crate for the arrival delay model.
//!
//! This crate transforms stated arrival times, plus the history that came
//! before them, into fixed-width feature vectors for training and inference.

use core::f32::consts::TAU;

use chrono::{DateTime, FixedOffset};
use entry_structs::{TimeEntry, chronological_cmp, day_of_week, hour_of_day, is_weekend_day};

/// The number of features extracted per timestamp:
/// - Hour of day, cyclical (sin, cos) = 2
/// - Day of week, cyclical (sin, cos) = 2
/// - Weekend flag = 1
/// - Rolling average delay, normalized = 1
pub const FEATURE_COUNT: usize = 6;

/// Bumped whenever the meaning or order of the features changes.
///
/// Stored models trained under a different version are unusable.
pub const ENCODING_VERSION: u32 = 1;

/// Rolling average defaults.
pub mod rolling {
    /// Past entries averaged into the rolling feature.
    pub const DEFAULT_WINDOW: usize = 10;
    /// Stand-in average when there is no history at all.
    pub const DEFAULT_DELAY_MINUTES: f32 = 30.0;
    /// Averages above this are clamped before normalizing.
    pub const DELAY_CAP_MINUTES: f32 = 120.0;
}

/// Feature vector for a single stated arrival time.
///
/// Layout: `[hour_sin, hour_cos, day_sin, day_cos, is_weekend, rolling_avg]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_COUNT]);

impl FeatureVector {
    #[must_use]
    pub const fn new(values: [f32; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    #[must_use]
    pub const fn values(&self) -> &[f32; FEATURE_COUNT] {
        &self.0
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance to another vector.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self([0.0; FEATURE_COUNT])
    }
}

impl TryFrom<&[f32]> for FeatureVector {
    type Error = FeatureError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        let values: [f32; FEATURE_COUNT] =
            values.try_into().map_err(|_| FeatureError::Width {
                expected: FEATURE_COUNT,
                got: values.len(),
            })?;
        Ok(Self(values))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureError {
    #[error("Feature vector has {got} values, expected {expected}")]
    Width { expected: usize, got: usize },
}

/// Rolling-average settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    /// How many preceding entries feed the rolling average.
    pub rolling_window: usize,
    /// Rolling average used when there is no preceding entry.
    pub default_delay_minutes: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_window: rolling::DEFAULT_WINDOW,
            default_delay_minutes: rolling::DEFAULT_DELAY_MINUTES,
        }
    }
}

/// Labelled training data in chronological order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    /// Observed delay in minutes, one per feature vector.
    pub labels: Vec<f32>,
}

impl TrainingSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Extracts feature vectors from timestamps and entry history.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    #[must_use]
    pub const fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Extracts the features for a prediction at `at`.
    ///
    /// `history` is ordered most recent first, as the repositories return it.
    /// Only entries stated strictly before `at` contribute to the rolling
    /// average.
    #[must_use]
    pub fn extract(&self, at: &DateTime<FixedOffset>, history: &[TimeEntry]) -> FeatureVector {
        encode(
            hour_of_day(at),
            day_of_week(at),
            self.rolling_average(at, history),
        )
    }

    /// Mean delay of the latest `rolling_window` entries stated before `at`.
    #[must_use]
    pub fn rolling_average(&self, at: &DateTime<FixedOffset>, history: &[TimeEntry]) -> f32 {
        let preceding = history
            .iter()
            .filter(|entry| entry.world_time() < at)
            .map(TimeEntry::delay_minutes);

        window_mean(preceding, self.config.rolling_window)
            .map_or(self.config.default_delay_minutes, |mean| mean as f32)
    }

    /// Builds the training set from the full history.
    ///
    /// The rolling average of entry `i` only sees the entries chronologically
    /// before `i`, never `i` itself or anything after it.
    #[must_use]
    pub fn prepare_training_data(&self, entries: &[TimeEntry]) -> TrainingSet {
        let mut chronological: Vec<&TimeEntry> = entries.iter().collect();
        chronological.sort_by(|a, b| chronological_cmp(a, b));

        let mut set = TrainingSet {
            features: Vec::with_capacity(chronological.len()),
            labels: Vec::with_capacity(chronological.len()),
        };

        for (i, entry) in chronological.iter().enumerate() {
            let start = i.saturating_sub(self.config.rolling_window);
            let preceding = chronological
                .get(start..i)
                .unwrap_or_default()
                .iter()
                .rev()
                .map(|e| e.delay_minutes());

            let rolling_avg = window_mean(preceding, self.config.rolling_window)
                .map_or(self.config.default_delay_minutes, |mean| mean as f32);

            set.features.push(encode(
                entry.hour_of_day(),
                entry.day_of_week(),
                rolling_avg,
            ));
            set.labels.push(entry.delay_minutes() as f32);
        }

        set
    }
}

/// Mean of the first `window` delays, or `None` when there are none.
///
/// Shared by the rolling feature and the statistics trend windows.
#[must_use]
pub fn window_mean(delays: impl IntoIterator<Item = i64>, window: usize) -> Option<f64> {
    let (sum, count) = delays
        .into_iter()
        .take(window)
        .fold((0_i64, 0_usize), |(sum, count), d| (sum + d, count + 1));

    (count > 0).then(|| sum as f64 / count as f64)
}

/// Encodes calendar position and rolling delay into a feature vector.
#[must_use]
pub fn encode(hour_of_day: u32, day_of_week: u32, rolling_avg_minutes: f32) -> FeatureVector {
    let (hour_sin, hour_cos) = cyclical(hour_of_day, 24);
    let (day_sin, day_cos) = cyclical(day_of_week, 7);
    let is_weekend = if is_weekend_day(day_of_week) { 1.0 } else { 0.0 };

    FeatureVector([
        hour_sin,
        hour_cos,
        day_sin,
        day_cos,
        is_weekend,
        normalize_delay(rolling_avg_minutes),
    ])
}

/// Maps a delay into `[0, 1]`, capping at [`rolling::DELAY_CAP_MINUTES`].
#[must_use]
pub fn normalize_delay(minutes: f32) -> f32 {
    minutes.clamp(0.0, rolling::DELAY_CAP_MINUTES) / rolling::DELAY_CAP_MINUTES
}

fn cyclical(value: u32, period: u32) -> (f32, f32) {
    let radians = TAU * value as f32 / period as f32;
    (radians.sin(), radians.cos())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use entry_structs::{NewTimeEntry, add_minutes, parse_timestamp};

    use super::*;

    fn at(value: &str) -> DateTime<FixedOffset> {
        parse_timestamp(value).expect("valid timestamp")
    }

    fn entry(id: i64, world: &str, delay: i64) -> TimeEntry {
        let world_time = at(world);
        let input = NewTimeEntry {
            world_time,
            adel_time: add_minutes(&world_time, delay).expect("in range"),
            reason: None,
        };
        TimeEntry::from_new(id, input, Utc::now())
    }

    /// Entries one day apart, newest first, with the given delays in
    /// chronological order.
    fn history(delays: &[i64]) -> Vec<TimeEntry> {
        let mut entries: Vec<TimeEntry> = delays
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                let world = format!("2024-02-{:02}T10:00:00Z", i + 1);
                entry(i as i64 + 1, &world, d)
            })
            .collect();
        entries.reverse();
        entries
    }

    #[test]
    fn test_hour_encoding_is_cyclical() {
        let midnight = encode(0, 1, 30.0);
        let late = encode(23, 1, 30.0);
        let noon = encode(12, 1, 30.0);

        assert!(midnight.distance(&late) < midnight.distance(&noon));
    }

    #[test]
    fn test_weekend_days_are_adjacent() {
        let saturday = encode(10, 6, 0.0);
        let sunday = encode(10, 0, 0.0);
        let wednesday = encode(10, 3, 0.0);

        assert!(saturday.distance(&sunday) < saturday.distance(&wednesday));
        assert!((saturday.values()[4] - 1.0).abs() < f32::EPSILON);
        assert!((sunday.values()[4] - 1.0).abs() < f32::EPSILON);
        assert!(wednesday.values()[4].abs() < f32::EPSILON);
    }

    #[test]
    fn test_normalize_delay_bounds() {
        assert!((normalize_delay(60.0) - 0.5).abs() < f32::EPSILON);
        assert!((normalize_delay(600.0) - 1.0).abs() < f32::EPSILON);
        assert!(normalize_delay(-15.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_extract_without_history_uses_default() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(&at("2024-02-05T08:00:00Z"), &[]);
        assert!((features.values()[5] - 30.0 / 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_extract_uses_only_preceding_window() {
        let extractor = FeatureExtractor::new(FeatureConfig {
            rolling_window: 2,
            default_delay_minutes: 30.0,
        });
        // Chronological delays 10, 20, 60 on Feb 1st..3rd.
        let entries = history(&[10, 20, 60]);

        // Before Feb 3rd only 10 and 20 exist.
        let avg = extractor.rolling_average(&at("2024-02-03T09:00:00Z"), &entries);
        assert!((avg - 15.0).abs() < 1e-6);

        // After all three, the window holds the latest two: 20 and 60.
        let avg = extractor.rolling_average(&at("2024-03-01T09:00:00Z"), &entries);
        assert!((avg - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_training_rolling_average_is_causal() {
        let extractor = FeatureExtractor::default();
        let delays = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120];
        let set = extractor.prepare_training_data(&history(&delays));

        assert_eq!(set.len(), delays.len());
        let expected_labels: Vec<f32> = delays.iter().map(|&d| d as f32).collect();
        assert_eq!(set.labels, expected_labels);

        let rolling: Vec<f32> = set.features.iter().map(|f| f.values()[5] * 120.0).collect();
        assert!((rolling[0] - 30.0).abs() < 1e-4, "no history uses default");
        assert!((rolling[1] - 10.0).abs() < 1e-4);
        assert!((rolling[2] - 15.0).abs() < 1e-4);
        // Entry 11 sees entries 1..=10 only: mean of 20..=110.
        assert!((rolling[11] - 65.0).abs() < 1e-4);

        // Changing the future must never change the past.
        let mut altered = delays;
        altered[6] = 500;
        let altered_set = extractor.prepare_training_data(&history(&altered));
        for i in 0..=6 {
            assert_eq!(set.features[i], altered_set.features[i], "entry {i}");
        }
        assert_ne!(set.features[7], altered_set.features[7]);
    }

    #[test]
    fn test_window_mean() {
        assert_eq!(window_mean(Vec::<i64>::new(), 10), None);
        assert_eq!(window_mean(vec![4, 8, 100], 2), Some(6.0));
    }

    #[test]
    fn test_try_from_checks_width() {
        let short = [0.0_f32; 4];
        assert_eq!(
            FeatureVector::try_from(&short[..]),
            Err(FeatureError::Width {
                expected: FEATURE_COUNT,
                got: 4
            })
        );
        let exact = [0.5_f32; FEATURE_COUNT];
        assert!(FeatureVector::try_from(&exact[..]).is_ok());
    }
}
