use core::str::FromStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;

const DEFAULT_DATA_DIR: &str = "./data";

/// Creates the object store that holds model artifacts, rooted at `path`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or opened.
pub fn model_object_store(path: &Path) -> anyhow::Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create model directory {}", path.display()))?;

    let store = LocalFileSystem::new_with_prefix(path)
        .with_context(|| format!("Failed to open model store at {}", path.display()))?;

    Ok(Arc::new(store))
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory for local state.
    pub data_dir: PathBuf,

    /// Entry database connection URL.
    pub database_url: String,

    /// Directory holding the model artifacts.
    pub model_path: PathBuf,

    /// Entries required before the learned model is used.
    pub min_training_samples: usize,

    pub training_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,

    /// Hidden layer widths, input side first.
    pub hidden_layers: Vec<usize>,

    /// Number of past entries in the rolling average feature.
    pub rolling_window: usize,

    /// Delay assumed when nothing has been recorded yet.
    pub default_delay_minutes: i64,

    /// Fixes weight initialization and shuffling when set.
    pub training_seed: Option<u64>,

    /// Whether the similar-events hour window wraps around midnight.
    pub circular_similar_hours: bool,
}

impl Config {
    /// Loads configuration from the process environment and `.env`.
    ///
    /// Optional environment variables:
    /// - `AST_DATA_DIR`: base directory (default: `./data`)
    /// - `DATABASE_URL`: `SQLite` URL (default: `sqlite://<data_dir>/adel-data.db?mode=rwc`)
    /// - `MODEL_PATH`: model artifact directory (default: `<data_dir>/models`)
    /// - `MIN_TRAINING_SAMPLES`, `TRAINING_EPOCHS`, `BATCH_SIZE`, `LEARNING_RATE`,
    ///   `VALIDATION_SPLIT`, `HIDDEN_LAYERS` (e.g. `32,16,8`), `ROLLING_WINDOW`,
    ///   `DEFAULT_DELAY_MINUTES`, `TRAINING_SEED`
    /// - `SIMILAR_HOUR_DISTANCE`: `absolute` (default) or `circular`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but malformed or out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir =
            lookup("AST_DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);

        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| {
            format!("sqlite://{}?mode=rwc", data_dir.join("adel-data.db").display())
        });

        let model_path =
            lookup("MODEL_PATH").map_or_else(|| data_dir.join("models"), PathBuf::from);

        let config = Self {
            database_url,
            model_path,
            min_training_samples: parse_or(&lookup, "MIN_TRAINING_SAMPLES", 10)?,
            training_epochs: parse_or(&lookup, "TRAINING_EPOCHS", 100)?,
            batch_size: parse_or(&lookup, "BATCH_SIZE", 16)?,
            learning_rate: parse_or(&lookup, "LEARNING_RATE", 0.01)?,
            validation_split: parse_or(&lookup, "VALIDATION_SPLIT", 0.2)?,
            hidden_layers: parse_layers(lookup("HIDDEN_LAYERS").as_deref())?,
            rolling_window: parse_or(&lookup, "ROLLING_WINDOW", 10)?,
            default_delay_minutes: parse_or(&lookup, "DEFAULT_DELAY_MINUTES", 30)?,
            training_seed: lookup("TRAINING_SEED")
                .map(|raw| raw.trim().parse::<u64>())
                .transpose()
                .context("TRAINING_SEED must be an unsigned integer")?,
            circular_similar_hours: parse_hour_distance(
                lookup("SIMILAR_HOUR_DISTANCE").as_deref(),
            )?,
            data_dir,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.min_training_samples < 2 {
            bail!("MIN_TRAINING_SAMPLES must be at least 2");
        }
        if self.training_epochs == 0 {
            bail!("TRAINING_EPOCHS must be positive");
        }
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be positive");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            bail!("LEARNING_RATE must be a positive number");
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            bail!("VALIDATION_SPLIT must be in [0, 1)");
        }
        if self.rolling_window == 0 {
            bail!("ROLLING_WINDOW must be positive");
        }
        Ok(())
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}"))
    })
}

fn parse_layers(raw: Option<&str>) -> anyhow::Result<Vec<usize>> {
    let Some(raw) = raw else {
        return Ok(vec![32, 16, 8]);
    };

    let layers = raw
        .split(',')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("HIDDEN_LAYERS has an invalid value: {raw:?}"))?;

    if layers.is_empty() || layers.contains(&0) {
        bail!("HIDDEN_LAYERS needs at least one non-zero width");
    }
    Ok(layers)
}

fn parse_hour_distance(raw: Option<&str>) -> anyhow::Result<bool> {
    match raw.map(|r| r.trim().to_lowercase()).as_deref() {
        None | Some("absolute") => Ok(false),
        Some("circular") => Ok(true),
        Some(other) => bail!("SIMILAR_HOUR_DISTANCE must be absolute or circular, got {other:?}"),
    }
}
