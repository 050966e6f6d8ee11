//! CLI command implementations.

use std::sync::Arc;

use adel_standard_time::{Predictor, PredictorSettings};
use anyhow::{Context, Result};
use config::{Config, model_object_store};
use database::{SqliteEntryRepository, create_pool, run_migrations};
use ml_model::ModelStore;
use serde::Serialize;
use tracing::debug;

pub mod entries;
pub mod model_info;
pub mod predict;
pub mod retrain;
pub mod stats;

/// Key the model artifacts are stored under, inside `MODEL_PATH`.
const MODEL_KEY: &str = "delay_model";

/// Everything a command needs: the entry repository and the predictor over it.
pub struct App {
    pub repository: Arc<SqliteEntryRepository>,
    pub predictor: Arc<Predictor<SqliteEntryRepository>>,
}

impl App {
    /// Connects to the database, applies migrations and opens the model store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database or the model directory cannot be opened.
    pub async fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        let pool = create_pool(&config.database_url)
            .await
            .with_context(|| format!("Failed to connect to {}", config.database_url))?;
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        debug!(url = %config.database_url, "Database ready");

        let store = ModelStore::new(model_object_store(&config.model_path)?, MODEL_KEY);
        let repository = Arc::new(SqliteEntryRepository::new(pool));
        let predictor = Arc::new(Predictor::new(
            Arc::clone(&repository),
            store,
            PredictorSettings::from_config(config),
        ));

        Ok(Self {
            repository,
            predictor,
        })
    }
}

/// Writes `value` to stdout as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}
