//! Adel Standard Time
//!
//! Records when Adel actually arrives and predicts how late the next
//! arrival will be.

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use database::{create_pool, run_migrations};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::App;

/// Adel Standard Time
#[derive(Parser)]
#[command(name = "ast")]
#[command(about = "Learns from recorded arrivals and predicts how late Adel will be")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an arrival
    Add {
        /// Stated meeting time (RFC 3339)
        #[arg(short, long)]
        world_time: String,

        /// Actual arrival time (RFC 3339)
        #[arg(short, long)]
        adel_time: String,

        /// Why Adel was late: traffic, family_emergency, work_emergency,
        /// technical_difficulties or other
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Remove a recorded arrival
    Delete {
        /// Entry id
        #[arg(short, long)]
        id: i64,
    },

    /// List recorded arrivals, most recent first
    List,

    /// Predict the arrival for a stated meeting time
    Predict {
        /// Stated meeting time (RFC 3339)
        #[arg(short, long)]
        world_time: String,
    },

    /// Predict arrivals for several meeting times
    PredictBatch {
        /// Stated meeting times (RFC 3339), repeat for each
        #[arg(short, long = "world-time", required = true)]
        world_times: Vec<String>,
    },

    /// Show delay statistics
    Stats,

    /// Retrain the model now
    Retrain,

    /// Describe the stored model
    ModelInfo,

    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    if matches!(cli.command, Commands::Migrate) {
        let pool = create_pool(&config.database_url).await?;
        run_migrations(&pool).await?;
        info!("Migrations completed successfully");
        return Ok(());
    }

    let app = App::open(&config).await?;

    match cli.command {
        Commands::Add {
            world_time,
            adel_time,
            reason,
        } => {
            commands::entries::add(&app, &world_time, &adel_time, reason.as_deref()).await?;
        }
        Commands::Delete { id } => {
            commands::entries::delete(&app, id).await?;
        }
        Commands::List => {
            commands::entries::list(&app).await?;
        }
        Commands::Predict { world_time } => {
            commands::predict::run(&app, &world_time).await?;
        }
        Commands::PredictBatch { world_times } => {
            commands::predict::run_batch(&app, &world_times).await?;
        }
        Commands::Stats => {
            commands::stats::run(&app).await?;
        }
        Commands::Retrain => {
            commands::retrain::run(&app).await?;
        }
        Commands::ModelInfo => {
            commands::model_info::run(&app).await?;
        }
        Commands::Migrate => {}
    }

    Ok(())
}
