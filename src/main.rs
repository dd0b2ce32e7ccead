mod config;
mod events;
mod features;
mod model;
mod orchestrator;
mod persist;
mod predict;
mod state;
mod store;
mod watcher;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::PipelineConfig;
use model::GradientTrainer;
use orchestrator::Orchestrator;
use watcher::ChangeWatcher;

#[derive(Parser)]
#[command(name = "spread-ml")]
#[command(version = "0.1.0")]
#[command(about = "Feature extraction, retraining, and prediction serving for trading session logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "spread-ml.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict from a JSON feature object, or run the resident HTTP service
    Predict {
        /// JSON object of feature values
        input: Option<String>,

        /// Run as an HTTP server instead of a one-shot prediction
        #[arg(long)]
        serve: bool,

        /// Server port
        #[arg(short, long, default_value = "8765")]
        port: u16,
    },
    /// Run the training pipeline, either once or as a watching daemon
    Train {
        /// Train once unconditionally and exit
        #[arg(long)]
        once: bool,
    },
    /// Extract feature tables from the event logs without training
    Extract,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = PipelineConfig::load(Path::new(&cli.config))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config error: {}", e);
        }
        anyhow::bail!("invalid configuration");
    }

    match cli.command {
        Commands::Predict { input, serve, port } => {
            if serve {
                predict::serve(&config.models_dir, port).await?;
            } else if let Some(input) = input {
                predict::run_once(&config.models_dir, &input)?;
            } else {
                println!("Usage:");
                println!("  spread-ml predict '{{\"spread_now\": 3.5, ...}}'  # one-shot prediction");
                println!("  spread-ml predict --serve                      # start HTTP server");
                println!("  spread-ml predict --serve --port 8888          # custom port");
            }
        }
        Commands::Train { once } => {
            let orchestrator =
                Orchestrator::new(config.clone(), Box::new(GradientTrainer::default()));
            if once {
                orchestrator.run_pass()?.log();
            } else {
                run_daemon(config, orchestrator).await?;
            }
        }
        Commands::Extract => {
            run_extraction(&config)?;
        }
    }

    Ok(())
}

async fn run_daemon(config: PipelineConfig, orchestrator: Orchestrator) -> Result<()> {
    info!("training daemon started");
    info!("watching {}", config.summaries_path().display());
    info!("min sessions: {}", config.min_sessions_for_training);
    info!("retrain interval: {} new sessions", config.retrain_interval);

    // Catch up on anything that arrived while we were down.
    match orchestrator.check_and_train() {
        Ok(Some(report)) => report.log(),
        Ok(None) => {}
        Err(e) => error!("training pass failed: {}", e),
    }

    let mut watcher = ChangeWatcher::new(
        config.summaries_path(),
        Duration::from_secs(config.debounce_secs),
    );

    loop {
        tokio::select! {
            _ = watcher.next_change() => {
                info!("new session data detected");
                match orchestrator.check_and_train() {
                    Ok(Some(report)) => report.log(),
                    Ok(None) => {}
                    Err(e) => error!("training pass failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn run_extraction(config: &PipelineConfig) -> Result<()> {
    use crate::features::{fill, session, spread, timing};
    use crate::store::EventStore;

    let store = EventStore::load(&config.data_dir)?;

    spread::extract(&store.snapshots).save(&config.features_dir)?;
    fill::extract(&store.orders, &store.fills, &store.snapshots).save(&config.features_dir)?;
    timing::extract(&store.snapshots).save(&config.features_dir)?;
    session::extract(&store.summaries).save(&config.features_dir)?;

    info!("feature extraction complete");
    Ok(())
}
