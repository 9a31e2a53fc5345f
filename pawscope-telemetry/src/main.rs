//! pawscope - operator CLI for the inference telemetry store
//!
//! Creates and drops the schema, inspects recorded requests, and applies
//! user feedback grades.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pawscope_common::config::{load_config, PawscopeConfig};
use pawscope_common::{db, uuid_utils};
use pawscope_telemetry::services::{analyze, hash_bytes};
use pawscope_telemetry::PersistenceGateway;

/// Command-line arguments for pawscope
#[derive(Parser, Debug)]
#[command(name = "pawscope")]
#[command(about = "Inference telemetry store for the cat/dog classifier")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "PAWSCOPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the telemetry tables if they do not exist
    InitDb,
    /// Drop all telemetry tables
    DropDb,
    /// Hash and analyze an image file without recording it
    Analyze {
        file: PathBuf,
    },
    /// Grade a previous classification (1-5)
    Feedback {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        grade: i64,
    },
    /// Print the rows recorded for a task
    Show {
        #[arg(long)]
        task_id: String,
    },
    /// Print row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Database: {}", config.database.path.display());

    match args.command {
        Command::InitDb => {
            let pool = db::connect(&config.database)
                .await
                .context("Failed to open database")?;
            info!("Tables ready: {}", db::TABLES.join(", "));
            pool.close().await;
        }
        Command::DropDb => {
            let pool = db::connect(&config.database)
                .await
                .context("Failed to open database")?;
            db::drop_tables(&pool).await.context("Failed to drop tables")?;
            info!("Tables dropped");
            pool.close().await;
        }
        Command::Analyze { file } => analyze_file(&file)?,
        Command::Feedback { task_id, grade } => {
            check_task_id(&task_id)?;
            let gateway = open_gateway(&config).await?;
            let feedback = gateway
                .update_feedback(&task_id, grade)
                .await
                .with_context(|| format!("Failed to record feedback for {}", task_id))?;
            println!("{}", serde_json::to_string_pretty(&feedback)?);
            gateway.pool().close().await;
        }
        Command::Show { task_id } => {
            check_task_id(&task_id)?;
            let gateway = open_gateway(&config).await?;
            let prediction = gateway.get_prediction(&task_id).await?;
            let image = match &prediction {
                Some(p) => gateway.get_image_metadata(&p.image_id).await?,
                None => None,
            };
            let feedback = gateway.get_feedback(&task_id).await?;
            if prediction.is_none() && feedback.is_none() {
                anyhow::bail!("No telemetry recorded for task {}", task_id);
            }
            let graded = feedback.as_ref().is_some_and(|f| f.is_graded());
            let report = json!({
                "prediction": prediction,
                "image": image,
                "feedback": feedback,
                "graded": graded,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            gateway.pool().close().await;
        }
        Command::Stats => {
            let gateway = open_gateway(&config).await?;
            let report = json!({
                "image_metadata": gateway.count_images().await?,
                "prediction_log": gateway.count_predictions().await?,
                "feedback": gateway.count_feedback().await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            gateway.pool().close().await;
        }
    }

    Ok(())
}

fn check_task_id(task_id: &str) -> Result<()> {
    uuid_utils::parse(task_id).with_context(|| format!("Invalid task id: {}", task_id))?;
    Ok(())
}

async fn open_gateway(config: &PawscopeConfig) -> Result<PersistenceGateway> {
    let pool = db::connect(&config.database)
        .await
        .context("Failed to open database")?;
    Ok(PersistenceGateway::new(pool))
}

fn analyze_file(path: &Path) -> Result<()> {
    let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path.file_name().and_then(|n| n.to_str());
    let analysis = analyze(&content, filename);
    let report = json!({
        "hash": hash_bytes(&content),
        "decoded": analysis.is_decoded(),
        "analysis": analysis,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
