//! Database initialization
//!
//! Opens the SQLite pool and bootstraps the three telemetry tables.
//! Foreign keys are enforced on every connection: the soft-reference
//! handling in the gateway relies on the store rejecting dangling writes.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Tables in dependency order (referenced tables first)
pub const TABLES: [&str; 3] = ["image_metadata", "prediction_log", "feedback"];

/// Open the connection pool and create tables if needed
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = if config.is_in_memory() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        // Never recycle the single connection: the database lives inside it
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        let newly_created = !config.path.exists();

        // Create parent directory if it doesn't exist
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if newly_created {
            info!("Initialized new database: {}", config.path.display());
        } else {
            info!("Opened existing database: {}", config.path.display());
        }

        pool
    };

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create the telemetry tables (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_image_metadata_table(pool).await?;
    create_prediction_log_table(pool).await?;
    create_feedback_table(pool).await?;
    Ok(())
}

/// Drop the telemetry tables, dependents first
pub async fn drop_tables(pool: &SqlitePool) -> Result<()> {
    for table in TABLES.iter().rev() {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    info!("Dropped telemetry tables");
    Ok(())
}

pub async fn create_image_metadata_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_metadata (
            hash TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            ext_type TEXT NOT NULL,
            size_w INTEGER NOT NULL,
            size_h INTEGER NOT NULL,
            color_mode TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_prediction_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction_log (
            uuid TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            prob_cat REAL,
            prob_dog REAL,
            inference_time_ms REAL NOT NULL,
            success INTEGER NOT NULL,
            model_version TEXT NOT NULL,
            image_id TEXT NOT NULL REFERENCES image_metadata(hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_prediction_log_image_id ON prediction_log(image_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_feedback_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            uuid TEXT PRIMARY KEY REFERENCES prediction_log(uuid),
            timestamp TEXT NOT NULL,
            grade INTEGER NOT NULL DEFAULT 0 CHECK (grade BETWEEN 0 AND 5)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
