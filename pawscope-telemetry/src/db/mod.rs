//! Persistence gateway
//!
//! Conflict-tolerant writes against image_metadata, prediction_log and
//! feedback. Each operation opens its own short-lived transaction and touches
//! exactly one table; there is no atomicity across the three.
//!
//! Inserts are insert-or-ignore: a primary-key conflict or a dangling
//! reference is rolled back and reported as [`InsertOutcome::Ignored`], never
//! as an error. Only infrastructure failures (pool closed, I/O) surface as `Err`.

pub mod feedback;
pub mod images;
pub mod predictions;

pub use images::NewImageMetadata;
pub use predictions::NewPrediction;

use crate::utils::begin_monitored;
use pawscope_common::db::{Feedback, ImageMetadata, PredictionLog};
use pawscope_common::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};

/// Result of an insert-or-ignore write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written and committed
    Inserted,
    /// Constraint violation; attempted write rolled back, stored data untouched
    Ignored,
}

/// Execute one INSERT in its own transaction, absorbing constraint violations.
async fn insert_or_ignore<'q>(
    pool: &SqlitePool,
    caller: &'static str,
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
) -> Result<InsertOutcome> {
    let mut tx = begin_monitored(pool, caller).await?;

    match query.execute(&mut **tx.inner_mut()?).await {
        Ok(_) => {
            tx.commit().await?;
            Ok(InsertOutcome::Inserted)
        }
        Err(e) => {
            let err = Error::Database(e);
            if err.is_constraint_violation() {
                tracing::debug!(caller = caller, error = %err, "Constraint violation, write dropped");
                tx.rollback().await?;
                Ok(InsertOutcome::Ignored)
            } else {
                // Dropping tx rolls back
                Err(err)
            }
        }
    }
}

/// Relational store access for the telemetry pipeline
///
/// Holds only the pool handle; clones share it and are safe to use from any
/// number of concurrent requests.
#[derive(Clone)]
pub struct PersistenceGateway {
    pool: SqlitePool,
}

impl PersistenceGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert image metadata unless a row with the same hash exists.
    ///
    /// Returns the hash naming the logical row, whether it was just written
    /// or already present.
    pub async fn insert_image_metadata(&self, image: &NewImageMetadata) -> Result<String> {
        images::insert_image_metadata(&self.pool, image).await
    }

    /// Insert a prediction log row; dropped silently when the task id already
    /// exists or the image hash names no stored image.
    pub async fn insert_prediction(&self, prediction: &NewPrediction) -> Result<InsertOutcome> {
        predictions::insert_prediction(&self.pool, prediction).await
    }

    /// Insert a feedback row; dropped silently when the task id already has
    /// feedback or names no stored prediction.
    pub async fn insert_feedback(&self, task_id: &str, grade: i64) -> Result<InsertOutcome> {
        feedback::insert_feedback(&self.pool, task_id, grade).await
    }

    /// Overwrite the grade of an existing feedback row and refresh its timestamp.
    ///
    /// Fails with [`Error::NotFound`] naming the task id when there is no row,
    /// and [`Error::InvalidInput`] for grades outside 1..=5.
    pub async fn update_feedback(&self, task_id: &str, grade: i64) -> Result<Feedback> {
        feedback::update_feedback(&self.pool, task_id, grade).await
    }

    pub async fn get_image_metadata(&self, hash: &str) -> Result<Option<ImageMetadata>> {
        images::load_image_metadata(&self.pool, hash).await
    }

    pub async fn get_prediction(&self, task_id: &str) -> Result<Option<PredictionLog>> {
        predictions::load_prediction(&self.pool, task_id).await
    }

    pub async fn get_feedback(&self, task_id: &str) -> Result<Option<Feedback>> {
        feedback::load_feedback(&self.pool, task_id).await
    }

    pub async fn count_images(&self) -> Result<i64> {
        images::count_images(&self.pool).await
    }

    pub async fn count_predictions(&self) -> Result<i64> {
        predictions::count_predictions(&self.pool).await
    }

    pub async fn count_feedback(&self) -> Result<i64> {
        feedback::count_feedback(&self.pool).await
    }
}
