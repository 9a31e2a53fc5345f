//! prediction_log table operations

use super::{insert_or_ignore, InsertOutcome};
use crate::predictor::Probabilities;
use pawscope_common::db::PredictionLog;
use pawscope_common::{time, Result};
use sqlx::SqlitePool;

/// Prediction log row to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub task_id: String,
    /// Content hash of the analyzed image (soft reference to image_metadata)
    pub image_hash: String,
    pub latency_ms: f64,
    pub success: bool,
    /// `None` when the predictor failed
    pub probabilities: Option<Probabilities>,
    pub model_version: String,
}

/// Insert-or-ignore a prediction log row
pub async fn insert_prediction(pool: &SqlitePool, prediction: &NewPrediction) -> Result<InsertOutcome> {
    let query = sqlx::query(
        r#"
        INSERT INTO prediction_log (uuid, timestamp, prob_cat, prob_dog, inference_time_ms, success, model_version, image_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&prediction.task_id)
    .bind(time::now_db_string())
    .bind(prediction.probabilities.map(|p| p.cat))
    .bind(prediction.probabilities.map(|p| p.dog))
    .bind(prediction.latency_ms)
    .bind(prediction.success)
    .bind(&prediction.model_version)
    .bind(&prediction.image_hash);

    let outcome = insert_or_ignore(pool, "predictions::insert_prediction", query).await?;

    match outcome {
        InsertOutcome::Inserted => tracing::debug!(
            task_id = %prediction.task_id,
            success = prediction.success,
            latency_ms = prediction.latency_ms,
            "Stored prediction log"
        ),
        InsertOutcome::Ignored => tracing::debug!(
            task_id = %prediction.task_id,
            image_hash = %prediction.image_hash,
            "Prediction log dropped (duplicate task id or unknown image)"
        ),
    }

    Ok(outcome)
}

/// Load a prediction log row by task id
pub async fn load_prediction(pool: &SqlitePool, task_id: &str) -> Result<Option<PredictionLog>> {
    let row = sqlx::query_as::<_, PredictionLog>(
        r#"
        SELECT uuid, timestamp, prob_cat, prob_dog, inference_time_ms, success, model_version, image_id
        FROM prediction_log
        WHERE uuid = ?
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Count prediction log rows
pub async fn count_predictions(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prediction_log")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
