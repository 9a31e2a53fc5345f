//! feedback table operations
//!
//! A feedback row is seeded with grade 0 by the request that produced the
//! prediction, then overwritten by an explicit user submission. No other
//! transitions exist.

use super::{insert_or_ignore, InsertOutcome};
use crate::utils::begin_monitored_write;
use pawscope_common::db::{Feedback, USER_GRADES};
use pawscope_common::{time, Error, Result};
use sqlx::SqlitePool;

/// Insert-or-ignore a feedback row
pub async fn insert_feedback(pool: &SqlitePool, task_id: &str, grade: i64) -> Result<InsertOutcome> {
    let query = sqlx::query("INSERT INTO feedback (uuid, timestamp, grade) VALUES (?, ?, ?)")
        .bind(task_id)
        .bind(time::now_db_string())
        .bind(grade);

    let outcome = insert_or_ignore(pool, "feedback::insert_feedback", query).await?;

    if outcome == InsertOutcome::Ignored {
        tracing::debug!(task_id = %task_id, "Feedback seed dropped (duplicate or unknown prediction)");
    }

    Ok(outcome)
}

/// Overwrite an existing feedback grade and refresh its timestamp.
///
/// **Algorithm:**
/// 1. Reject grades outside 1..=5
/// 2. Look up the row by task id inside a write-locked transaction; absent -> NotFound
/// 3. Write grade and a timestamp strictly later than the stored one
/// 4. Commit
pub async fn update_feedback(pool: &SqlitePool, task_id: &str, grade: i64) -> Result<Feedback> {
    if !USER_GRADES.contains(&grade) {
        return Err(Error::InvalidInput(format!(
            "Grade {} out of range {}..={}",
            grade,
            USER_GRADES.start(),
            USER_GRADES.end()
        )));
    }

    // Write lock up front: telemetry inserts commit concurrently on other connections
    let mut tx = begin_monitored_write(pool, "feedback::update_feedback").await?;

    let existing = sqlx::query_as::<_, Feedback>(
        "SELECT uuid, timestamp, grade FROM feedback WHERE uuid = ?",
    )
    .bind(task_id)
    .fetch_optional(&mut **tx.inner_mut()?)
    .await?;

    let Some(existing) = existing else {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("Feedback with id {} not found", task_id)));
    };

    let mut updated_at = time::now();
    if let Ok(previous) = time::parse_db_string(&existing.timestamp) {
        if updated_at <= previous {
            updated_at = previous + chrono::Duration::microseconds(1);
        }
    }
    let timestamp = time::to_db_string(updated_at);

    sqlx::query("UPDATE feedback SET grade = ?, timestamp = ? WHERE uuid = ?")
        .bind(grade)
        .bind(&timestamp)
        .bind(task_id)
        .execute(&mut **tx.inner_mut()?)
        .await?;

    tx.commit().await?;

    tracing::info!(task_id = %task_id, grade = grade, "Feedback submitted");

    Ok(Feedback {
        uuid: existing.uuid,
        timestamp,
        grade,
    })
}

/// Load a feedback row by task id
pub async fn load_feedback(pool: &SqlitePool, task_id: &str) -> Result<Option<Feedback>> {
    let row = sqlx::query_as::<_, Feedback>("SELECT uuid, timestamp, grade FROM feedback WHERE uuid = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Count feedback rows
pub async fn count_feedback(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
