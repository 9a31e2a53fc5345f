//! image_metadata table operations
//!
//! Keyed by content hash. First write wins: a later insert with the same
//! hash is discarded whole, never merged.

use super::{insert_or_ignore, InsertOutcome};
use crate::services::ImageAnalysis;
use pawscope_common::db::ImageMetadata;
use pawscope_common::{time, Result};
use sqlx::SqlitePool;

/// Filename stored when the upload carried none
pub const UNKNOWN_FILENAME: &str = "unknown";

/// Image metadata to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct NewImageMetadata {
    pub hash: String,
    pub filename: String,
    pub ext_type: String,
    pub size_w: u32,
    pub size_h: u32,
    pub color_mode: String,
    pub file_size: u64,
}

impl NewImageMetadata {
    /// Build from a content hash and its analysis
    pub fn from_analysis(hash: String, filename: Option<&str>, analysis: &ImageAnalysis) -> Self {
        Self {
            hash,
            filename: filename.unwrap_or(UNKNOWN_FILENAME).to_string(),
            ext_type: analysis.extension.clone(),
            size_w: analysis.width,
            size_h: analysis.height,
            color_mode: analysis.color_mode.clone(),
            file_size: analysis.file_size,
        }
    }
}

/// Insert-or-ignore image metadata, returning the row's hash
pub async fn insert_image_metadata(pool: &SqlitePool, image: &NewImageMetadata) -> Result<String> {
    let query = sqlx::query(
        r#"
        INSERT INTO image_metadata (hash, filename, ext_type, size_w, size_h, color_mode, file_size, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&image.hash)
    .bind(&image.filename)
    .bind(&image.ext_type)
    .bind(i64::from(image.size_w))
    .bind(i64::from(image.size_h))
    .bind(&image.color_mode)
    .bind(i64::try_from(image.file_size).unwrap_or(i64::MAX))
    .bind(time::now_db_string());

    match insert_or_ignore(pool, "images::insert_image_metadata", query).await? {
        InsertOutcome::Inserted => {
            tracing::debug!(hash = %image.hash, "Stored image metadata");
        }
        InsertOutcome::Ignored => {
            tracing::debug!(hash = %image.hash, "Image already known, keeping existing metadata");
        }
    }

    Ok(image.hash.clone())
}

/// Load image metadata by hash
pub async fn load_image_metadata(pool: &SqlitePool, hash: &str) -> Result<Option<ImageMetadata>> {
    let row = sqlx::query_as::<_, ImageMetadata>(
        r#"
        SELECT hash, filename, ext_type, size_w, size_h, color_mode, file_size, created_at
        FROM image_metadata
        WHERE hash = ?
        "#,
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Count stored images
pub async fn count_images(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_metadata")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
