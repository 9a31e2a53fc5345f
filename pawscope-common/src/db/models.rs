//! Database models

use serde::{Deserialize, Serialize};

/// Grade stored on a freshly seeded feedback row
pub const UNSET_GRADE: i64 = 0;

/// Inclusive range of grades a user may submit
pub const USER_GRADES: std::ops::RangeInclusive<i64> = 1..=5;

/// One row per distinct image content hash; first write wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageMetadata {
    pub hash: String,
    pub filename: String,
    pub ext_type: String,
    pub size_w: i64,
    pub size_h: i64,
    pub color_mode: String,
    pub file_size: i64,
    pub created_at: String,
}

/// One row per classification request, including failed ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PredictionLog {
    pub uuid: String,
    pub timestamp: String,
    pub prob_cat: Option<f64>,
    pub prob_dog: Option<f64>,
    pub inference_time_ms: f64,
    pub success: bool,
    pub model_version: String,
    pub image_id: String,
}

/// User rating keyed by the prediction's task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feedback {
    pub uuid: String,
    pub timestamp: String,
    pub grade: i64,
}

impl Feedback {
    pub fn is_graded(&self) -> bool {
        self.grade != UNSET_GRADE
    }
}
