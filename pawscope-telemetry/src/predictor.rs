//! Predictor collaborator
//!
//! The classification model itself lives outside this crate. The pipeline
//! depends only on the result shape: a label, a confidence and the per-class
//! probabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-class probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub cat: f64,
    pub dog: f64,
}

/// Predictor output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Winning label
    pub prediction: String,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

/// Image classifier consumed by the instrumentation wrapper
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Error raised for invalid input or model failure
    type Error: std::error::Error + Send + Sync + 'static;

    async fn predict(&self, image: &[u8]) -> Result<Prediction, Self::Error>;

    /// Version tag recorded on every prediction_log row
    fn model_version(&self) -> &str;
}
