//! pawscope-telemetry: inference telemetry and persistence
//!
//! Records, for every classification request, the analyzed image, the
//! model's output, the inference latency and the user's later feedback,
//! without letting any of that record-keeping fail or slow the response.
//!
//! ```ignore
//! let service = TelemetryService::connect(&config).await?;
//! let wrapper = service.wrapper();
//! let response = wrapper
//!     .classify(&predictor, InferenceRequest::new(upload).with_filename("cat.jpg"))
//!     .await?;
//! service.submit_feedback(&response.task_id, 5).await?;
//! ```

pub mod db;
pub mod instrumentation;
pub mod predictor;
pub mod service;
pub mod services;
pub mod utils;

pub use crate::db::{InsertOutcome, PersistenceGateway};
pub use crate::instrumentation::{InferenceRequest, Instrumented, InstrumentationWrapper};
pub use crate::predictor::{Prediction, Predictor, Probabilities};
pub use crate::service::TelemetryService;
