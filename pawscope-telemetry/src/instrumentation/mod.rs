//! Inference instrumentation
//!
//! The wrapper produces one telemetry record per request; the writer
//! persists records in the background.

pub mod wrapper;
pub mod writer;

pub use wrapper::{InferenceRequest, Instrumented, InstrumentationWrapper};
pub use writer::{TelemetryRecord, TelemetrySink, TelemetryWriter, WriterStats};
