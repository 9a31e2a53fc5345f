//! Request instrumentation around the predictor call
//!
//! [`InstrumentationWrapper::instrument`] is an interceptor: it takes the
//! request and the next handler, and returns exactly what the handler
//! returned. Around the call it hashes and analyzes the upload, times the
//! handler with a monotonic clock, and emits one [`TelemetryRecord`].
//!
//! Emission sits in a drop guard, so it runs exactly once on every exit path:
//! normal return, handler error, or the request future being dropped
//! mid-call. Emission is a non-blocking queue push; persistence errors never
//! reach the caller.

use super::writer::{TelemetryRecord, TelemetrySink};
use crate::db::NewImageMetadata;
use crate::predictor::{Prediction, Predictor, Probabilities};
use crate::services::{analyze, hash_bytes, ImageAnalysis};
use bytes::Bytes;
use pawscope_common::uuid_utils;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Floor for recorded latency; the measurement is always strictly positive
const MIN_LATENCY_MS: f64 = 1e-6;

/// A classification request as handed over by the transport layer
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Upload content, already read from the transport
    pub bytes: Bytes,
    pub filename: Option<String>,
}

impl InferenceRequest {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Predictor response plus the task id correlating its telemetry rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrumented {
    pub task_id: String,
    #[serde(flatten)]
    pub prediction: Prediction,
}

/// Emits the record when dropped unless [`TelemetryGuard::finish`] ran first
struct TelemetryGuard {
    sink: TelemetrySink,
    record: Option<TelemetryRecord>,
    started: Instant,
}

impl TelemetryGuard {
    /// Arm the guard and start the clock
    fn arm(sink: TelemetrySink, record: TelemetryRecord) -> Self {
        Self {
            sink,
            record: Some(record),
            started: Instant::now(),
        }
    }

    /// Stop the clock and emit with the handler's outcome
    fn finish(mut self, probabilities: Option<Probabilities>) {
        let latency_ms = elapsed_ms(self.started);
        if let Some(mut record) = self.record.take() {
            record.latency_ms = latency_ms;
            record.success = probabilities.is_some();
            record.probabilities = probabilities;
            self.sink.submit(record);
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.latency_ms = elapsed_ms(self.started);
            warn!(
                task_id = %record.task_id,
                latency_ms = record.latency_ms,
                "Request dropped before predictor returned, recording as failed"
            );
            self.sink.submit(record);
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).max(MIN_LATENCY_MS)
}

/// Hash and analyze upload content off the async worker threads
async fn capture_content(bytes: Bytes, filename: Option<String>) -> NewImageMetadata {
    let content = bytes.clone();
    let name = filename.clone();
    let task = tokio::task::spawn_blocking(move || {
        let hash = hash_bytes(&content);
        let analysis = analyze(&content, name.as_deref());
        NewImageMetadata::from_analysis(hash, name.as_deref(), &analysis)
    });

    match task.await {
        Ok(image) => image,
        Err(e) => {
            warn!(error = %e, "Content analysis task failed, using defaults");
            let analysis = ImageAnalysis::undecodable(bytes.len(), filename.as_deref());
            NewImageMetadata::from_analysis(hash_bytes(&bytes), filename.as_deref(), &analysis)
        }
    }
}

/// Wraps predictor calls with content capture, timing and telemetry emission
///
/// Cheap to clone; holds only the queue handle and the model version tag.
#[derive(Clone)]
pub struct InstrumentationWrapper {
    sink: TelemetrySink,
    model_version: Arc<str>,
}

impl InstrumentationWrapper {
    pub fn new(sink: TelemetrySink, model_version: &str) -> Self {
        Self {
            sink,
            model_version: Arc::from(model_version),
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Run `next` on the request bytes and record telemetry for the call.
    ///
    /// The handler's error is returned unchanged after the record has been
    /// queued.
    pub async fn instrument<F, Fut, E>(&self, request: InferenceRequest, next: F) -> Result<Instrumented, E>
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = Result<Prediction, E>>,
    {
        let model_version = Arc::clone(&self.model_version);
        self.run(&model_version, request, next).await
    }

    /// [`instrument`](Self::instrument) with `predictor` as the handler,
    /// tagging rows with the predictor's own model version.
    pub async fn classify<P: Predictor>(
        &self,
        predictor: &P,
        request: InferenceRequest,
    ) -> Result<Instrumented, P::Error> {
        self.run(predictor.model_version(), request, move |bytes: Bytes| async move {
            predictor.predict(&bytes).await
        })
        .await
    }

    async fn run<F, Fut, E>(&self, model_version: &str, request: InferenceRequest, next: F) -> Result<Instrumented, E>
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = Result<Prediction, E>>,
    {
        let task_id = uuid_utils::generate_task_id();
        let InferenceRequest { bytes, filename } = request;

        let image = capture_content(bytes.clone(), filename).await;

        debug!(
            task_id = %task_id,
            hash = %image.hash,
            size = image.file_size,
            "Captured request content"
        );

        let guard = TelemetryGuard::arm(
            self.sink.clone(),
            TelemetryRecord::pending(task_id.clone(), image, model_version),
        );

        match next(bytes).await {
            Ok(prediction) => {
                guard.finish(Some(prediction.probabilities));
                Ok(Instrumented { task_id, prediction })
            }
            Err(e) => {
                guard.finish(None);
                Err(e)
            }
        }
    }
}
