//! End-to-end tests for the instrumented inference pipeline
//!
//! Requests go through InstrumentationWrapper into the background writer
//! and land in SQLite: in-memory by default, on disk where noted.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use pawscope_common::config::{DatabaseConfig, TelemetryConfig};
use pawscope_common::{time, Error};
use pawscope_telemetry::services::hash_bytes;
use pawscope_telemetry::{InferenceRequest, Prediction, Predictor, Probabilities, TelemetryService};

/// Predictor double: fixed latency, fixed answer
struct FixedPredictor {
    delay: Duration,
    probabilities: Probabilities,
}

impl FixedPredictor {
    fn cat(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            probabilities: Probabilities { cat: 0.82, dog: 0.18 },
        }
    }
}

#[async_trait]
impl Predictor for FixedPredictor {
    type Error = ModelError;

    async fn predict(&self, _image: &[u8]) -> Result<Prediction, ModelError> {
        tokio::time::sleep(self.delay).await;
        let (label, confidence) = if self.probabilities.cat >= self.probabilities.dog {
            ("cat", self.probabilities.cat)
        } else {
            ("dog", self.probabilities.dog)
        };
        Ok(Prediction {
            prediction: label.to_string(),
            confidence,
            probabilities: self.probabilities,
        })
    }

    fn model_version(&self) -> &str {
        "fixed-v1"
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
enum ModelError {
    #[error("image rejected: {0}")]
    Rejected(String),
}

/// Predictor double: always fails
struct FailingPredictor;

#[async_trait]
impl Predictor for FailingPredictor {
    type Error = ModelError;

    async fn predict(&self, _image: &[u8]) -> Result<Prediction, ModelError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(ModelError::Rejected("corrupt".to_string()))
    }

    fn model_version(&self) -> &str {
        "failing-v1"
    }
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

async fn service() -> TelemetryService {
    let pool = pawscope_common::db::connect(&DatabaseConfig::in_memory()).await.unwrap();
    TelemetryService::start(pool, &TelemetryConfig::default())
}

#[tokio::test]
async fn test_successful_request_records_all_three_rows() {
    let service = service().await;
    let content = jpeg(64, 48);
    let hash = hash_bytes(&content);

    let response = service
        .wrapper()
        .classify(
            &FixedPredictor::cat(40),
            InferenceRequest::new(content).with_filename("cat.jpg"),
        )
        .await
        .unwrap();
    assert_eq!(response.prediction.prediction, "cat");
    assert_eq!(response.prediction.probabilities, Probabilities { cat: 0.82, dog: 0.18 });

    service.flush().await;
    let gateway = service.gateway();

    let image = gateway.get_image_metadata(&hash).await.unwrap().unwrap();
    assert_eq!(image.filename, "cat.jpg");
    assert_eq!(image.ext_type, ".jpg");
    assert_eq!((image.size_w, image.size_h), (64, 48));
    assert_eq!(image.color_mode, "RGB");

    let prediction = gateway.get_prediction(&response.task_id).await.unwrap().unwrap();
    assert_eq!(prediction.image_id, hash);
    assert!(prediction.success);
    assert_eq!(prediction.prob_cat, Some(0.82));
    assert_eq!(prediction.prob_dog, Some(0.18));
    assert_eq!(prediction.model_version, "fixed-v1");
    assert!(
        prediction.inference_time_ms >= 40.0,
        "latency {} below predictor delay",
        prediction.inference_time_ms
    );

    let feedback = gateway.get_feedback(&response.task_id).await.unwrap().unwrap();
    assert_eq!(feedback.grade, 0);
    assert!(!feedback.is_graded());

    // Grade it
    let updated = service.submit_feedback(&response.task_id, 5).await.unwrap();
    assert_eq!(updated.grade, 5);
    assert!(time::parse_db_string(&updated.timestamp).unwrap() > time::parse_db_string(&feedback.timestamp).unwrap());
    assert_eq!(gateway.count_feedback().await.unwrap(), 1);
    assert_eq!(gateway.count_predictions().await.unwrap(), 1);

    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.failed_writes, 0);
    assert_eq!(stats.ignored_writes, 0);
}

#[tokio::test]
async fn test_failed_prediction_is_recorded_and_error_passes_through() {
    let service = service().await;

    let result = service
        .wrapper()
        .classify(&FailingPredictor, InferenceRequest::new(jpeg(8, 8)).with_filename("x.jpg"))
        .await;
    assert_eq!(result.unwrap_err(), ModelError::Rejected("corrupt".to_string()));

    service.flush().await;
    let gateway = service.gateway();
    assert_eq!(gateway.count_predictions().await.unwrap(), 1);

    let rows: Vec<(String, bool, Option<f64>, Option<f64>, f64)> = sqlx::query_as(
        "SELECT uuid, success, prob_cat, prob_dog, inference_time_ms FROM prediction_log",
    )
    .fetch_all(gateway.pool())
    .await
    .unwrap();
    let (_, success, prob_cat, prob_dog, latency) = &rows[0];
    assert!(!success);
    assert_eq!(*prob_cat, None);
    assert_eq!(*prob_dog, None);
    assert!(*latency > 0.0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_request_still_emits_telemetry() {
    let service = service().await;
    let wrapper = service.wrapper();
    let slow = FixedPredictor::cat(10_000);

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        wrapper.classify(&slow, InferenceRequest::new(jpeg(16, 16))),
    )
    .await;
    assert!(outcome.is_err(), "request should have been cut off");

    service.flush().await;
    let gateway = service.gateway();
    assert_eq!(gateway.count_predictions().await.unwrap(), 1);
    assert_eq!(gateway.count_feedback().await.unwrap(), 1);

    let (success, latency): (bool, f64) =
        sqlx::query_as("SELECT success, inference_time_ms FROM prediction_log")
            .fetch_one(gateway.pool())
            .await
            .unwrap();
    assert!(!success);
    assert!(latency > 0.0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identical_uploads_share_one_image_row() {
    let service = service().await;
    let wrapper = service.wrapper();
    let predictor = FixedPredictor::cat(1);
    let content = jpeg(32, 32);

    let first = wrapper
        .classify(&predictor, InferenceRequest::new(content.clone()).with_filename("a.jpg"))
        .await
        .unwrap();
    let second = wrapper
        .classify(&predictor, InferenceRequest::new(content.clone()).with_filename("b.jpg"))
        .await
        .unwrap();
    assert_ne!(first.task_id, second.task_id);

    service.flush().await;
    let gateway = service.gateway();
    assert_eq!(gateway.count_images().await.unwrap(), 1);
    assert_eq!(gateway.count_predictions().await.unwrap(), 2);
    assert_eq!(gateway.count_feedback().await.unwrap(), 2);

    // First write wins
    let image = gateway.get_image_metadata(&hash_bytes(&content)).await.unwrap().unwrap();
    assert_eq!(image.filename, "a.jpg");

    service.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_each_get_their_own_rows() {
    let service = service().await;
    let predictor = Arc::new(FixedPredictor::cat(5));

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let wrapper = service.wrapper();
        let predictor = Arc::clone(&predictor);
        handles.push(tokio::spawn(async move {
            wrapper
                .classify(predictor.as_ref(), InferenceRequest::new(jpeg(8 + i, 8)))
                .await
                .unwrap()
                .task_id
        }));
    }

    let mut task_ids = Vec::new();
    for handle in handles {
        task_ids.push(handle.await.unwrap());
    }
    task_ids.sort();
    task_ids.dedup();
    assert_eq!(task_ids.len(), 16);

    service.flush().await;
    let gateway = service.gateway();
    assert_eq!(gateway.count_images().await.unwrap(), 16);
    assert_eq!(gateway.count_predictions().await.unwrap(), 16);
    assert_eq!(gateway.count_feedback().await.unwrap(), 16);

    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.records, 16);
}

#[tokio::test]
async fn test_storage_failure_does_not_reach_caller() {
    let service = service().await;
    pawscope_common::db::drop_tables(service.gateway().pool()).await.unwrap();

    let response = service
        .wrapper()
        .classify(&FixedPredictor::cat(1), InferenceRequest::new(jpeg(4, 4)))
        .await
        .unwrap();
    assert_eq!(response.prediction.prediction, "cat");

    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.failed_writes, 3);
}

#[tokio::test]
async fn test_undecodable_upload_is_still_recorded() {
    let service = service().await;
    let content = b"definitely not an image".to_vec();

    service
        .wrapper()
        .classify(&FixedPredictor::cat(1), InferenceRequest::new(content.clone()).with_filename("notes.txt"))
        .await
        .unwrap();

    service.flush().await;
    let image = service
        .gateway()
        .get_image_metadata(&hash_bytes(&content))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(image.ext_type, ".txt");
    assert_eq!((image.size_w, image.size_h), (0, 0));
    assert_eq!(image.file_size, content.len() as i64);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_feedback_for_unknown_task_is_not_found() {
    let service = service().await;

    let err = service.submit_feedback("no-such-task", 3).await.unwrap_err();
    match err {
        Error::NotFound(msg) => assert!(msg.contains("no-such-task")),
        other => panic!("expected NotFound, got {:?}", other),
    }

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_instrument_with_closure_handler() {
    let service = service().await;

    let response = service
        .wrapper()
        .instrument(InferenceRequest::new(jpeg(10, 10)), |bytes| async move {
            assert!(!bytes.is_empty());
            Ok::<_, ModelError>(Prediction {
                prediction: "dog".to_string(),
                confidence: 0.9,
                probabilities: Probabilities { cat: 0.1, dog: 0.9 },
            })
        })
        .await
        .unwrap();

    service.flush().await;
    let prediction = service.gateway().get_prediction(&response.task_id).await.unwrap().unwrap();
    assert_eq!(prediction.prob_dog, Some(0.9));
    assert_eq!(prediction.model_version, TelemetryConfig::default().model_version);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_records_survive_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pawscope_common::config::PawscopeConfig::default();
    config.database.path = dir.path().join("telemetry.db");

    let service = TelemetryService::connect(&config).await.unwrap();
    let response = service
        .wrapper()
        .classify(&FixedPredictor::cat(1), InferenceRequest::new(jpeg(12, 12)).with_filename("c.jpg"))
        .await
        .unwrap();
    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.records, 1);

    let reopened = TelemetryService::connect(&config).await.unwrap();
    let prediction = reopened.gateway().get_prediction(&response.task_id).await.unwrap();
    assert!(prediction.is_some());
    reopened.submit_feedback(&response.task_id, 4).await.unwrap();
    reopened.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_grading_while_telemetry_writes_in_flight_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pawscope_common::config::PawscopeConfig::default();
    config.database.path = dir.path().join("telemetry.db");

    let service = TelemetryService::connect(&config).await.unwrap();
    let graded = service
        .wrapper()
        .classify(&FixedPredictor::cat(1), InferenceRequest::new(jpeg(6, 6)))
        .await
        .unwrap();
    service.flush().await;

    let predictor = Arc::new(FixedPredictor::cat(0));
    let mut requests = Vec::new();
    for i in 0..40u32 {
        let wrapper = service.wrapper();
        let predictor = Arc::clone(&predictor);
        requests.push(tokio::spawn(async move {
            wrapper
                .classify(predictor.as_ref(), InferenceRequest::new(jpeg(10 + i, 10)))
                .await
                .unwrap();
        }));
    }

    for i in 0..100i64 {
        let feedback = service
            .submit_feedback(&graded.task_id, i % 5 + 1)
            .await
            .unwrap_or_else(|e| panic!("grade {} failed: {}", i, e));
        assert_eq!(feedback.grade, i % 5 + 1);
    }

    for request in requests {
        request.await.unwrap();
    }
    service.flush().await;
    assert_eq!(service.gateway().count_predictions().await.unwrap(), 41);
    assert_eq!(service.gateway().count_feedback().await.unwrap(), 41);

    let stats = service.shutdown().await.unwrap();
    assert_eq!(stats.failed_writes, 0);
}
