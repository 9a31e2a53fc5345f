//! Background telemetry writer
//!
//! Request handlers hand finished [`TelemetryRecord`]s to a bounded queue
//! without waiting; a single worker task drains it and performs the three
//! persistence attempts per record in order (image, prediction, feedback).
//! One worker means per-task ordering holds without any locking.
//!
//! Every attempt is single-shot and bounded by the configured write timeout.
//! A failure or timeout is logged and the next attempt still runs.

use crate::db::{InsertOutcome, NewImageMetadata, NewPrediction, PersistenceGateway};
use crate::predictor::Probabilities;
use pawscope_common::config::TelemetryConfig;
use pawscope_common::db::UNSET_GRADE;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything persisted for one classification request
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub task_id: String,
    pub image: NewImageMetadata,
    pub latency_ms: f64,
    pub success: bool,
    pub probabilities: Option<Probabilities>,
    pub model_version: String,
}

impl TelemetryRecord {
    /// Record for a request whose predictor call has not completed (yet).
    ///
    /// Starts out as a failure; the wrapper fills in the outcome.
    pub fn pending(task_id: String, image: NewImageMetadata, model_version: &str) -> Self {
        Self {
            task_id,
            image,
            latency_ms: 0.0,
            success: false,
            probabilities: None,
            model_version: model_version.to_string(),
        }
    }

    fn prediction(&self) -> NewPrediction {
        NewPrediction {
            task_id: self.task_id.clone(),
            image_hash: self.image.hash.clone(),
            latency_ms: self.latency_ms,
            success: self.success,
            probabilities: self.probabilities,
            model_version: self.model_version.clone(),
        }
    }
}

enum WriterMessage {
    Record(Box<TelemetryRecord>),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking handle for submitting records to the writer
#[derive(Clone)]
pub struct TelemetrySink {
    tx: mpsc::Sender<WriterMessage>,
}

impl TelemetrySink {
    /// Queue a record without waiting. Returns false if it was dropped
    /// because the queue is full or the writer has stopped.
    pub fn submit(&self, record: TelemetryRecord) -> bool {
        let task_id = record.task_id.clone();
        match self.tx.try_send(WriterMessage::Record(Box::new(record))) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(task_id = %task_id, "Telemetry queue full, record dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(task_id = %task_id, "Telemetry writer stopped, record dropped");
                false
            }
        }
    }

    /// Wait until every record submitted before this call has been processed.
    ///
    /// Returns immediately if the writer has stopped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Counters reported when the writer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records taken off the queue
    pub records: u64,
    /// Inserts dropped by a key or reference conflict
    pub ignored_writes: u64,
    /// Attempts that errored or timed out
    pub failed_writes: u64,
}

/// Drains the telemetry queue into the persistence gateway
pub struct TelemetryWriter {
    gateway: PersistenceGateway,
    write_timeout: Duration,
    stats: WriterStats,
}

impl TelemetryWriter {
    /// Spawn the writer task.
    ///
    /// Cancelling `cancel` stops intake; records already queued are still
    /// written before the task finishes.
    pub fn spawn(
        gateway: PersistenceGateway,
        config: &TelemetryConfig,
        cancel: CancellationToken,
    ) -> (TelemetrySink, JoinHandle<WriterStats>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = Self {
            gateway,
            write_timeout: config.write_timeout(),
            stats: WriterStats::default(),
        };
        let handle = tokio::spawn(writer.run(rx, cancel));
        (TelemetrySink { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WriterMessage>, cancel: CancellationToken) -> WriterStats {
        debug!("Telemetry writer started");

        loop {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    rx.close();
                    while let Some(message) = rx.recv().await {
                        self.handle(message).await;
                    }
                    break;
                }
            }
        }

        info!(
            records = self.stats.records,
            ignored_writes = self.stats.ignored_writes,
            failed_writes = self.stats.failed_writes,
            "Telemetry writer stopped"
        );
        self.stats
    }

    async fn handle(&mut self, message: WriterMessage) {
        match message {
            WriterMessage::Record(record) => {
                self.stats.records += 1;
                self.persist(&record).await;
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    /// Three ordered, independent attempts; none cancels the others
    async fn persist(&mut self, record: &TelemetryRecord) {
        let gateway = self.gateway.clone();

        self.attempt(
            "image_metadata",
            &record.task_id,
            gateway.insert_image_metadata(&record.image),
        )
        .await;

        if let Some(InsertOutcome::Ignored) = self
            .attempt("prediction_log", &record.task_id, gateway.insert_prediction(&record.prediction()))
            .await
        {
            self.stats.ignored_writes += 1;
        }

        // Seeded even when the prediction row was dropped
        if let Some(InsertOutcome::Ignored) = self
            .attempt("feedback", &record.task_id, gateway.insert_feedback(&record.task_id, UNSET_GRADE))
            .await
        {
            self.stats.ignored_writes += 1;
        }

        debug!(
            task_id = %record.task_id,
            success = record.success,
            latency_ms = record.latency_ms,
            "Telemetry record processed"
        );
    }

    async fn attempt<T, F>(&mut self, table: &'static str, task_id: &str, write: F) -> Option<T>
    where
        F: Future<Output = pawscope_common::Result<T>>,
    {
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.stats.failed_writes += 1;
                warn!(table = table, task_id = %task_id, error = %e, "Telemetry write failed");
                None
            }
            Err(_) => {
                self.stats.failed_writes += 1;
                warn!(
                    table = table,
                    task_id = %task_id,
                    timeout_ms = self.write_timeout.as_millis() as u64,
                    "Telemetry write timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawscope_common::config::DatabaseConfig;

    fn record(task_id: &str, hash: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::pending(
            task_id.to_string(),
            NewImageMetadata {
                hash: hash.to_string(),
                filename: "x.png".to_string(),
                ext_type: ".png".to_string(),
                size_w: 1,
                size_h: 1,
                color_mode: "RGB".to_string(),
                file_size: 10,
            },
            "test",
        );
        record.latency_ms = 3.0;
        record.success = true;
        record.probabilities = Some(Probabilities { cat: 0.4, dog: 0.6 });
        record
    }

    async fn gateway() -> PersistenceGateway {
        PersistenceGateway::new(
            pawscope_common::db::connect(&DatabaseConfig::in_memory()).await.unwrap(),
        )
    }

    #[tokio::test]
    async fn test_flush_waits_for_prior_records() {
        let gateway = gateway().await;
        let cancel = CancellationToken::new();
        let (sink, handle) = TelemetryWriter::spawn(gateway.clone(), &TelemetryConfig::default(), cancel.clone());

        assert!(sink.submit(record("t1", "H1")));
        assert!(sink.submit(record("t2", "H1")));
        sink.flush().await;

        assert_eq!(gateway.count_images().await.unwrap(), 1);
        assert_eq!(gateway.count_predictions().await.unwrap(), 2);
        assert_eq!(gateway.count_feedback().await.unwrap(), 2);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.failed_writes, 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let gateway = gateway().await;
        let cancel = CancellationToken::new();
        let (sink, handle) = TelemetryWriter::spawn(gateway.clone(), &TelemetryConfig::default(), cancel.clone());

        for i in 0..20 {
            sink.submit(record(&format!("t{}", i), &format!("H{}", i)));
        }
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.records, 20);
        assert_eq!(gateway.count_predictions().await.unwrap(), 20);
        assert!(!sink.submit(record("late", "H")), "stopped writer accepted a record");
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let gateway = gateway().await;
        let config = TelemetryConfig {
            queue_capacity: 1,
            ..TelemetryConfig::default()
        };
        let cancel = CancellationToken::new();
        let (sink, handle) = TelemetryWriter::spawn(gateway.clone(), &config, cancel.clone());

        // No await in between: the writer cannot drain while we submit
        let accepted = (0..10)
            .map(|i| sink.submit(record(&format!("t{}", i), "H")))
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_counts_ignored_writes() {
        let gateway = gateway().await;
        let cancel = CancellationToken::new();
        let (sink, handle) = TelemetryWriter::spawn(gateway.clone(), &TelemetryConfig::default(), cancel.clone());

        sink.submit(record("t1", "H"));
        sink.submit(record("t1", "H"));
        cancel.cancel();
        let stats = handle.await.unwrap();

        // Second record: prediction and feedback both conflict
        assert_eq!(stats.ignored_writes, 2);
        assert_eq!(gateway.count_predictions().await.unwrap(), 1);
    }
}
