//! Telemetry service lifecycle
//!
//! Built once at process start and passed by reference to request handlers;
//! [`TelemetryService::shutdown`] stops intake and writes out whatever is
//! still queued.

use crate::db::PersistenceGateway;
use crate::instrumentation::{InstrumentationWrapper, TelemetrySink, TelemetryWriter, WriterStats};
use pawscope_common::config::{PawscopeConfig, TelemetryConfig};
use pawscope_common::db::Feedback;
use pawscope_common::{Error, Result};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the gateway, the background writer and the wrapper handed to handlers
pub struct TelemetryService {
    gateway: PersistenceGateway,
    wrapper: InstrumentationWrapper,
    sink: TelemetrySink,
    cancel: CancellationToken,
    worker: JoinHandle<WriterStats>,
}

impl TelemetryService {
    /// Start the writer on an existing pool. Must be called inside a Tokio runtime.
    pub fn start(pool: SqlitePool, config: &TelemetryConfig) -> Self {
        let gateway = PersistenceGateway::new(pool);
        let cancel = CancellationToken::new();
        let (sink, worker) = TelemetryWriter::spawn(gateway.clone(), config, cancel.clone());
        let wrapper = InstrumentationWrapper::new(sink.clone(), &config.model_version);

        info!(
            model_version = %config.model_version,
            queue_capacity = config.queue_capacity,
            "Telemetry service started"
        );

        Self {
            gateway,
            wrapper,
            sink,
            cancel,
            worker,
        }
    }

    /// Open the configured database and start the service
    pub async fn connect(config: &PawscopeConfig) -> Result<Self> {
        config.validate()?;
        let pool = pawscope_common::db::connect(&config.database).await?;
        Ok(Self::start(pool, &config.telemetry))
    }

    /// Wrapper for request handlers (cheap to clone)
    pub fn wrapper(&self) -> InstrumentationWrapper {
        self.wrapper.clone()
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Record a user's grade for a previous request.
    ///
    /// Unlike telemetry writes, absence is surfaced: unknown task ids fail
    /// with [`Error::NotFound`].
    pub async fn submit_feedback(&self, task_id: &str, grade: i64) -> Result<Feedback> {
        self.gateway.update_feedback(task_id, grade).await
    }

    /// Wait until every record queued so far has been persisted (or dropped)
    pub async fn flush(&self) {
        self.sink.flush().await;
    }

    /// Stop accepting records, drain the queue and join the writer
    pub async fn shutdown(self) -> Result<WriterStats> {
        self.cancel.cancel();
        let stats = self
            .worker
            .await
            .map_err(|e| Error::Internal(format!("Telemetry writer task failed: {}", e)))?;
        info!("Telemetry service shut down");
        Ok(stats)
    }
}
