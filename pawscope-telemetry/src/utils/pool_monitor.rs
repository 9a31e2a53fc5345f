//! Connection pool monitoring utilities
//!
//! Every gateway operation runs in its own short-lived transaction opened
//! through [`begin_monitored`], which logs how long the connection took to
//! acquire and how long it was held before commit, rollback or drop.

use pawscope_common::{Error, Result};
use sqlx::{Sqlite, Transaction};
use std::time::Instant;

/// Hold time above which a release is logged at WARN
const LONG_HOLD_MS: u128 = 2000;

/// Hold time above which a release is logged at INFO
const SLOW_HOLD_MS: u128 = 1000;

/// Acquisition wait above which the pool is reported as saturated
const SLOW_ACQUIRE_MS: u128 = 1000;

/// Monitored transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    fn new(tx: Transaction<'c, Sqlite>, caller: &'static str, acquired_at: Instant) -> Self {
        Self {
            tx: Some(tx),
            caller,
            acquired_at,
        }
    }

    fn take(&mut self) -> Result<Transaction<'c, Sqlite>> {
        self.tx
            .take()
            .ok_or_else(|| Error::Internal(format!("{}: transaction already consumed", self.caller)))
    }

    /// Commit the transaction and log release timing
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.commit().await?;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms,
                "LONG TRANSACTION - Connection held for extended period"
            );
        } else if held_ms > SLOW_HOLD_MS {
            tracing::info!(
                caller = self.caller,
                held_ms = held_ms,
                "Transaction held longer than expected (>1s)"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms = held_ms, "Connection released (commit)");
        }

        Ok(())
    }

    /// Rollback the transaction and log release timing
    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.take()?;
        tx.rollback().await?;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms,
                "LONG TRANSACTION - Connection held for extended period before rollback"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms = held_ms, "Connection released (rollback)");
        }

        Ok(())
    }

    /// Get a mutable reference to the inner transaction
    pub fn inner_mut(&mut self) -> Result<&mut Transaction<'c, Sqlite>> {
        let caller = self.caller;
        self.tx
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("{}: transaction already consumed", caller)))
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        // sqlx rolls back an unfinished transaction when it is dropped
        if self.tx.is_some() {
            let held_ms = self.acquired_at.elapsed().as_millis();
            tracing::debug!(
                caller = self.caller,
                held_ms = held_ms,
                "Connection released (drop, rolled back)"
            );
        }
    }
}

/// Begin a monitored transaction with connection pool timing logs
///
/// # Example
/// ```ignore
/// let mut tx = begin_monitored(&pool, "feedback::update").await?;
/// sqlx::query("...").execute(&mut **tx.inner_mut()?).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    begin(pool, caller, None).await
}

/// Begin a monitored transaction holding the write lock from the start.
///
/// Use for read-then-write transactions. Under WAL a deferred transaction
/// whose snapshot went stale cannot upgrade to a writer (SQLITE_BUSY_SNAPSHOT,
/// not retried by the busy timeout).
pub async fn begin_monitored_write<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    begin(pool, caller, Some("BEGIN IMMEDIATE")).await
}

async fn begin<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
    statement: Option<&'static str>,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();

    tracing::trace!(caller = caller, "Connection acquisition requested");

    let tx = match statement {
        Some(statement) => pool.begin_with(statement).await?,
        None => pool.begin().await?,
    };

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(
            caller = caller,
            wait_ms = wait_ms,
            "SLOW CONNECTION ACQUISITION - Pool may be saturated"
        );
    } else {
        tracing::trace!(caller = caller, wait_ms = wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction::new(tx, caller, Instant::now()))
}
