//! Usage tracker: buffered, batched usage logging and the maintenance loop.
//!
//! `record` never blocks the request path: entries go through a bounded
//! channel and a full buffer drops the entry (counted, not retried). A writer
//! task flushes batches inside one transaction; a maintenance task sweeps the
//! sliding window and expired sessions/states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::UsageEntry;
use crate::infra::{OauthStateStore, Result, SessionStore};

/// Capacity of the in-memory usage channel.
pub const USAGE_BUFFER_SIZE: usize = 1000;

/// Batch size that forces an immediate flush.
pub const USAGE_FLUSH_BATCH: usize = 100;

/// Periodic flush interval for partially filled batches.
pub const USAGE_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Maintenance sweep interval.
pub const USAGE_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Sliding rate-limit window in seconds; older rows are garbage.
pub const USAGE_RETENTION_SECS: i64 = 60;

pub struct UsageTracker {
    pool: SqlitePool,
    sessions: SessionStore,
    states: OauthStateStore,
    tx: mpsc::Sender<UsageEntry>,
    rx: Mutex<Option<mpsc::Receiver<UsageEntry>>>,
    dropped: AtomicU64,
}

impl UsageTracker {
    pub fn new(pool: SqlitePool, sessions: SessionStore, states: OauthStateStore) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(USAGE_BUFFER_SIZE);
        Arc::new(Self {
            pool,
            sessions,
            states,
            tx,
            rx: Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Records a request for rate limiting. Non-blocking: a full buffer
    /// drops the entry and bumps the drop counter.
    pub fn record(&self, user_id: i64, feature_id: i64) {
        let entry = UsageEntry {
            user_id,
            feature_id,
            timestamp: Utc::now(),
        };
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(user_id, feature_id, "usage buffer full, entry dropped");
        }
    }

    /// Entries dropped because the buffer was full.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Requests counted for `(user, feature)` in the last 60 seconds.
    pub async fn feature_rpm(&self, user_id: i64, feature_id: i64) -> Result<i64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(USAGE_RETENTION_SECS);
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM usage_log WHERE user_id = ? AND feature_id = ? AND timestamp > ?",
        )
        .bind(user_id)
        .bind(feature_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Requests counted for the user across all features in the last 60 s.
    pub async fn user_total_rpm(&self, user_id: i64) -> Result<i64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(USAGE_RETENTION_SECS);
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM usage_log WHERE user_id = ? AND timestamp > ?")
                .bind(user_id)
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Per-feature request counts within the window.
    pub async fn usage_stats(&self, user_id: i64) -> Result<HashMap<i64, i64>> {
        let cutoff = Utc::now() - chrono::Duration::seconds(USAGE_RETENTION_SECS);
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT feature_id, COUNT(*) FROM usage_log
             WHERE user_id = ? AND timestamp > ? GROUP BY feature_id",
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Spawns the writer and maintenance tasks. Both stop when `shutdown`
    /// flips to true; the writer flushes its batch and drains the channel
    /// first, maintenance exits immediately.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let rx = self
            .rx
            .lock()
            .expect("usage tracker receiver lock poisoned")
            .take();
        let Some(rx) = rx else {
            warn!("usage tracker already started");
            return Vec::new();
        };

        let writer = {
            let tracker = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { tracker.writer_loop(rx, shutdown).await })
        };
        let maintenance = {
            let tracker = self.clone();
            tokio::spawn(async move { tracker.maintenance_loop(shutdown).await })
        };

        vec![writer, maintenance]
    }

    async fn writer_loop(
        &self,
        mut rx: mpsc::Receiver<UsageEntry>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(USAGE_FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut batch: Vec<UsageEntry> = Vec::new();

        loop {
            tokio::select! {
                entry = rx.recv() => {
                    match entry {
                        Some(entry) => {
                            batch.push(entry);
                            if batch.len() >= USAGE_FLUSH_BATCH {
                                self.flush(std::mem::take(&mut batch)).await;
                            }
                        }
                        // All senders gone; nothing further can arrive.
                        None => {
                            self.flush(std::mem::take(&mut batch)).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(std::mem::take(&mut batch)).await;
                    }
                }
                _ = shutdown.changed() => {
                    self.flush(std::mem::take(&mut batch)).await;
                    self.drain(&mut rx).await;
                    info!("usage writer stopped");
                    return;
                }
            }
        }
    }

    /// Empties whatever is still buffered in the channel at shutdown.
    async fn drain(&self, rx: &mut mpsc::Receiver<UsageEntry>) {
        let mut batch = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            batch.push(entry);
        }
        self.flush(batch).await;
    }

    /// Writes a batch in one transaction. A failed batch is dropped; rate
    /// limiting tolerates bounded undercounting.
    async fn flush(&self, batch: Vec<UsageEntry>) {
        if batch.is_empty() {
            return;
        }
        let len = batch.len();

        let result: Result<()> = async {
            let mut tx = self.pool.begin().await?;
            for entry in &batch {
                sqlx::query("INSERT INTO usage_log (user_id, feature_id, timestamp) VALUES (?, ?, ?)")
                    .bind(entry.user_id)
                    .bind(entry.feature_id)
                    .bind(entry.timestamp)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => debug!(entries = len, "usage batch flushed"),
            Err(e) => warn!(entries = len, error = %e, "usage batch dropped"),
        }
    }

    async fn maintenance_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(USAGE_CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup().await;
                }
                _ = shutdown.changed() => {
                    info!("maintenance loop stopped");
                    return;
                }
            }
        }
    }

    /// One maintenance pass: expire the usage window, sessions and states.
    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(USAGE_RETENTION_SECS);
        if let Err(e) = sqlx::query("DELETE FROM usage_log WHERE timestamp <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "usage log cleanup failed");
        }

        if let Err(e) = self.sessions.cleanup().await {
            warn!(error = %e, "session cleanup failed");
        }
        if let Err(e) = self.states.cleanup().await {
            warn!(error = %e, "oauth state cleanup failed");
        }
    }
}
