// ABOUTME: Saver aggregator that syncs every registered entity table to the backing store.
// ABOUTME: Runs on demand or as a periodic tokio task that flushes once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use starhold_core::EntityTable;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::BackingStore;
use crate::sync::{SyncReport, sync_to_database};

/// Holds the entity tables of a world and flushes them together.
pub struct Saver {
    backend: Arc<dyn BackingStore>,
    tables: RwLock<Vec<Arc<EntityTable>>>,
    batch_size: usize,
    /// Serializes passes so overlapping calls never flush the same snapshot twice.
    pass: Mutex<()>,
}

impl Saver {
    pub fn new(backend: Arc<dyn BackingStore>, batch_size: usize) -> Self {
        Self {
            backend,
            tables: RwLock::new(Vec::new()),
            batch_size: batch_size.max(1),
            pass: Mutex::new(()),
        }
    }

    pub fn register(&self, table: Arc<EntityTable>) {
        tracing::debug!("saver: registered {}", table.name());
        self.tables.write().push(table);
    }

    pub fn tables(&self) -> Vec<Arc<EntityTable>> {
        self.tables.read().clone()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sync every registered table. Blocks on backing-store I/O; a no-op
    /// when nothing is dirty.
    pub fn sync_all(&self) -> SyncReport {
        let _pass = self.pass.lock();
        let mut report = SyncReport::default();
        for table in self.tables() {
            report.absorb(sync_to_database(&table, self.backend.as_ref(), self.batch_size));
        }
        if !report.is_clean() {
            tracing::warn!(
                "saver: {} chunks failed, their changes stay pending",
                report.failed_chunks
            );
        }
        report
    }

    /// Run `sync_all` on the blocking pool.
    pub async fn flush(self: &Arc<Self>) -> SyncReport {
        let saver = Arc::clone(self);
        match tokio::task::spawn_blocking(move || saver.sync_all()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("saver: sync task failed: {}", e);
                SyncReport::default()
            }
        }
    }

    /// Spawn the periodic sync loop. When `shutdown` turns true (or its
    /// sender is dropped) the loop exits after one final flush.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("saver: shutting down, flushing pending changes");
            let report = self.flush().await;
            tracing::info!(
                "saver: final flush wrote {} rows and {} deletes",
                report.upserted,
                report.deleted
            );
        })
    }
}
