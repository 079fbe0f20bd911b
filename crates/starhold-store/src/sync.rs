// ABOUTME: Sync engine that drains an entity table's dirty sets into the backing store.
// ABOUTME: Works from a point-in-time snapshot in fixed-size chunks; failed chunks stay dirty for retry.

use std::time::Instant;

use starhold_core::{DirtyMark, EntitySchema, EntityTable, Row};

use crate::backend::BackingStore;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows written by successful upsert chunks.
    pub upserted: usize,
    /// Ids covered by successful delete chunks.
    pub deleted: usize,
    /// Upsert ids whose row had disappeared from the row store.
    pub skipped: usize,
    /// Chunks whose backend call failed; their ids remain dirty.
    pub failed_chunks: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed_chunks == 0
    }

    pub fn absorb(&mut self, other: SyncReport) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed_chunks += other.failed_chunks;
    }
}

/// Keep only the columns that have a persistence mapping.
pub fn project(schema: &EntitySchema, row: &Row) -> Row {
    schema
        .persisted_columns()
        .filter_map(|c| row.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect()
}

/// Flush one entity table's pending changes in chunks of `batch_size`.
///
/// Changes made while the pass runs are left for the next pass. An id is
/// only cleared from its dirty set once the chunk holding it has been
/// written, and only if it was not marked again in the meantime.
pub fn sync_to_database(
    table: &EntityTable,
    backend: &dyn BackingStore,
    batch_size: usize,
) -> SyncReport {
    let mut report = SyncReport::default();
    let snapshot = table.dirty().snapshot();
    if snapshot.is_empty() {
        return report;
    }

    let schema = table.schema();
    if schema.table.is_none() {
        tracing::debug!("{}: transient, dropping dirty marks", table.name());
        table.dirty().ack_upserts(&snapshot.upserts);
        table.dirty().ack_deletes(&snapshot.deletes);
        return report;
    }

    let batch_size = batch_size.max(1);

    for chunk in snapshot.upserts.chunks(batch_size) {
        let started = Instant::now();
        let mut rows = Vec::with_capacity(chunk.len());
        for mark in chunk {
            match table.get(&mark.id) {
                Some(row) => rows.push(project(schema, &row)),
                None => {
                    tracing::warn!("{}: skipping upsert of vanished row {}", table.name(), mark.id);
                    report.skipped += 1;
                }
            }
        }
        if rows.is_empty() {
            table.dirty().ack_upserts(chunk);
            continue;
        }

        match backend.upsert_batch(schema, &rows) {
            Ok(()) => {
                table.dirty().ack_upserts(chunk);
                report.upserted += rows.len();
                tracing::info!(
                    "{}: upserted {} rows in {:?}",
                    table.name(),
                    rows.len(),
                    started.elapsed()
                );
            }
            Err(e) => {
                report.failed_chunks += 1;
                tracing::error!(
                    "{}: upsert chunk of {} rows failed, keeping dirty (ids: {:?}): {}",
                    table.name(),
                    rows.len(),
                    ids(chunk),
                    e
                );
            }
        }
    }

    for chunk in snapshot.deletes.chunks(batch_size) {
        let started = Instant::now();
        let chunk_ids = ids(chunk);
        match backend.delete_batch(schema, &chunk_ids) {
            Ok(()) => {
                table.dirty().ack_deletes(chunk);
                report.deleted += chunk_ids.len();
                tracing::info!(
                    "{}: deleted {} ids in {:?}",
                    table.name(),
                    chunk_ids.len(),
                    started.elapsed()
                );
            }
            Err(e) => {
                report.failed_chunks += 1;
                tracing::error!(
                    "{}: delete chunk failed, keeping dirty (ids: {:?}): {}",
                    table.name(),
                    chunk_ids,
                    e
                );
            }
        }
    }

    report
}

fn ids(chunk: &[DirtyMark]) -> Vec<String> {
    chunk.iter().map(|m| m.id.clone()).collect()
}
