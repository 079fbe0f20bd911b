// ABOUTME: Contract between the sync engine and the durable relational store.
// ABOUTME: Covers schema reconciliation, bulk load, batched upsert, and batched delete-by-id.

use serde_json::{Map as JsonMap, Value as JsonValue};
use starhold_core::{EntitySchema, Row};
use thiserror::Error;

/// Errors returned by a backing store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("entity {0} has no backing table")]
    NoTable(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// A durable relational store holding one table per persisted entity kind.
///
/// Rows handed to `upsert_batch` are already projected to the persisted
/// columns. Each batch call must either commit completely or fail.
pub trait BackingStore: Send + Sync {
    /// Create the entity's table or extend it with missing columns and
    /// indexes. Never drops or narrows existing columns.
    fn reconcile(&self, schema: &EntitySchema) -> Result<(), BackendError>;

    /// Read every stored row as a loosely-typed map of persisted columns.
    fn load_all(&self, schema: &EntitySchema) -> Result<Vec<JsonMap<String, JsonValue>>, BackendError>;

    /// Insert rows, overwriting on primary-key conflict.
    fn upsert_batch(&self, schema: &EntitySchema, rows: &[Row]) -> Result<(), BackendError>;

    /// Delete every row whose id is in `ids`.
    fn delete_batch(&self, schema: &EntitySchema, ids: &[String]) -> Result<(), BackendError>;
}

/// The entity's backing table name, or `NoTable` for transient kinds.
pub fn table_name(schema: &EntitySchema) -> Result<&str, BackendError> {
    schema
        .table
        .as_deref()
        .ok_or_else(|| BackendError::NoTable(schema.name.clone()))
}
