// ABOUTME: Shared fixtures for store tests: the widgets schema and a backing store that can fail on demand.
// ABOUTME: Compiled only for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::{Map as JsonMap, Value as JsonValue};
use starhold_core::{ColumnDef, ColumnType, DefaultDirective, EntitySchema, IndexDef, Row};

use crate::backend::{BackendError, BackingStore};
use crate::sqlite::SqliteStore;

pub fn widgets_schema() -> EntitySchema {
    EntitySchema::new(
        "widgets",
        vec![
            ColumnDef::new("id", ColumnType::Int)
                .with_default(DefaultDirective::NextAutoId)
                .persisted(),
            ColumnDef::new("name", ColumnType::String(32))
                .with_default(DefaultDirective::EmptyString)
                .persisted(),
            ColumnDef::new("owner", ColumnType::Int)
                .with_default(DefaultDirective::Zero)
                .persisted(),
            ColumnDef::new("scratch", ColumnType::Int).with_default(DefaultDirective::Zero),
        ],
    )
    .with_table("widgets")
    .with_capacity(1024)
    .with_index(IndexDef::unique("name_idx", &["name"]))
    .with_index(IndexDef::multi("owner_idx", &["owner"]))
}

pub fn widget_row(id: i64, name: &str, owner: i64) -> Row {
    let mut row = Row::new();
    row.set("id", id);
    row.set("name", name);
    row.set("owner", owner);
    row
}

/// SQLite-backed store that rejects writes while a failure flag is set and
/// counts the batch calls it receives.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_upserts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub upsert_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_upserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            upsert_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> (usize, usize) {
        (
            self.upsert_calls.load(Ordering::SeqCst),
            self.delete_calls.load(Ordering::SeqCst),
        )
    }
}

impl BackingStore for FlakyStore {
    fn reconcile(&self, schema: &EntitySchema) -> Result<(), BackendError> {
        self.inner.reconcile(schema)
    }

    fn load_all(&self, schema: &EntitySchema) -> Result<Vec<JsonMap<String, JsonValue>>, BackendError> {
        self.inner.load_all(schema)
    }

    fn upsert_batch(&self, schema: &EntitySchema, rows: &[Row]) -> Result<(), BackendError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("upserts disabled".to_string()));
        }
        self.inner.upsert_batch(schema, rows)
    }

    fn delete_batch(&self, schema: &EntitySchema, ids: &[String]) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("deletes disabled".to_string()));
        }
        self.inner.delete_batch(schema, ids)
    }
}
