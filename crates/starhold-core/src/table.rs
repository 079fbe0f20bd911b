// ABOUTME: Entity table: the uniform CRUD and index-lookup contract consumed by game logic.
// ABOUTME: Composes the row codec, row store, secondary indexes, and dirty tracker for one kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::codec::{Row, RowCodec};
use crate::dirty::DirtyTracker;
use crate::index::{IndexHit, IndexManager};
use crate::row_store::{CapacityError, RowStore};
use crate::schema::EntitySchema;
use crate::value::Value;

/// Sizes of the dirty sets, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingCounts {
    pub upserts: usize,
    pub deletes: usize,
}

/// All in-memory state for one entity kind.
///
/// Hot-path operations never fail for expected conditions such as a missing
/// id or a missing row: they log a warning and report what happened through
/// their return value. A row update and its index maintenance are separate
/// steps, so a concurrent reader may briefly see one without the other.
pub struct EntityTable {
    schema: Arc<EntitySchema>,
    codec: RowCodec,
    rows: RowStore,
    indexes: IndexManager,
    dirty: DirtyTracker,
}

impl EntityTable {
    /// Allocate the row store, index tables, and dirty sets at the schema's
    /// capacity. The schema is assumed to have been validated.
    pub fn new(schema: EntitySchema) -> Self {
        let schema = Arc::new(schema);
        Self {
            codec: RowCodec::new(Arc::clone(&schema)),
            rows: RowStore::with_capacity(&schema.name, schema.capacity),
            indexes: IndexManager::new(&schema.name, &schema.indexes, schema.capacity),
            dirty: DirtyTracker::with_capacity(schema.capacity),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn codec(&self) -> &RowCodec {
        &self.codec
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    /// Fetch a row by id. For kinds declared with `read_creates`, a missing
    /// id gets a default row inserted and returned.
    pub fn find_by_id(&self, id: impl Into<Value>) -> Option<Row> {
        let id = id.into();
        let key = id.to_string();
        if let Some(row) = self.rows.get(&key) {
            return Some(row);
        }
        if !self.schema.read_creates {
            return None;
        }
        tracing::debug!("{}: creating default row for {}", self.name(), key);
        self.store(self.codec.default_row(&id))
    }

    /// Fetch a row by id without any side effects.
    pub fn get(&self, id: &str) -> Option<Row> {
        self.rows.get(id)
    }

    /// Look up rows through a secondary index. A unique index yields at most
    /// one row; a multi-valued index yields every row sharing the key.
    pub fn find_by_index(&self, index: &str, values: &[Value]) -> Option<IndexHit> {
        self.indexes.find(index, values, &self.rows)
    }

    /// Insert a row, filling defaults for omitted columns. An existing row
    /// under the same id is replaced.
    pub fn add(&self, input: &JsonValue) -> Option<Row> {
        let map = self.object(input, "add")?;
        self.store(self.codec.normalize(map, true))
    }

    /// Merge the supplied columns over an existing row.
    pub fn update(&self, input: &JsonValue) -> Option<Row> {
        let map = self.object(input, "update")?;
        let partial = self.codec.normalize(map, false);
        let Some(key) = partial.key() else {
            tracing::warn!("{}: update without id: {}", self.name(), input);
            return None;
        };

        let updated = self.rows.update_with(&key, |row| {
            let before = row.clone();
            row.merge(partial);
            (self.indexes.reindex_row(&before, row, &key), row.clone())
        });
        let Some((reindexed, after)) = updated else {
            tracing::warn!("{}: update on missing row {}", self.name(), key);
            return None;
        };

        if let Err(e) = reindexed {
            tracing::error!("{}: index update for {} dropped: {}", self.name(), key, e);
        }
        self.dirty.mark_upsert(&key);
        Some(after)
    }

    /// Remove a row, its index entries, and schedule the delete for sync.
    /// Returns whether a row was removed.
    pub fn delete(&self, input: &JsonValue) -> bool {
        let Some(map) = self.object(input, "delete") else {
            return false;
        };
        match self.codec.normalize(map, false).key() {
            Some(key) => self.delete_key(&key),
            None => {
                tracing::warn!("{}: delete without id: {}", self.name(), input);
                false
            }
        }
    }

    pub fn delete_by_id(&self, id: impl Into<Value>) -> bool {
        self.delete_key(&id.into().to_string())
    }

    fn delete_key(&self, key: &str) -> bool {
        let removed = self
            .rows
            .delete_with(key, |row| self.indexes.unindex_row(row, key));
        if removed.is_none() {
            tracing::warn!("{}: delete on missing row {}", self.name(), key);
            return false;
        }
        self.dirty.mark_delete(key);
        true
    }

    pub fn count(&self) -> usize {
        self.rows.count()
    }

    /// Copy of every row keyed by id.
    pub fn get_all(&self) -> BTreeMap<String, Row> {
        self.rows.snapshot()
    }

    pub fn pending(&self) -> PendingCounts {
        let (upserts, deletes) = self.dirty.counts();
        PendingCounts { upserts, deletes }
    }

    /// Insert a row read from the backing store without marking it dirty.
    /// Rows lacking an id are skipped; capacity exhaustion is returned.
    pub fn load(&self, input: &JsonMap<String, JsonValue>) -> Result<Option<Row>, CapacityError> {
        let row = self.codec.normalize(input, true);
        let Some(key) = row.key() else {
            tracing::warn!("{}: skipping stored row without id", self.name());
            return Ok(None);
        };
        self.insert(&key, row).map(Some)
    }

    fn object<'a>(&self, input: &'a JsonValue, op: &str) -> Option<&'a JsonMap<String, JsonValue>> {
        let map = input.as_object();
        if map.is_none() {
            tracing::warn!("{}: {} expects an object, got {}", self.name(), op, input);
        }
        map
    }

    fn store(&self, row: Row) -> Option<Row> {
        let Some(key) = row.key() else {
            tracing::warn!("{}: add without id", self.name());
            return None;
        };
        match self.insert(&key, row) {
            Ok(row) => {
                self.dirty.mark_upsert(&key);
                Some(row)
            }
            Err(e) => {
                tracing::error!("{}: dropped write for {}: {}", self.name(), key, e);
                None
            }
        }
    }

    fn insert(&self, key: &str, row: Row) -> Result<Row, CapacityError> {
        if let Some(id) = row.id().and_then(Value::as_i64) {
            self.codec.observe_id(id);
        }
        // Index maintenance runs under the row's key lock
        self.rows.set_with(key, row.clone(), |previous, stored| match previous {
            Some(previous) => self.indexes.reindex_row(previous, stored, key),
            None => self.indexes.index_row(stored, key),
        })??;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, DefaultDirective, IndexDef};
    use serde_json::json;

    fn widgets() -> EntityTable {
        let schema = EntitySchema::new(
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
            ],
        )
        .with_table("widgets")
        .with_index(IndexDef::unique("name_idx", &["name"]))
        .with_index(IndexDef::multi("owner_idx", &["owner"]));
        EntityTable::new(schema)
    }

    fn ids(hit: Option<IndexHit>) -> Vec<i64> {
        hit.map(IndexHit::rows)
            .unwrap_or_default()
            .iter()
            .map(|r| r.get_int("id").unwrap())
            .collect()
    }

    #[test]
    fn widgets_scenario() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "Alpha", "owner": 5})).unwrap();
        table.add(&json!({"id": 2, "name": "Beta", "owner": 5})).unwrap();

        assert_eq!(ids(table.find_by_index("owner_idx", &[5.into()])), vec![1, 2]);
        let alpha = table.find_by_index("name_idx", &["Alpha".into()]).unwrap();
        assert_eq!(alpha.one().unwrap().get_int("id"), Some(1));

        assert!(table.delete(&json!({"id": 1})));
        assert_eq!(ids(table.find_by_index("owner_idx", &[5.into()])), vec![2]);
        assert!(table.find_by_index("name_idx", &["Alpha".into()]).is_none());
    }

    #[test]
    fn rewriting_a_unique_key_makes_the_latest_writer_own_it() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "x"})).unwrap();
        table.add(&json!({"id": 2, "name": "x"})).unwrap();

        table.add(&json!({"id": 1, "name": "x", "owner": 3})).unwrap();
        let hit = table.find_by_index("name_idx", &["x".into()]).unwrap();
        assert_eq!(hit.one().unwrap().get_int("id"), Some(1));

        table.update(&json!({"id": 2, "owner": 4})).unwrap();
        let hit = table.find_by_index("name_idx", &["x".into()]).unwrap();
        assert_eq!(hit.one().unwrap().get_int("id"), Some(2));
    }

    #[test]
    fn concurrent_updates_to_one_row_leave_indexes_consistent() {
        let table = Arc::new(widgets());
        table.add(&json!({"id": 1, "name": "Alpha", "owner": 0})).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        table.update(&json!({"id": 1, "owner": t * 1000 + i})).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let owner = table.find_by_id(1).unwrap().get_int("owner").unwrap();
        assert_eq!(ids(table.find_by_index("owner_idx", &[owner.into()])), vec![1]);
        // Exactly one owner key survives all the moves
        assert_eq!(table.indexes().get("owner_idx").unwrap().len(), 1);
    }

    #[test]
    fn add_fills_defaults_and_find_by_id_returns_it() {
        let table = widgets();
        let row = table.add(&json!({"id": 3, "name": "Gamma"})).unwrap();
        assert_eq!(row.get_int("owner"), Some(0));
        assert_eq!(table.find_by_id(3), Some(row));
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn add_without_id_uses_auto_id_after_explicit_ids() {
        let table = widgets();
        table.add(&json!({"id": 10, "name": "ten"})).unwrap();
        let row = table.add(&json!({"name": "next"})).unwrap();
        assert_eq!(row.get_int("id"), Some(11));
    }

    #[test]
    fn add_with_empty_id_is_a_no_op() {
        let schema = EntitySchema::new(
            "tags",
            vec![ColumnDef::new("id", ColumnType::String(16))],
        );
        let table = EntityTable::new(schema);
        assert!(table.add(&json!({"id": ""})).is_none());
        assert!(table.add(&json!({})).is_none());
        assert!(table.add(&json!("not an object")).is_none());
        assert_eq!(table.count(), 0);
        assert_eq!(table.pending(), PendingCounts::default());
    }

    #[test]
    fn add_over_existing_row_reindexes() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "Alpha", "owner": 5})).unwrap();
        table.add(&json!({"id": 1, "name": "Omega", "owner": 6})).unwrap();

        assert_eq!(table.count(), 1);
        assert!(table.find_by_index("name_idx", &["Alpha".into()]).is_none());
        assert!(table.find_by_index("owner_idx", &[5.into()]).is_none());
        assert_eq!(ids(table.find_by_index("owner_idx", &[6.into()])), vec![1]);
    }

    #[test]
    fn find_by_id_missing_is_none_without_read_creates() {
        let table = widgets();
        assert!(table.find_by_id(42).is_none());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn read_creates_inserts_default_row_once() {
        let schema = widgets().schema().clone().with_read_creates(true);
        let table = EntityTable::new(schema);

        let first = table.find_by_id(42).unwrap();
        assert_eq!(first.get_int("id"), Some(42));
        assert_eq!(first.get_str("name"), Some(""));
        assert!(table.dirty().is_upsert_pending("42"));

        let second = table.find_by_id(42).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn update_merges_and_marks_dirty() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "Alpha", "owner": 5})).unwrap();
        table.dirty().clear();

        let row = table.update(&json!({"id": 1, "owner": 9})).unwrap();
        assert_eq!(row.get_str("name"), Some("Alpha"));
        assert_eq!(row.get_int("owner"), Some(9));
        assert!(table.dirty().is_upsert_pending("1"));
        assert_eq!(ids(table.find_by_index("owner_idx", &[9.into()])), vec![1]);
        assert!(table.find_by_index("owner_idx", &[5.into()]).is_none());
    }

    #[test]
    fn update_on_missing_row_changes_nothing() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "Alpha", "owner": 5})).unwrap();
        table.dirty().clear();
        let before = table.get_all();

        assert!(table.update(&json!({"id": 2, "owner": 5})).is_none());
        assert!(table.update(&json!({"owner": 5})).is_none());

        assert_eq!(table.get_all(), before);
        assert_eq!(ids(table.find_by_index("owner_idx", &[5.into()])), vec![1]);
        assert_eq!(table.pending(), PendingCounts::default());
    }

    #[test]
    fn delete_moves_id_to_pending_delete() {
        let table = widgets();
        table.add(&json!({"id": 1, "name": "Alpha"})).unwrap();
        assert!(table.dirty().is_upsert_pending("1"));

        assert!(table.delete_by_id(1));
        assert!(!table.dirty().is_upsert_pending("1"));
        assert!(table.dirty().is_delete_pending("1"));
        assert_eq!(table.pending(), PendingCounts { upserts: 0, deletes: 1 });

        assert!(!table.delete_by_id(1));
    }

    #[test]
    fn load_does_not_mark_dirty_and_seeds_auto_id() {
        let table = widgets();
        let stored = json!({"id": 17, "name": "Stored", "owner": 2});
        table.load(stored.as_object().unwrap()).unwrap().unwrap();

        assert_eq!(table.pending(), PendingCounts::default());
        assert_eq!(table.codec().auto_id_high_water(), 17);
        assert!(table.find_by_index("name_idx", &["stored".into()]).is_some());
    }

    #[test]
    fn load_reports_capacity_exhaustion() {
        let table = EntityTable::new(widgets().schema().clone().with_capacity(1));
        table.load(json!({"id": 1}).as_object().unwrap()).unwrap();
        assert!(table.load(json!({"id": 2}).as_object().unwrap()).is_err());
    }
}
