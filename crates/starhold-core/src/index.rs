// ABOUTME: Secondary indexes over composite column values, unique or multi-valued.
// ABOUTME: Maps a normalized composite key to one id or a growable set of ids per entity kind.

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::codec::Row;
use crate::row_store::{CapacityError, RowStore};
use crate::schema::{IndexDef, KeyOrder};
use crate::value::Value;

/// Separates composite key components. Not expected inside column values.
const KEY_SEPARATOR: char = '\u{1f}';

/// Result of an index lookup, already resolved to rows.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexHit {
    One(Row),
    Many(Vec<Row>),
}

impl IndexHit {
    /// All matched rows.
    pub fn rows(self) -> Vec<Row> {
        match self {
            IndexHit::One(row) => vec![row],
            IndexHit::Many(rows) => rows,
        }
    }

    /// The single matched row of a unique lookup, or the first of a multi lookup.
    pub fn one(self) -> Option<Row> {
        match self {
            IndexHit::One(row) => Some(row),
            IndexHit::Many(rows) => rows.into_iter().next(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexHit::One(_) => 1,
            IndexHit::Many(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Postings {
    Unique(DashMap<String, String>),
    Multi(DashMap<String, BTreeSet<String>>),
}

/// One secondary index and its key table.
pub struct SecondaryIndex {
    def: IndexDef,
    table: String,
    capacity: usize,
    postings: Postings,
}

impl SecondaryIndex {
    pub fn new(entity: &str, def: IndexDef, capacity: usize) -> Self {
        let postings = if def.unique {
            Postings::Unique(DashMap::with_capacity(capacity))
        } else {
            Postings::Multi(DashMap::with_capacity(capacity))
        };
        Self {
            table: format!("{}.{}", entity, def.name),
            def,
            capacity,
            postings,
        }
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Build the lookup key for the given component values.
    ///
    /// Components are trimmed and lower-cased for case-insensitive lookup.
    /// Returns `None` when every component is empty, meaning "not indexed".
    pub fn build_key(&self, values: &[Value]) -> Option<String> {
        let mut parts: Vec<String> = values
            .iter()
            .map(|v| v.to_string().trim().to_lowercase())
            .collect();
        if parts.iter().all(|p| p.is_empty()) {
            return None;
        }
        if self.def.key_order == KeyOrder::Sorted {
            parts.sort();
        }
        Some(parts.join(&KEY_SEPARATOR.to_string()))
    }

    /// The component values this index reads from a row. Missing columns
    /// contribute an empty component.
    pub fn values_of(&self, row: &Row) -> Vec<Value> {
        self.def
            .columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or_else(|| Value::Text(String::new())))
            .collect()
    }

    /// Record `id` under the key for `values`. Unique indexes overwrite any
    /// previous id under that key.
    pub fn add(&self, values: &[Value], id: &str) -> Result<(), CapacityError> {
        let Some(key) = self.build_key(values) else {
            return Ok(());
        };
        match &self.postings {
            Postings::Unique(map) => {
                if let Some(mut existing) = map.get_mut(&key) {
                    if existing.value() != id {
                        tracing::debug!(
                            "unique index {} key {:?} moved from {} to {}",
                            self.table,
                            key,
                            existing.value(),
                            id
                        );
                    }
                    *existing.value_mut() = id.to_string();
                    return Ok(());
                }
                self.check_capacity(map.len())?;
                map.insert(key, id.to_string());
            }
            Postings::Multi(map) => {
                if let Some(mut ids) = map.get_mut(&key) {
                    ids.value_mut().insert(id.to_string());
                    return Ok(());
                }
                self.check_capacity(map.len())?;
                map.entry(key).or_default().insert(id.to_string());
            }
        }
        Ok(())
    }

    /// Remove the entry for `values`. With an id, a unique key is only
    /// removed while it still points at that id; a multi key loses just that
    /// id and disappears once empty.
    pub fn remove(&self, values: &[Value], id: Option<&str>) {
        let Some(key) = self.build_key(values) else {
            return;
        };
        match &self.postings {
            Postings::Unique(map) => match id {
                Some(id) => {
                    map.remove_if(&key, |_, current| current == id);
                }
                None => {
                    map.remove(&key);
                }
            },
            Postings::Multi(map) => match id {
                Some(id) => {
                    if let Some(mut ids) = map.get_mut(&key) {
                        ids.value_mut().remove(id);
                    }
                    map.remove_if(&key, |_, ids| ids.is_empty());
                }
                None => {
                    map.remove(&key);
                }
            },
        }
    }

    /// Move `id` from the key for `old` to the key for `new`. A unique key
    /// is always rewritten so the latest writer owns it, even when the key
    /// itself did not change.
    pub fn update(&self, old: &[Value], new: &[Value], id: &str) -> Result<(), CapacityError> {
        if !self.def.unique && self.build_key(old) == self.build_key(new) {
            return Ok(());
        }
        self.remove(old, Some(id));
        self.add(new, id)
    }

    /// Ids stored under the key for `values`, sorted.
    pub fn lookup(&self, values: &[Value]) -> Vec<String> {
        let Some(key) = self.build_key(values) else {
            return Vec::new();
        };
        match &self.postings {
            Postings::Unique(map) => map.get(&key).map(|id| vec![id.clone()]).unwrap_or_default(),
            Postings::Multi(map) => map
                .get(&key)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        match &self.postings {
            Postings::Unique(map) => map.len(),
            Postings::Multi(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_capacity(&self, len: usize) -> Result<(), CapacityError> {
        if len >= self.capacity {
            return Err(CapacityError {
                table: self.table.clone(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// All secondary indexes of one entity kind.
pub struct IndexManager {
    entity: String,
    indexes: Vec<SecondaryIndex>,
}

impl IndexManager {
    pub fn new(entity: &str, defs: &[IndexDef], capacity: usize) -> Self {
        Self {
            entity: entity.to_string(),
            indexes: defs
                .iter()
                .map(|d| SecondaryIndex::new(entity, d.clone(), capacity))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.iter().find(|i| i.def.name == name)
    }

    fn named(&self, name: &str) -> Option<&SecondaryIndex> {
        let index = self.get(name);
        if index.is_none() {
            tracing::warn!("{}: no index named {}", self.entity, name);
        }
        index
    }

    pub fn add(&self, name: &str, values: &[Value], id: &str) -> Result<(), CapacityError> {
        match self.named(name) {
            Some(index) => index.add(values, id),
            None => Ok(()),
        }
    }

    pub fn remove(&self, name: &str, values: &[Value], id: Option<&str>) {
        if let Some(index) = self.named(name) {
            index.remove(values, id);
        }
    }

    pub fn update(
        &self,
        name: &str,
        old: &[Value],
        new: &[Value],
        id: &str,
    ) -> Result<(), CapacityError> {
        match self.named(name) {
            Some(index) => index.update(old, new, id),
            None => Ok(()),
        }
    }

    /// Look up `values` in the named index and resolve ids to rows. Ids that
    /// no longer resolve, or whose row no longer carries the looked-up key,
    /// are skipped. Returns `None` for no match.
    pub fn find(&self, name: &str, values: &[Value], rows: &RowStore) -> Option<IndexHit> {
        let index = self.named(name)?;
        if values.len() != index.def.columns.len() {
            tracing::warn!(
                "{}: index {} takes {} values, got {}",
                self.entity,
                name,
                index.def.columns.len(),
                values.len()
            );
            return None;
        }

        let key = index.build_key(values);
        let found: Vec<Row> = index
            .lookup(values)
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|row| index.build_key(&index.values_of(row)) == key)
            .collect();

        if index.def.unique {
            found.into_iter().next().map(IndexHit::One)
        } else if found.is_empty() {
            None
        } else {
            Some(IndexHit::Many(found))
        }
    }

    /// Add a row to every index.
    pub fn index_row(&self, row: &Row, id: &str) -> Result<(), CapacityError> {
        for index in &self.indexes {
            index.add(&index.values_of(row), id)?;
        }
        Ok(())
    }

    /// Remove a row from every index.
    pub fn unindex_row(&self, row: &Row, id: &str) {
        for index in &self.indexes {
            index.remove(&index.values_of(row), Some(id));
        }
    }

    /// Move a row's entries from its old values to its new values.
    pub fn reindex_row(&self, old: &Row, new: &Row, id: &str) -> Result<(), CapacityError> {
        for index in &self.indexes {
            index.update(&index.values_of(old), &index.values_of(new), id)?;
        }
        Ok(())
    }
}
