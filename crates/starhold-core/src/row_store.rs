// ABOUTME: Fixed-capacity concurrent key-to-row table backing one entity kind.
// ABOUTME: Single-key get/set/delete are atomic; there are no multi-key transactions.

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::codec::Row;

/// A table reached its configured capacity. Under correct sizing this never
/// happens; at bootstrap it aborts startup.
#[derive(Debug, Clone, Error)]
#[error("{table} is full (capacity {capacity})")]
pub struct CapacityError {
    pub table: String,
    pub capacity: usize,
}

/// Concurrent row table keyed by the string form of each row's id.
pub struct RowStore {
    name: String,
    rows: DashMap<String, Row>,
    capacity: usize,
}

impl RowStore {
    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            rows: DashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get(&self, id: &str) -> Option<Row> {
        self.rows.get(id).map(|r| r.value().clone())
    }

    /// Insert or replace a row, then run `on_write` with the previous row
    /// and the stored one while the key is still locked, so writers to the
    /// same id apply their side effects in the order they wrote. Replacing
    /// never fails; inserting a new key into a full table does.
    pub fn set_with<R>(
        &self,
        id: &str,
        row: Row,
        on_write: impl FnOnce(Option<&Row>, &Row) -> R,
    ) -> Result<R, CapacityError> {
        if let Some(mut existing) = self.rows.get_mut(id) {
            let previous = std::mem::replace(existing.value_mut(), row);
            return Ok(on_write(Some(&previous), existing.value()));
        }
        // len() takes every shard lock, so it must not run under an entry guard
        if self.rows.len() >= self.capacity {
            return Err(CapacityError {
                table: self.name.clone(),
                capacity: self.capacity,
            });
        }
        match self.rows.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(row);
                Ok(on_write(Some(&previous), entry.get()))
            }
            Entry::Vacant(entry) => {
                let stored = entry.insert(row);
                Ok(on_write(None, stored.value()))
            }
        }
    }

    /// Mutate a row in place under its key lock and return whatever `f`
    /// returns. `None` when the key is absent.
    pub fn update_with<R>(&self, id: &str, f: impl FnOnce(&mut Row) -> R) -> Option<R> {
        let mut entry = self.rows.get_mut(id)?;
        Some(f(entry.value_mut()))
    }

    /// Remove a row, running `on_remove` before the key lock is released.
    pub fn delete_with(&self, id: &str, on_remove: impl FnOnce(&Row)) -> Option<Row> {
        self.rows
            .remove_if(id, |_, row| {
                on_remove(row);
                true
            })
            .map(|(_, row)| row)
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Point-in-time copy of every row, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, Row> {
        self.rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
