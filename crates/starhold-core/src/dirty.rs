// ABOUTME: Dirty-set tracking of ids upserted or deleted since the last successful sync.
// ABOUTME: Snapshots carry sequence marks so only unchanged ids are acknowledged after a flush.

use std::collections::HashMap;

use parking_lot::Mutex;

/// An id captured by a snapshot, with the sequence number of the change
/// that made it dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyMark {
    pub id: String,
    seq: u64,
}

/// Point-in-time copy of both dirty sets. The two lists are disjoint.
#[derive(Debug, Clone, Default)]
pub struct DirtySnapshot {
    pub upserts: Vec<DirtyMark>,
    pub deletes: Vec<DirtyMark>,
}

impl DirtySnapshot {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Default)]
struct DirtySets {
    upsert: HashMap<String, u64>,
    delete: HashMap<String, u64>,
    next_seq: u64,
}

impl DirtySets {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Pending-upsert and pending-delete sets for one entity kind. An id is in
/// at most one of the two sets.
#[derive(Default)]
pub struct DirtyTracker {
    inner: Mutex<DirtySets>,
}

impl DirtyTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DirtySets {
                upsert: HashMap::with_capacity(capacity),
                delete: HashMap::with_capacity(capacity),
                next_seq: 0,
            }),
        }
    }

    pub fn mark_upsert(&self, id: &str) {
        let mut sets = self.inner.lock();
        let seq = sets.bump();
        sets.delete.remove(id);
        sets.upsert.insert(id.to_string(), seq);
    }

    pub fn mark_delete(&self, id: &str) {
        let mut sets = self.inner.lock();
        let seq = sets.bump();
        sets.upsert.remove(id);
        sets.delete.insert(id.to_string(), seq);
    }

    /// Copy both sets. Changes made after this call belong to the next cycle.
    pub fn snapshot(&self) -> DirtySnapshot {
        let sets = self.inner.lock();
        let collect = |map: &HashMap<String, u64>| {
            let mut marks: Vec<DirtyMark> = map
                .iter()
                .map(|(id, seq)| DirtyMark {
                    id: id.clone(),
                    seq: *seq,
                })
                .collect();
            marks.sort_by_key(|m| m.seq);
            marks
        };
        DirtySnapshot {
            upserts: collect(&sets.upsert),
            deletes: collect(&sets.delete),
        }
    }

    /// Clear upserts that were flushed, unless re-marked since the snapshot.
    /// Returns how many were cleared.
    pub fn ack_upserts(&self, marks: &[DirtyMark]) -> usize {
        let mut sets = self.inner.lock();
        ack(&mut sets.upsert, marks)
    }

    /// Clear deletes that were flushed, unless re-marked since the snapshot.
    pub fn ack_deletes(&self, marks: &[DirtyMark]) -> usize {
        let mut sets = self.inner.lock();
        ack(&mut sets.delete, marks)
    }

    pub fn clear(&self) {
        let mut sets = self.inner.lock();
        sets.upsert.clear();
        sets.delete.clear();
    }

    pub fn is_upsert_pending(&self, id: &str) -> bool {
        self.inner.lock().upsert.contains_key(id)
    }

    pub fn is_delete_pending(&self, id: &str) -> bool {
        self.inner.lock().delete.contains_key(id)
    }

    /// Sizes of the pending-upsert and pending-delete sets.
    pub fn counts(&self) -> (usize, usize) {
        let sets = self.inner.lock();
        (sets.upsert.len(), sets.delete.len())
    }
}

fn ack(map: &mut HashMap<String, u64>, marks: &[DirtyMark]) -> usize {
    let mut cleared = 0;
    for mark in marks {
        if map.get(&mark.id) == Some(&mark.seq) {
            map.remove(&mark.id);
            cleared += 1;
        }
    }
    cleared
}
