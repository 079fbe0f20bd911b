// ABOUTME: End-to-end smoke test for the starhold store lifecycle against a real SQLite file.
// ABOUTME: Covers index queries through add/delete, dirty tracking, sync, and reload into a fresh world.

use std::sync::Arc;

use serde_json::json;
use starhold_core::{IndexHit, PendingCounts, SchemaRegistry};
use starhold_store::{SqliteStore, World};

const WIDGETS: &str = r#"
entities:
  - name: widgets
    table: widgets
    columns:
      - { name: id, type: int, default: next_auto_id, persist: {} }
      - { name: name, type: { string: 32 }, default: empty_string, persist: {} }
      - { name: owner, type: int, default: zero, persist: {} }
    indexes:
      - { name: name_idx, columns: [name], unique: true }
      - { name: owner_idx, columns: [owner] }
"#;

fn ids(hit: Option<IndexHit>) -> Vec<i64> {
    hit.map(|h| h.rows().into_iter().filter_map(|r| r.get_int("id")).collect())
        .unwrap_or_default()
}

#[test]
fn smoke_test_full_lifecycle() {
    // 1. Bootstrap a world on an empty database
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("world.db");
    let registry = SchemaRegistry::from_yaml_str(WIDGETS).unwrap();
    let world = World::bootstrap(&registry, Arc::new(SqliteStore::open(&db).unwrap()), 2).unwrap();
    let widgets = world.table("widgets").unwrap();

    // 2. Add two widgets sharing an owner
    widgets.add(&json!({"id": 1, "name": "Alpha", "owner": 5})).unwrap();
    widgets.add(&json!({"id": 2, "name": "Beta", "owner": 5})).unwrap();

    assert_eq!(ids(widgets.find_by_index("owner_idx", &[5.into()])), vec![1, 2]);
    let alpha = widgets
        .find_by_index("name_idx", &["Alpha".into()])
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(alpha.get_int("id"), Some(1));

    // 3. Delete one and check both indexes forget it
    assert!(widgets.delete(&json!({"id": 1})));
    assert_eq!(ids(widgets.find_by_index("owner_idx", &[5.into()])), vec![2]);
    assert!(widgets.find_by_index("name_idx", &["Alpha".into()]).is_none());
    assert_eq!(
        widgets.pending(),
        PendingCounts {
            upserts: 1,
            deletes: 1
        }
    );

    // 4. Move Beta to another owner and add one with an auto id
    widgets.update(&json!({"id": 2, "owner": 9})).unwrap();
    assert!(widgets.find_by_index("owner_idx", &[5.into()]).is_none());
    let gamma = widgets.add(&json!({"name": "Gamma"})).unwrap();
    assert_eq!(gamma.get_int("id"), Some(3));
    assert_eq!(gamma.get_int("owner"), Some(0));

    // 5. Sync: batch size 2 forces the upserts across calls
    let report = world.sync();
    assert_eq!(report.upserted, 2);
    assert_eq!(report.deleted, 1);
    assert!(report.is_clean());
    assert_eq!(widgets.pending(), PendingCounts::default());
    drop(world);

    // 6. A fresh world sees exactly the synced state
    let world = World::bootstrap(&registry, Arc::new(SqliteStore::open(&db).unwrap()), 2).unwrap();
    let widgets = world.table("widgets").unwrap();
    assert_eq!(widgets.count(), 2);
    assert!(widgets.find_by_id(1).is_none());
    assert_eq!(ids(widgets.find_by_index("owner_idx", &[9.into()])), vec![2]);
    assert_eq!(
        widgets
            .find_by_index("name_idx", &["gamma".into()])
            .unwrap()
            .one()
            .unwrap()
            .get_int("id"),
        Some(3)
    );
    assert_eq!(widgets.pending(), PendingCounts::default());

    // 7. Auto ids continue past the loaded maximum
    let next = widgets.add(&json!({"name": "Delta"})).unwrap();
    assert_eq!(next.get_int("id"), Some(4));
}
