// ABOUTME: SQLite implementation of the backing store used for write-back persistence.
// ABOUTME: Derives DDL from the schema registry and issues multi-row upserts and IN-list deletes.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map as JsonMap, Value as JsonValue};
use starhold_core::schema::ID_COLUMN;
use starhold_core::{ColumnDef, EntitySchema, Row, Value};

use crate::backend::{BackendError, BackingStore, table_name};

/// Bound parameters allowed in one statement by the bundled SQLite.
/// Larger batches are split across statements in one transaction.
const MAX_BIND_PARAMS: usize = 32_766;

/// A SQLite database holding one table per persisted entity kind.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Column names currently present in a table; empty if the table does not exist.
    #[cfg(test)]
    pub fn table_columns(&self, table: &str) -> Result<HashSet<String>, BackendError> {
        existing_columns(&self.conn.lock(), table)
    }

    /// Names of the indexes defined on a table.
    #[cfg(test)]
    pub fn table_indexes(&self, table: &str) -> Result<HashSet<String>, BackendError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1")?;
        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;

        let mut names = HashSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }
}

fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, BackendError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    Ok(columns)
}

/// Identifiers are validated by the schema registry; quoting guards keywords.
fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn column_ddl(col: &ColumnDef) -> String {
    let mut ddl = format!("{} {}", quote(&col.name), col.sql_type());
    if col.name == ID_COLUMN {
        ddl.push_str(" PRIMARY KEY NOT NULL");
    } else if col.persist.as_ref().is_some_and(|p| p.not_null) {
        ddl.push_str(" NOT NULL");
    }
    ddl
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(Value::Int(v)) => SqlValue::Integer(*v),
        Some(Value::Float(v)) => SqlValue::Real(*v),
        Some(Value::Text(v)) => SqlValue::Text(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Option<JsonValue> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(v) => Some(JsonValue::from(v)),
        ValueRef::Real(v) => Some(JsonValue::from(v)),
        ValueRef::Text(v) => Some(JsonValue::String(String::from_utf8_lossy(v).into_owned())),
    }
}

impl BackingStore for SqliteStore {
    fn reconcile(&self, schema: &EntitySchema) -> Result<(), BackendError> {
        let table = table_name(schema)?;
        let conn = self.conn.lock();
        let existing = existing_columns(&conn, table)?;

        if existing.is_empty() {
            let columns: Vec<String> = schema.persisted_columns().map(column_ddl).collect();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote(table),
                columns.join(", ")
            ))?;
            tracing::info!("created table {} with {} columns", table, columns.len());
        } else {
            for col in schema.persisted_columns() {
                if existing.contains(&col.name) {
                    continue;
                }
                // ALTER TABLE cannot add a NOT NULL column without a default
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote(table),
                    quote(&col.name),
                    col.sql_type()
                ))?;
                tracing::info!("added column {}.{}", table, col.name);
            }
        }

        // Uniqueness is enforced in memory with last-write-wins, so the
        // backing indexes are plain lookup indexes.
        for index in &schema.indexes {
            let persisted = index
                .columns
                .iter()
                .all(|c| schema.column(c).is_some_and(ColumnDef::is_persisted));
            if !persisted {
                tracing::debug!("{}: index {} covers transient columns, not created", table, index.name);
                continue;
            }
            let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{}_{}", table, index.name)),
                quote(table),
                columns.join(", ")
            ))?;
        }

        Ok(())
    }

    fn load_all(&self, schema: &EntitySchema) -> Result<Vec<JsonMap<String, JsonValue>>, BackendError> {
        let table = table_name(schema)?;
        let conn = self.conn.lock();
        let existing = existing_columns(&conn, table)?;
        let columns: Vec<&ColumnDef> = schema
            .persisted_columns()
            .filter(|c| existing.contains(&c.name))
            .collect();
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", names.join(", "), quote(table)))?;
        let rows = stmt.query_map([], |row| {
            let mut map = JsonMap::new();
            for (i, col) in columns.iter().enumerate() {
                if let Some(value) = from_sql(row.get_ref(i)?) {
                    map.insert(col.name.clone(), value);
                }
            }
            Ok(map)
        })?;

        let mut loaded = Vec::new();
        for row in rows {
            loaded.push(row?);
        }
        Ok(loaded)
    }

    fn upsert_batch(&self, schema: &EntitySchema, rows: &[Row]) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        let table = table_name(schema)?;
        let columns: Vec<&ColumnDef> = schema.persisted_columns().collect();
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for part in rows.chunks(rows_per_statement) {
            let params: Vec<SqlValue> = part
                .iter()
                .flat_map(|row| columns.iter().map(move |c| to_sql(row.get(&c.name))))
                .collect();
            tx.execute(&upsert_sql(table, &columns, part.len()), params_from_iter(params))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_batch(&self, schema: &EntitySchema, ids: &[String]) -> Result<(), BackendError> {
        if ids.is_empty() {
            return Ok(());
        }
        let table = table_name(schema)?;
        let id_column = schema
            .id_column()
            .ok_or_else(|| BackendError::Rejected(format!("{} has no id column", schema.name)))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for part in ids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                quote(table),
                quote(ID_COLUMN),
                vec!["?"; part.len()].join(", ")
            );
            let params: Vec<SqlValue> = part
                .iter()
                .map(|id| to_sql(Some(&id_column.kind.coerce(&JsonValue::String(id.clone())))))
                .collect();
            tx.execute(&sql, params_from_iter(params))?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Multi-row upsert for `rows` rows of `columns`, overwriting on id conflict.
fn upsert_sql(table: &str, columns: &[&ColumnDef], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| c.name != ID_COLUMN)
        .map(|c| format!("{0} = excluded.{0}", quote(&c.name)))
        .collect();
    let on_conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) {}",
        quote(table),
        names.join(", "),
        vec![tuple; rows].join(", "),
        quote(ID_COLUMN),
        on_conflict
    )
}
