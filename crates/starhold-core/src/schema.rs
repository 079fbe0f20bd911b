// ABOUTME: Schema registry declaring each entity kind's typed columns, defaults, and indexes.
// ABOUTME: Loaded from YAML and validated once at startup; also coerces raw input to column types.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::value::Value;

/// Default Row Store capacity when a schema does not declare one.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Name of the column every entity kind must declare.
pub const ID_COLUMN: &str = "id";

/// Errors raised while loading or validating the schema registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("entity {0} is declared more than once")]
    DuplicateEntity(String),

    #[error("entity {entity}: missing required `id` column")]
    MissingId { entity: String },

    #[error("entity {entity}: duplicate column {column}")]
    DuplicateColumn { entity: String, column: String },

    #[error("entity {entity}: duplicate index {index}")]
    DuplicateIndex { entity: String, index: String },

    #[error("entity {entity}: index {index} has no columns")]
    EmptyIndex { entity: String, index: String },

    #[error("entity {entity}: index {index} references unknown column {column}")]
    UnknownIndexColumn {
        entity: String,
        index: String,
        column: String,
    },

    #[error("entity {entity}: table is persisted but the id column has no persistence mapping")]
    UnpersistedId { entity: String },

    #[error("entity {entity}: column {column} has an empty random range {min}..={max}")]
    InvalidRange {
        entity: String,
        column: String,
        min: i64,
        max: i64,
    },

    #[error("entity {entity}: column {column} is NOT NULL but has no default to fill it")]
    NotNullWithoutDefault { entity: String, column: String },

    #[error("entity {entity}: capacity must be greater than zero")]
    ZeroCapacity { entity: String },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    /// A string bounded to the given number of bytes.
    String(usize),
}

impl ColumnType {
    /// Coerce a loosely-typed input value to this column type. Integers and
    /// floats treat empty or unparseable input as zero; strings use the
    /// value's string form, truncated to the byte bound.
    pub fn coerce(&self, input: &JsonValue) -> Value {
        match self {
            ColumnType::Int => Value::Int(coerce_int(input)),
            ColumnType::Float => Value::Float(coerce_float(input)),
            ColumnType::String(max_len) => {
                let text = match input {
                    JsonValue::Null => String::new(),
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Value::Text(truncate_bytes(text, *max_len))
            }
        }
    }

    /// The SQL type used when a persistence mapping does not override it.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Int => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::String(_) => "TEXT",
        }
    }
}

fn coerce_int(input: &JsonValue) -> i64 {
    match input {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(0)
        }
        JsonValue::Bool(b) => *b as i64,
        _ => 0,
    }
}

fn coerce_float(input: &JsonValue) -> f64 {
    match input {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        JsonValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn truncate_bytes(mut text: String, max_len: usize) -> String {
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// How a column's value is produced when input omits it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultDirective {
    /// No value; the column is left out of the row.
    #[default]
    None,
    /// Unix seconds.
    CurrentTime,
    /// Unix seconds with a microsecond fraction.
    CurrentTimePrecise,
    EmptyString,
    Zero,
    /// Uniform random integer in `min..=max`.
    RandomInRange { min: i64, max: i64 },
    /// Per-entity-kind monotonic counter.
    NextAutoId,
    Literal(JsonValue),
}

/// Backing-store mapping for a column. Columns without one are transient.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistMapping {
    #[serde(default)]
    pub sql_type: Option<String>,
    #[serde(default)]
    pub not_null: bool,
}

/// A declared column of an entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", with = "serde_yaml::with::singleton_map")]
    pub kind: ColumnType,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub default: DefaultDirective,
    #[serde(default)]
    pub persist: Option<PersistMapping>,
}

impl ColumnDef {
    pub fn new(name: &str, kind: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: DefaultDirective::None,
            persist: None,
        }
    }

    pub fn with_default(mut self, default: DefaultDirective) -> Self {
        self.default = default;
        self
    }

    pub fn persisted(mut self) -> Self {
        self.persist = Some(PersistMapping::default());
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.persist.is_some()
    }

    /// SQL type for the backing store, honoring an explicit override.
    pub fn sql_type(&self) -> &str {
        self.persist
            .as_ref()
            .and_then(|p| p.sql_type.as_deref())
            .unwrap_or_else(|| self.kind.sql_type())
    }
}

/// How composite index components are combined into a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrder {
    /// Components joined in declared column order.
    #[default]
    Declared,
    /// Components sorted before joining. Different column assignments with
    /// the same multiset of values collide under this order.
    Sorted,
}

/// A secondary index over one or more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub key_order: KeyOrder,
}

impl IndexDef {
    pub fn unique(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
            key_order: KeyOrder::Declared,
        }
    }

    pub fn multi(name: &str, columns: &[&str]) -> Self {
        Self {
            unique: false,
            ..Self::unique(name, columns)
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Full declaration of one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    /// Backing-store table. `None` makes the kind transient.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// When set, `find_by_id` on a missing id inserts a default row.
    #[serde(default)]
    pub read_creates: bool,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl EntitySchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            capacity: DEFAULT_CAPACITY,
            read_creates: false,
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_read_creates(mut self, read_creates: bool) -> Self {
        self.read_creates = read_creates;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn id_column(&self) -> Option<&ColumnDef> {
        self.column(ID_COLUMN)
    }

    pub fn persisted_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_persisted())
    }

    /// Check the declaration for structural errors.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let entity = || self.name.clone();

        check_identifier(&self.name)?;
        if let Some(table) = &self.table {
            check_identifier(table)?;
        }
        if self.capacity == 0 {
            return Err(SchemaError::ZeroCapacity { entity: entity() });
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            check_identifier(&col.name)?;
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    entity: entity(),
                    column: col.name.clone(),
                });
            }
            let not_null = col.persist.as_ref().is_some_and(|p| p.not_null);
            if not_null && col.name != ID_COLUMN && col.default == DefaultDirective::None {
                return Err(SchemaError::NotNullWithoutDefault {
                    entity: entity(),
                    column: col.name.clone(),
                });
            }
            if let DefaultDirective::RandomInRange { min, max } = col.default {
                if min > max {
                    return Err(SchemaError::InvalidRange {
                        entity: entity(),
                        column: col.name.clone(),
                        min,
                        max,
                    });
                }
            }
        }

        let id = self
            .id_column()
            .ok_or_else(|| SchemaError::MissingId { entity: entity() })?;
        if self.table.is_some() && !id.is_persisted() {
            return Err(SchemaError::UnpersistedId { entity: entity() });
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            check_identifier(&index.name)?;
            if !index_names.insert(index.name.as_str()) {
                return Err(SchemaError::DuplicateIndex {
                    entity: entity(),
                    index: index.name.clone(),
                });
            }
            if index.columns.is_empty() {
                return Err(SchemaError::EmptyIndex {
                    entity: entity(),
                    index: index.name.clone(),
                });
            }
            for column in &index.columns {
                if self.column(column).is_none() {
                    return Err(SchemaError::UnknownIndexColumn {
                        entity: entity(),
                        index: index.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Names end up quoted inside SQL statements, so only plain identifiers are accepted.
fn check_identifier(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

/// All entity kinds known to a world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    pub entities: Vec<EntitySchema>,
}

impl SchemaRegistry {
    /// Parse and validate a registry from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let registry: SchemaRegistry = serde_yaml::from_str(yaml)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Read, parse, and validate a registry file.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Add an entity kind, validating it against the existing ones.
    pub fn register(&mut self, schema: EntitySchema) -> Result<(), SchemaError> {
        schema.validate()?;
        if self.get(&schema.name).is_some() {
            return Err(SchemaError::DuplicateEntity(schema.name));
        }
        self.entities.push(schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.iter()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for entity in &self.entities {
            entity.validate()?;
            if !names.insert(entity.name.as_str()) {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WIDGETS_YAML: &str = r#"
entities:
  - name: widgets
    table: widgets
    capacity: 128
    columns:
      - { name: id, type: int, default: next_auto_id, persist: {} }
      - { name: name, type: { string: 8 }, default: empty_string, persist: { not_null: true } }
      - { name: owner, type: int, default: zero, persist: {} }
      - { name: roll, type: int, default: { random_in_range: { min: 1, max: 6 } } }
      - { name: weight, type: float, default: { literal: 1.5 }, persist: { sql_type: DOUBLE } }
      - { name: note, type: { string: 16 } }
    indexes:
      - { name: name_idx, columns: [name], unique: true }
      - { name: owner_idx, columns: [owner] }
"#;

    #[test]
    fn registry_parses_yaml_declarations() {
        let registry = SchemaRegistry::from_yaml_str(WIDGETS_YAML).unwrap();
        let widgets = registry.get("widgets").unwrap();

        assert_eq!(widgets.table.as_deref(), Some("widgets"));
        assert_eq!(widgets.capacity, 128);
        assert!(!widgets.read_creates);
        assert_eq!(widgets.columns.len(), 6);

        let name = widgets.column("name").unwrap();
        assert_eq!(name.kind, ColumnType::String(8));
        assert_eq!(name.default, DefaultDirective::EmptyString);
        assert!(name.persist.as_ref().unwrap().not_null);

        let roll = widgets.column("roll").unwrap();
        assert_eq!(roll.default, DefaultDirective::RandomInRange { min: 1, max: 6 });
        assert!(!roll.is_persisted());

        let weight = widgets.column("weight").unwrap();
        assert_eq!(weight.default, DefaultDirective::Literal(json!(1.5)));
        assert_eq!(weight.sql_type(), "DOUBLE");

        assert_eq!(widgets.column("note").unwrap().default, DefaultDirective::None);
        assert_eq!(widgets.column("owner").unwrap().sql_type(), "INTEGER");

        assert!(widgets.indexes[0].unique);
        assert!(!widgets.indexes[1].unique);
        assert_eq!(widgets.indexes[1].key_order, KeyOrder::Declared);
    }

    #[test]
    fn registry_rejects_missing_id() {
        let yaml = r#"
entities:
  - name: things
    columns:
      - { name: label, type: { string: 8 } }
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, SchemaError::MissingId { .. }), "got {}", err);
    }

    #[test]
    fn registry_rejects_unknown_index_column() {
        let schema = EntitySchema::new("things", vec![ColumnDef::new("id", ColumnType::Int)])
            .with_index(IndexDef::unique("bad_idx", &["missing"]));
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn registry_rejects_persisted_table_with_transient_id() {
        let schema = EntitySchema::new("things", vec![ColumnDef::new("id", ColumnType::Int)])
            .with_table("things");
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::UnpersistedId { .. })
        ));
    }

    #[test]
    fn registry_rejects_not_null_column_without_default() {
        let yaml = r#"
entities:
  - name: things
    table: things
    columns:
      - { name: id, type: int, persist: { not_null: true } }
      - { name: tag, type: { string: 8 }, persist: { not_null: true } }
"#;
        let err = SchemaRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(
            matches!(&err, SchemaError::NotNullWithoutDefault { column, .. } if column == "tag"),
            "got {}",
            err
        );

        // A default that always yields a value makes the column acceptable
        let fixed = yaml.replace(
            "{ name: tag, type: { string: 8 }, persist",
            "{ name: tag, type: { string: 8 }, default: empty_string, persist",
        );
        SchemaRegistry::from_yaml_str(&fixed).unwrap();
    }

    #[test]
    fn registry_rejects_duplicates_and_bad_identifiers() {
        let mut registry = SchemaRegistry::default();
        let schema = EntitySchema::new("things", vec![ColumnDef::new("id", ColumnType::Int)]);
        registry.register(schema.clone()).unwrap();
        assert!(matches!(
            registry.register(schema),
            Err(SchemaError::DuplicateEntity(_))
        ));

        let quoted = EntitySchema::new(
            "things2",
            vec![
                ColumnDef::new("id", ColumnType::Int),
                ColumnDef::new("bad\"name", ColumnType::Int),
            ],
        );
        assert!(matches!(
            quoted.validate(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn coerce_numbers_treat_empty_as_zero() {
        assert_eq!(ColumnType::Int.coerce(&json!("")), Value::Int(0));
        assert_eq!(ColumnType::Int.coerce(&json!(null)), Value::Int(0));
        assert_eq!(ColumnType::Int.coerce(&json!(" 42 ")), Value::Int(42));
        assert_eq!(ColumnType::Int.coerce(&json!(7.9)), Value::Int(7));
        assert_eq!(ColumnType::Int.coerce(&json!("abc")), Value::Int(0));
        assert_eq!(ColumnType::Float.coerce(&json!("2.5")), Value::Float(2.5));
        assert_eq!(ColumnType::Float.coerce(&json!(3)), Value::Float(3.0));
        assert_eq!(ColumnType::Float.coerce(&json!("")), Value::Float(0.0));
    }

    #[test]
    fn coerce_strings_use_string_form_and_truncate_bytes() {
        let kind = ColumnType::String(4);
        assert_eq!(kind.coerce(&json!(12345)), Value::from("1234"));
        assert_eq!(kind.coerce(&json!(null)), Value::from(""));
        assert_eq!(kind.coerce(&json!(true)), Value::from("true"));
        // "é" is two bytes; the cut must land on a char boundary
        assert_eq!(kind.coerce(&json!("abcé")), Value::from("abc"));
    }
}
