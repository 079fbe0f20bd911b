// ABOUTME: Row type and the schema-driven codec that normalizes loose input maps into typed rows.
// ABOUTME: Resolves default directives (clock, random, auto-id counter) when filling defaults.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::schema::{ColumnDef, DefaultDirective, EntitySchema, ID_COLUMN};
use crate::value::Value;

/// One record: column name to normalized value. Always carries `id` once stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn get_int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_float(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_string(), value.into());
    }

    pub fn id(&self) -> Option<&Value> {
        self.get(ID_COLUMN)
    }

    /// The Row Store key: the string form of `id`, or `None` when absent or empty.
    pub fn key(&self) -> Option<String> {
        self.id().map(Value::to_string).filter(|k| !k.is_empty())
    }

    /// Overwrite this row's values with every value present in `other`.
    pub fn merge(&mut self, other: Row) {
        self.values.extend(other.values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Converts loosely-typed input into rows for one entity kind and owns
/// that kind's auto-id counter.
pub struct RowCodec {
    schema: Arc<EntitySchema>,
    auto_id: AtomicI64,
}

impl RowCodec {
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            auto_id: AtomicI64::new(0),
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Normalize an input map into a typed row.
    ///
    /// Supplied values are coerced to their column type. Omitted columns are
    /// resolved from their default directive when `fill_defaults` is set and
    /// left out otherwise, which is how partial updates are expressed.
    /// Columns whose directive is `none` never appear unless supplied.
    /// Input keys with no declared column are ignored.
    pub fn normalize(&self, input: &JsonMap<String, JsonValue>, fill_defaults: bool) -> Row {
        let mut row = Row::new();
        for col in &self.schema.columns {
            let raw = match input.get(&col.name) {
                Some(value) => Some(value.clone()),
                None if fill_defaults => self.resolve_default(col),
                None => None,
            };
            if let Some(raw) = raw {
                row.values.insert(col.name.clone(), col.kind.coerce(&raw));
            }
        }
        row
    }

    /// Build the default row for an id, as used by read-creates lookups.
    pub fn default_row(&self, id: &Value) -> Row {
        let mut input = JsonMap::new();
        input.insert(ID_COLUMN.to_string(), id.to_json());
        self.normalize(&input, true)
    }

    /// Resolve a column's default directive to a raw value. Advances the
    /// auto-id counter for `next_auto_id`.
    pub fn resolve_default(&self, col: &ColumnDef) -> Option<JsonValue> {
        match &col.default {
            DefaultDirective::None => None,
            DefaultDirective::CurrentTime => Some(JsonValue::from(Utc::now().timestamp())),
            DefaultDirective::CurrentTimePrecise => {
                let micros = Utc::now().timestamp_micros();
                Some(JsonValue::from(micros as f64 / 1_000_000.0))
            }
            DefaultDirective::EmptyString => Some(JsonValue::String(String::new())),
            DefaultDirective::Zero => Some(JsonValue::from(0)),
            DefaultDirective::RandomInRange { min, max } => {
                Some(JsonValue::from(rand::rng().random_range(*min..=*max)))
            }
            DefaultDirective::NextAutoId => Some(JsonValue::from(self.next_auto_id())),
            DefaultDirective::Literal(value) => Some(value.clone()),
        }
    }

    /// Hand out the next auto id for this entity kind.
    pub fn next_auto_id(&self) -> i64 {
        self.auto_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ensure later auto ids are greater than `id`.
    pub fn observe_id(&self, id: i64) {
        self.auto_id.fetch_max(id, Ordering::SeqCst);
    }

    /// The highest id handed out or observed so far.
    pub fn auto_id_high_water(&self) -> i64 {
        self.auto_id.load(Ordering::SeqCst)
    }
}
