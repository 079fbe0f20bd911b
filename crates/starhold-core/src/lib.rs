// ABOUTME: Core library for starhold: the in-memory, schema-driven entity store.
// ABOUTME: Defines schemas, the row codec, row store, secondary indexes, dirty tracking, and entity tables.

pub mod codec;
pub mod dirty;
pub mod index;
pub mod row_store;
pub mod schema;
pub mod table;
pub mod value;

pub use codec::{Row, RowCodec};
pub use dirty::{DirtyMark, DirtySnapshot, DirtyTracker};
pub use index::{IndexHit, IndexManager, SecondaryIndex};
pub use row_store::{CapacityError, RowStore};
pub use schema::{
    ColumnDef, ColumnType, DefaultDirective, EntitySchema, IndexDef, KeyOrder, PersistMapping,
    SchemaError, SchemaRegistry,
};
pub use table::{EntityTable, PendingCounts};
pub use value::Value;
