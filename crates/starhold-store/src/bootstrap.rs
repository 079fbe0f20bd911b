// ABOUTME: Startup path for an entity kind: reconcile the backing schema, then bulk-load stored rows.
// ABOUTME: Loaded rows are indexed and seed the auto-id counter but are never marked dirty.

use std::time::Instant;

use starhold_core::{CapacityError, EntitySchema, EntityTable, SchemaError};
use thiserror::Error;

use crate::backend::{BackendError, BackingStore};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("backend error for {entity}: {source}")]
    Backend {
        entity: String,
        #[source]
        source: BackendError,
    },

    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),
}

/// Build an entity table and fill it from the backing store.
///
/// Sequence:
/// 1. Validate the schema and allocate the table at its capacity
/// 2. Reconcile the backing table (create or extend, never narrow)
/// 3. Load every stored row into the row store and indexes
/// 4. Clear the dirty sets so loaded rows are not written back
///
/// Transient kinds skip steps 2 and 3.
pub fn bootstrap_entity(
    schema: EntitySchema,
    backend: &dyn BackingStore,
) -> Result<EntityTable, BootstrapError> {
    schema.validate()?;
    let started = Instant::now();
    let table = EntityTable::new(schema);

    if table.schema().table.is_some() {
        let backend_err = |source: BackendError| BootstrapError::Backend {
            entity: table.name().to_string(),
            source,
        };

        backend.reconcile(table.schema()).map_err(backend_err)?;
        let stored = backend.load_all(table.schema()).map_err(backend_err)?;

        let mut loaded = 0;
        for map in &stored {
            if table.load(map)?.is_some() {
                loaded += 1;
            }
        }

        tracing::info!(
            "{}: loaded {} of {} stored rows in {:?} (next auto id after {})",
            table.name(),
            loaded,
            stored.len(),
            started.elapsed(),
            table.codec().auto_id_high_water()
        );
    } else {
        tracing::info!("{}: transient entity kind, nothing to load", table.name());
    }

    table.dirty().clear();
    Ok(table)
}
