// ABOUTME: World context owning every entity table built from a schema registry.
// ABOUTME: Bootstraps all kinds against one backing store and registers them with a shared saver.

use std::collections::HashMap;
use std::sync::Arc;

use starhold_core::{EntityTable, SchemaRegistry};

use crate::backend::BackingStore;
use crate::bootstrap::{BootstrapError, bootstrap_entity};
use crate::saver::Saver;
use crate::sync::SyncReport;

/// All entity tables of one game world. Worlds are independent of each
/// other, so tests can build as many as they like.
pub struct World {
    tables: HashMap<String, Arc<EntityTable>>,
    saver: Arc<Saver>,
}

impl World {
    /// Bootstrap every entity kind in the registry. Any failure aborts.
    pub fn bootstrap(
        registry: &SchemaRegistry,
        backend: Arc<dyn BackingStore>,
        batch_size: usize,
    ) -> Result<Self, BootstrapError> {
        registry.validate()?;
        let saver = Arc::new(Saver::new(Arc::clone(&backend), batch_size));
        let mut tables = HashMap::new();

        for schema in registry.iter() {
            let table = Arc::new(bootstrap_entity(schema.clone(), backend.as_ref())?);
            saver.register(Arc::clone(&table));
            tables.insert(schema.name.clone(), table);
        }

        tracing::info!("world ready with {} entity kinds", tables.len());
        Ok(Self { tables, saver })
    }

    pub fn table(&self, name: &str) -> Option<Arc<EntityTable>> {
        self.tables.get(name).cloned()
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn saver(&self) -> &Arc<Saver> {
        &self.saver
    }

    /// Flush every table now, blocking on the backing store.
    pub fn sync(&self) -> SyncReport {
        self.saver.sync_all()
    }
}
