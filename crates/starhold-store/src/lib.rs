// ABOUTME: Persistence layer for starhold, writing in-memory entity tables back to SQLite.
// ABOUTME: Provides the backing-store contract, schema reconciliation, bootstrap, sync engine, and saver.

pub mod backend;
pub mod bootstrap;
pub mod saver;
pub mod sqlite;
pub mod sync;
pub mod world;

#[cfg(test)]
mod test_support;

pub use backend::{BackendError, BackingStore};
pub use bootstrap::{BootstrapError, bootstrap_entity};
pub use saver::Saver;
pub use sqlite::SqliteStore;
pub use sync::{SyncReport, project, sync_to_database};
pub use world::World;
