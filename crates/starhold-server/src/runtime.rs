// ABOUTME: Process lifecycle: open the database, bootstrap the world, run the periodic saver.
// ABOUTME: Shutdown stops the saver loop and waits for its final flush before returning.

use std::sync::Arc;

use anyhow::Context;
use starhold_store::{BackingStore, SqliteStore, World};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::StarholdConfig;
use crate::schemas::load_registry;

/// A bootstrapped world with its saver loop running.
pub struct Runtime {
    world: Arc<World>,
    shutdown: watch::Sender<bool>,
    saver: JoinHandle<()>,
}

impl Runtime {
    /// Load schemas, open the backing store, bootstrap every entity kind and
    /// start the periodic sync task.
    pub async fn start(config: &StarholdConfig) -> anyhow::Result<Self> {
        let registry = load_registry(config.schema_path.as_deref())
            .context("failed to load entity schemas")?;

        let backend: Arc<dyn BackingStore> = Arc::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("failed to open {}", config.db_path.display()))?,
        );
        tracing::info!("database: {}", config.db_path.display());

        let batch = config.sync_batch;
        let world = tokio::task::spawn_blocking(move || World::bootstrap(&registry, backend, batch))
            .await
            .context("bootstrap task panicked")?
            .context("failed to bootstrap world")?;
        let world = Arc::new(world);

        let (shutdown, rx) = watch::channel(false);
        let saver = Arc::clone(world.saver()).spawn(config.sync_interval, rx);
        tracing::info!(
            "starhold running: {} entity kinds, syncing every {:?} in batches of {}",
            world.entity_names().len(),
            config.sync_interval,
            batch
        );

        Ok(Self {
            world,
            shutdown,
            saver,
        })
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Stop the saver and wait for the final flush.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // Err only when the saver already exited, in which case there is nothing to signal
        let _ = self.shutdown.send(true);
        self.saver.await.context("saver task panicked")?;
        tracing::info!("starhold stopped");
        Ok(())
    }
}

/// Run until ctrl-c, then shut down cleanly.
pub async fn run(config: StarholdConfig) -> anyhow::Result<()> {
    let runtime = Runtime::start(&config).await?;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    runtime.shutdown().await
}
