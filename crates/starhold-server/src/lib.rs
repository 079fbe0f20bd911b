// ABOUTME: Runtime host for the starhold entity store: configuration, game schemas, and lifecycle.
// ABOUTME: The binary only parses flags and hands a StarholdConfig to `run`.

pub mod config;
pub mod runtime;
pub mod schemas;

pub use config::{ConfigError, StarholdConfig};
pub use runtime::{Runtime, run};
pub use schemas::{default_registry, load_registry};
