// ABOUTME: Built-in entity schema declarations for the game world, embedded from schemas/game.yaml.
// ABOUTME: A YAML file named by configuration replaces them entirely.

use std::path::Path;

use starhold_core::{SchemaError, SchemaRegistry};

/// The game's entity kinds as YAML.
pub const GAME_SCHEMAS: &str = include_str!("../schemas/game.yaml");

pub fn default_registry() -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::from_yaml_str(GAME_SCHEMAS)
}

/// Load the registry from `path`, or the built-in one when `None`.
pub fn load_registry(path: Option<&Path>) -> Result<SchemaRegistry, SchemaError> {
    match path {
        Some(path) => {
            tracing::info!("loading schema registry from {}", path.display());
            SchemaRegistry::from_path(path)
        }
        None => default_registry(),
    }
}
