//! Store connection configuration.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`ARBOR__STORE__` prefix, e.g. `ARBOR__STORE__URI`)
//! 2. Config file (`<prefix>.toml`, `[store]` table)
//! 3. Defaults

use serde::Deserialize;

use crate::error::{ArborError, Result};

/// Connection settings for the graph store.
///
/// Immutable once handed to a session factory. Credentials are plain values,
/// suitable for development and demo deployments only.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Bolt endpoint (default: "bolt://localhost:7687").
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Rows fetched per round trip.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Enables `purge_database`. Off unless explicitly configured.
    #[serde(default)]
    pub allow_purge: bool,
}

impl StoreConfig {
    /// Load the `[store]` section from `<file_prefix>.toml` (optional) and
    /// `ARBOR__STORE__*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        Self::load_with_env(file_prefix, "ARBOR")
    }

    pub(crate) fn load_with_env(file_prefix: &str, env_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ArborError::Config(e.to_string()))?;

        let store = match cfg.get::<StoreConfig>("store") {
            Ok(c) => c,
            Err(config::ConfigError::NotFound(_)) => StoreConfig::default(),
            Err(e) => return Err(ArborError::Config(e.to_string())),
        };
        tracing::debug!(
            file_prefix,
            uri = %store.uri,
            allow_purge = store.allow_purge,
            "Store configuration loaded"
        );
        Ok(store)
    }
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            allow_purge: false,
        }
    }
}
