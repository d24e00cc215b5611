//! Configuration Loader
//!
//! Layers built-in defaults, an optional configuration file and environment
//! variables into a validated [`CacheConfig`].
//!
//! Environment variables use a double-underscore separator so field names
//! keep their single underscores: `SHARDCACHE__REDIS__ADDRESS`,
//! `SHARDCACHE__SCAN__DEFAULT_COUNT`, `SHARDCACHE__MUTATION_POLICY`.

use super::CacheConfig;
use crate::cache::errors::{CacheError, CacheResult};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "SHARDCACHE_CONFIG";

/// Default prefix for configuration environment variables
pub const ENV_PREFIX: &str = "SHARDCACHE";

/// Builder for a layered [`CacheConfig`]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    overrides: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
            overrides: Vec::new(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that picks up the file named by `SHARDCACHE_CONFIG`, if any
    pub fn from_env() -> Self {
        let loader = Self::new();
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => loader.with_file(path),
            _ => loader,
        }
    }

    /// Read a TOML, YAML or JSON file (format taken from the extension)
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Set one dotted key (`scan.default_count`) above every other source
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn load(&self) -> CacheResult<CacheConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(CacheError::Configuration(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Loading cache configuration file");
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in &self.overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }

        let config: CacheConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            backend = %config.backend,
            database = config.redis.database,
            mutation_policy = ?config.mutation_policy,
            "Cache configuration loaded"
        );
        Ok(config)
    }
}
