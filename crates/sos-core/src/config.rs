//! Settings loading for the service and the CLI.
//!
//! Wraps `sos_config` resolution with CLI overrides and reports where the
//! effective settings came from.

use crate::store::{SqliteDatabase, StoreError};
use serde::Serialize;
use sos_config::{
    resolve_config, validate_settings, ConfigSource, ServiceSettings, StorageBackend,
    ValidationError,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("No database path configured")]
    NoDatabasePath,

    #[error("Cannot open database {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

impl From<ConfigError> for sos_common::Error {
    fn from(err: ConfigError) -> Self {
        sos_common::Error::Config(err.to_string())
    }
}

/// CLI overrides applied on top of the resolved settings file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit settings file (highest priority).
    pub config_path: Option<PathBuf>,
    /// Database file; selects the SQLite backend.
    pub db_path: Option<PathBuf>,
}

/// Effective settings with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: ServiceSettings,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Summary of the effective configuration for `check` output.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub source: String,
    pub path: Option<PathBuf>,
    pub schema_version: String,
    pub backend: String,
    pub database: Option<PathBuf>,
    pub flush_threshold: usize,
    pub no_data_value: String,
}

impl ResolvedConfig {
    pub fn snapshot(&self) -> ConfigSnapshot {
        let storage = &self.settings.storage;
        ConfigSnapshot {
            source: self.source.to_string(),
            path: self.path.clone(),
            schema_version: self.settings.schema_version.clone(),
            backend: storage.backend.to_string(),
            database: match storage.backend {
                StorageBackend::Sqlite => storage.resolved_path(),
                StorageBackend::Memory => None,
            },
            flush_threshold: self.settings.ingest.flush_threshold,
            no_data_value: self.settings.ingest.no_data_value.clone(),
        }
    }

    /// Open the SQLite database named by the settings.
    pub fn open_sqlite(&self) -> Result<SqliteDatabase, ConfigError> {
        let storage = &self.settings.storage;
        let path = storage.resolved_path().ok_or(ConfigError::NoDatabasePath)?;
        SqliteDatabase::open(&path, Duration::from_millis(storage.busy_timeout_ms))
            .map_err(|source| ConfigError::Database { path, source })
    }
}

/// Load and validate settings.
///
/// Resolution order (highest to lowest priority):
/// 1. `options.config_path`
/// 2. `SOS_INGEST_CONFIG` / `SOS_INGEST_CONFIG_DIR`
/// 3. XDG config home, then /etc/sos-ingest
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    if let Some(path) = &options.config_path {
        if !path.exists() {
            return Err(ConfigError::NotFound { path: path.clone() });
        }
    }
    let found = resolve_config(options.config_path.as_deref());
    let mut settings = match &found.path {
        Some(path) => ServiceSettings::from_file(path)?,
        None => ServiceSettings::default(),
    };

    if let Some(db) = &options.db_path {
        settings.storage.backend = StorageBackend::Sqlite;
        settings.storage.path = Some(db.clone());
    }
    validate_settings(&settings)?;

    Ok(ResolvedConfig {
        settings,
        path: found.path,
        source: found.source,
    })
}
