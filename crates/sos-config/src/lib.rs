//! Sensor observation ingest configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for service.json
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_config, ConfigPath, ConfigSource};
pub use settings::{
    EncodingDefaults, IngestSettings, ServiceSettings, StorageBackend, StorageSettings,
};
pub use validate::{validate_settings, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Rows written between two buffer flushes unless configured otherwise.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// Token used for absent values unless configured otherwise.
pub const DEFAULT_NO_DATA_VALUE: &str = "noData";
