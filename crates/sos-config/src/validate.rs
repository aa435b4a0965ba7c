//! Configuration validation errors and semantic validation.

use crate::settings::{ServiceSettings, StorageBackend};
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate service settings semantically.
pub fn validate_settings(settings: &ServiceSettings) -> ValidationResult<()> {
    if settings.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: settings.schema_version.clone(),
        });
    }

    if settings.ingest.flush_threshold == 0 {
        return Err(invalid("ingest.flush_threshold", "Must be at least 1"));
    }

    if settings.ingest.no_data_value.is_empty() {
        return Err(invalid("ingest.no_data_value", "Must not be empty"));
    }

    let defaults = &settings.encoding_defaults;
    if defaults.token_separator.is_empty() {
        return Err(invalid(
            "encoding_defaults.token_separator",
            "Must not be empty",
        ));
    }
    if defaults.block_separator.is_empty() {
        return Err(invalid(
            "encoding_defaults.block_separator",
            "Must not be empty",
        ));
    }
    if defaults.token_separator == defaults.block_separator {
        return Err(ValidationError::SemanticError(format!(
            "token and block separators must differ, both are '{}'",
            defaults.token_separator
        )));
    }
    if settings.ingest.no_data_value.contains(&defaults.token_separator)
        || settings.ingest.no_data_value.contains(&defaults.block_separator)
    {
        return Err(invalid(
            "ingest.no_data_value",
            "Must not contain the default token or block separator",
        ));
    }

    if settings.storage.backend == StorageBackend::Sqlite
        && settings.storage.resolved_path().is_none()
    {
        return Err(invalid(
            "storage.path",
            "No database path configured and no data directory available",
        ));
    }

    Ok(())
}
