//! Service settings types.
//!
//! These types match the service.json layout. Every section is optional in
//! the file and falls back to built-in defaults.

use crate::validate::ValidationError;
use crate::{CONFIG_SCHEMA_VERSION, DEFAULT_FLUSH_THRESHOLD, DEFAULT_NO_DATA_VALUE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub schema_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub encoding_defaults: EncodingDefaults,

    #[serde(default)]
    pub storage: StorageSettings,
}

/// Knobs of the insert-result pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Rows appended between two flush/clear cycles of the session buffer.
    pub flush_threshold: usize,

    /// Token written for, and read as, an absent value.
    pub no_data_value: String,

    /// Reject constellations whose procedure is not registered for the offering.
    pub require_registered_procedure: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            no_data_value: DEFAULT_NO_DATA_VALUE.to_string(),
            require_registered_procedure: false,
        }
    }
}

/// Separators applied when a template registration omits its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingDefaults {
    pub token_separator: String,
    pub block_separator: String,
}

impl Default for EncodingDefaults {
    fn default() -> Self {
        EncodingDefaults {
            token_separator: ",".to_string(),
            block_separator: "@@".to_string(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Database file. Falls back to the XDG data directory when unset.
    pub path: Option<PathBuf>,

    /// How long a session waits for a competing writer.
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            backend: StorageBackend::Sqlite,
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StorageSettings {
    /// Database path after applying the data-directory fallback.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| crate::resolve::data_dir().map(|d| d.join("observations.db")))
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            description: None,
            ingest: IngestSettings::default(),
            encoding_defaults: EncodingDefaults::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl ServiceSettings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_uses_defaults() {
        let settings = ServiceSettings::from_json(r#"{"schema_version":"1.0.0"}"#).unwrap();
        assert_eq!(settings, ServiceSettings::default());
        assert_eq!(settings.ingest.flush_threshold, 50);
        assert_eq!(settings.ingest.no_data_value, "noData");
        assert_eq!(settings.encoding_defaults.block_separator, "@@");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings = ServiceSettings::from_json(
            r#"{"schema_version":"1.0.0","ingest":{"flush_threshold":10},"storage":{"backend":"memory"}}"#,
        )
        .unwrap();
        assert_eq!(settings.ingest.flush_threshold, 10);
        assert_eq!(settings.ingest.no_data_value, "noData");
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.storage.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = ServiceSettings::from_json("{not json").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn test_explicit_path_wins_over_data_dir() {
        let storage = StorageSettings {
            path: Some(PathBuf::from("/tmp/obs.db")),
            ..StorageSettings::default()
        };
        assert_eq!(storage.resolved_path(), Some(PathBuf::from("/tmp/obs.db")));
    }
}
