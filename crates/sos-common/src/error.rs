//! Errors shared by every layer of the ingest service.
//!
//! Each [`Error`] carries a stable numeric code, an [`ErrorCategory`], a
//! retry hint and a remediation line. [`StructuredError`] is the JSON form
//! written by the CLI:
//!
//! ```json
//! {"code": 30, "category": "conflict", "recoverable": false,
//!  "message": "observation type conflict ...",
//!  "context": {"existing": "Measurement", "requested": "CountObservation"}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or incomplete request parameters.
    Request,
    /// Request contradicts already stored state.
    Conflict,
    /// Referenced entity does not exist.
    NotFound,
    /// Storage collaborator failures (transaction, flush, commit).
    Storage,
    /// Result structure the pipeline cannot process.
    Shape,
    /// Configuration file errors.
    Config,
    /// File I/O and serialization errors.
    Io,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Request => "request",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Shape => "shape",
            ErrorCategory::Config => "config",
            ErrorCategory::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the ingest service.
#[derive(Error, Debug)]
pub enum Error {
    // Request errors (10-19)
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid value for {parameter}: {message}")]
    InvalidParameterValue { parameter: String, message: String },

    // Conflict errors (30-39)
    #[error(
        "observation type conflict for procedure={procedure}, observedProperty={observed_property}, \
         offering={offering}: requested '{requested}' but the constellation is bound to '{existing}'"
    )]
    ObservationTypeConflict {
        procedure: String,
        observed_property: String,
        offering: String,
        existing: String,
        requested: String,
    },

    #[error(
        "a result template already exists for offering={offering}, observedProperty={observed_property}: {existing}"
    )]
    DuplicateTemplate {
        offering: String,
        observed_property: String,
        existing: String,
    },

    #[error("result template identifier already in use: {0}")]
    DuplicateTemplateIdentifier(String),

    // Lookup errors (40-49)
    #[error("result template not found: {0}")]
    TemplateNotFound(String),

    // Shape errors (50-59)
    #[error("unsupported result structure: {0}")]
    UnsupportedShape(String),

    // Storage errors (60-69)
    #[error("storage failure: {0}")]
    StorageFailure(String),

    // Configuration errors (70-79)
    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors (80-89)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidParameterValue`].
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParameterValue {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Request errors
    /// - 30-39: Conflicts
    /// - 40-49: Lookups
    /// - 50-59: Result structure
    /// - 60-69: Storage
    /// - 70-79: Configuration
    /// - 80-89: I/O
    pub fn code(&self) -> u32 {
        match self {
            Error::MissingParameter(_) => 10,
            Error::InvalidParameterValue { .. } => 11,
            Error::ObservationTypeConflict { .. } => 30,
            Error::DuplicateTemplate { .. } => 31,
            Error::DuplicateTemplateIdentifier(_) => 32,
            Error::TemplateNotFound(_) => 40,
            Error::UnsupportedShape(_) => 50,
            Error::StorageFailure(_) => 60,
            Error::Config(_) => 70,
            Error::Io(_) => 80,
            Error::Json(_) => 81,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingParameter(_) | Error::InvalidParameterValue { .. } => {
                ErrorCategory::Request
            }
            Error::ObservationTypeConflict { .. }
            | Error::DuplicateTemplate { .. }
            | Error::DuplicateTemplateIdentifier(_) => ErrorCategory::Conflict,
            Error::TemplateNotFound(_) => ErrorCategory::NotFound,
            Error::UnsupportedShape(_) => ErrorCategory::Shape,
            Error::StorageFailure(_) => ErrorCategory::Storage,
            Error::Config(_) => ErrorCategory::Config,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether retrying the same request can succeed.
    ///
    /// Conflicts and malformed requests fail identically on retry; storage
    /// and I/O failures are usually transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::MissingParameter(_) => false,
            Error::InvalidParameterValue { .. } => false,
            Error::ObservationTypeConflict { .. } => false,
            Error::DuplicateTemplate { .. } => false,
            Error::DuplicateTemplateIdentifier(_) => false,
            // The template may be registered later
            Error::TemplateNotFound(_) => true,
            Error::UnsupportedShape(_) => false,
            Error::StorageFailure(_) => true,
            Error::Config(_) => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::MissingParameter(_) => "Supply the missing parameter and resend the request.",
            Error::InvalidParameterValue { .. } => {
                "Check the value against the registered result structure and encoding."
            }
            Error::ObservationTypeConflict { .. } => {
                "Use the observation type already bound to this procedure, observed property and offering."
            }
            Error::DuplicateTemplate { .. } => {
                "Reuse the existing template for this offering and observed property."
            }
            Error::DuplicateTemplateIdentifier(_) => {
                "Choose a different template identifier or omit it to have one generated."
            }
            Error::TemplateNotFound(_) => {
                "Register the result template first, or list templates with 'sos-ingest list-templates'."
            }
            Error::UnsupportedShape(_) => {
                "Flatten the result structure so every field is a simple component."
            }
            Error::StorageFailure(_) => {
                "No observations were stored. Retry the request once the storage backend is healthy."
            }
            Error::Config(_) => "Run 'sos-ingest check' to validate the configuration.",
            Error::Io(_) => "Check file paths and permissions, then retry.",
            Error::Json(_) => "Fix the JSON syntax of the request document.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::MissingParameter(_) => "Missing Parameter",
            Error::InvalidParameterValue { .. } => "Invalid Parameter Value",
            Error::ObservationTypeConflict { .. } => "Observation Type Conflict",
            Error::DuplicateTemplate { .. } => "Duplicate Result Template",
            Error::DuplicateTemplateIdentifier(_) => "Duplicate Template Identifier",
            Error::TemplateNotFound(_) => "Result Template Not Found",
            Error::UnsupportedShape(_) => "Unsupported Result Structure",
            Error::StorageFailure(_) => "Storage Failure",
            Error::Config(_) => "Configuration Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }
}

/// JSON body of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    /// Offending parameter, constellation triple or template id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl Error {
    fn context_pairs(&self) -> Vec<(&'static str, &str)> {
        match self {
            Error::MissingParameter(parameter)
            | Error::InvalidParameterValue { parameter, .. } => vec![("parameter", parameter.as_str())],
            Error::ObservationTypeConflict {
                procedure,
                observed_property,
                offering,
                existing,
                requested,
            } => vec![
                ("procedure", procedure.as_str()),
                ("observed_property", observed_property.as_str()),
                ("offering", offering.as_str()),
                ("existing", existing.as_str()),
                ("requested", requested.as_str()),
            ],
            Error::DuplicateTemplate {
                offering,
                observed_property,
                existing,
            } => vec![
                ("offering", offering.as_str()),
                ("observed_property", observed_property.as_str()),
                ("existing", existing.as_str()),
            ],
            Error::DuplicateTemplateIdentifier(id) | Error::TemplateNotFound(id) => {
                vec![("template", id.as_str())]
            }
            _ => Vec::new(),
        }
    }
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context: err
                .context_pairs()
                .into_iter()
                .map(|(key, value)| (key.to_string(), serde_json::Value::from(value)))
                .collect(),
        }
    }
}

impl StructuredError {
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Compact JSON; falls back to a bare code object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| serde_json::json!({ "code": self.code }).to_string())
    }
}

/// Three-line rendering for terminals: headline, reason, fix.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let paint = |code: &str, text: &str| {
        if use_color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    };
    format!(
        "{} {}\n  Reason: {}\n  {} {}",
        paint("31", "✗"),
        err.headline(),
        err,
        paint("36", "Fix:"),
        err.remediation()
    )
}
