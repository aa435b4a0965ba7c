//! Exit codes for the sos-ingest CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0: success
//! - 10-19: request and environment errors (fixable by the caller)
//! - 20-29: storage and internal errors

use sos_common::{Error, ErrorCategory};

/// Process exit codes. Stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Request completed.
    Success = 0,

    // ========================================================================
    // Request / Environment Errors (10-19)
    // ========================================================================
    /// Invalid command-line arguments or unreadable request document
    ArgsError = 10,

    /// Request parameters rejected (missing, malformed or unsupported shape)
    InvalidRequest = 11,

    /// Request contradicts stored state (type conflict, duplicate template)
    Conflict = 12,

    /// Referenced template does not exist
    NotFound = 13,

    /// Configuration could not be loaded or validated
    ConfigError = 14,

    // ========================================================================
    // Storage / Internal Errors (20-29)
    // ========================================================================
    /// Storage backend failed; nothing was persisted
    StorageError = 20,

    IoError = 21,

    /// Internal error (bug - please report)
    InternalError = 22,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Errors the caller can fix by changing the request or environment.
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&self.as_i32())
    }

    pub fn is_error(self) -> bool {
        self.as_i32() >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::InvalidRequest => "ERR_INVALID_REQUEST",
            ExitCode::Conflict => "ERR_CONFLICT",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::StorageError => "ERR_STORAGE",
            ExitCode::IoError => "ERR_IO",
            ExitCode::InternalError => "ERR_INTERNAL",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Request | ErrorCategory::Shape => ExitCode::InvalidRequest,
            ErrorCategory::Conflict => ExitCode::Conflict,
            ErrorCategory::NotFound => ExitCode::NotFound,
            ErrorCategory::Storage => ExitCode::StorageError,
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Io => match err {
                Error::Json(_) => ExitCode::ArgsError,
                _ => ExitCode::IoError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
