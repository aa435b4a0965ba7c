//! Identity types for stored entities.
//!
//! Templates are addressed by an opaque string identifier that callers may
//! choose. Everything else is referenced by a numeric surrogate key assigned
//! by the storage backend, so observations hold constellations and features
//! by id rather than by value.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result template identifier.
///
/// Generated format: `tmpl-YYYYMMDD-<12 hex chars>`
/// Example: `tmpl-20260115-3f2a9c01b7de`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        let now = chrono::Utc::now();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        TemplateId(format!("tmpl-{}-{}", now.format("%Y%m%d"), &uuid[..12]))
    }

    /// Parse a caller-supplied identifier.
    ///
    /// Identifiers must be non-empty and free of whitespace and control
    /// characters; anything else is accepted verbatim.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return None;
        }
        Some(TemplateId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

surrogate_id!(
    /// Stored observation constellation.
    ConstellationId
);
surrogate_id!(
    /// Stored feature of interest.
    FeatureId
);
surrogate_id!(
    /// Interned unit of measure.
    UnitId
);
surrogate_id!(
    /// Stored single-value observation.
    ObservationId
);
