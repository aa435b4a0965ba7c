//! Sensor observation ingest common types, IDs, and errors.
//!
//! This crate provides foundational types shared across sos-core modules:
//! - Identifier newtypes for templates, constellations, features and units
//! - The request-level error taxonomy with stable codes
//! - Output formats

pub mod error;
pub mod id;
pub mod output;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::{ConstellationId, FeatureId, ObservationId, TemplateId, UnitId};
pub use output::OutputFormat;

/// Schema version of the JSON documents produced and consumed by the service.
pub const SCHEMA_VERSION: &str = "1.0.0";
