//! Sensor Observation Ingest Core Library
//!
//! Bulk ingestion of compact encoded sensor results:
//! - Result templates binding a schema and encoding to a constellation
//! - Decoding and encoding of token/block payloads
//! - Observation-type consistency per (procedure, observedProperty, offering)
//! - Unfolding rows into single-value observations
//! - Batched, all-or-nothing persistence
//!
//! The binary entry point is in `main.rs`.

pub mod logging;

pub mod codec;
pub mod config;
pub mod constellation;
pub mod exit_codes;
pub mod locks;
pub mod model;
pub mod persist;
pub mod request;
pub mod schema;
pub mod service;
pub mod store;
pub mod template;
pub mod unfold;

pub use codec::{DecodeError, DecodedRow, EncodeError, EncodeErrorKind, ResultCodec};
pub use constellation::{ConstellationValidator, Resolution, Transition};
pub use persist::{BatchPersister, PersistReport};
pub use service::{IngestPhase, InsertResultSummary, SosService};
pub use template::{Registered, TemplateRegistration, TemplateRegistry};
pub use unfold::{MultiRowObservation, ObservationUnfolder, UnfoldedObservation};
