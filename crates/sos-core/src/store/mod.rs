//! Storage collaborator.
//!
//! The pipeline talks to storage through narrow traits, all implemented by a
//! single session type per backend and bundled by [`Store`]. A [`Database`]
//! opens one session per call. Writes are only accepted inside a
//! transaction; observation appends are buffered until [`StorageSession::flush`]
//! or commit.

pub mod memory;
pub mod sqlite;

pub use memory::{FaultPlan, MemoryDatabase, MemorySession, StoreStats};
pub use sqlite::{SqliteDatabase, SqliteSession};

use crate::model::{
    ConstellationKey, FeatureDescriptor, ObservationConstellation, ObservationType, ResultTemplate,
    TimeValue, TypedValue,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sos_common::{ConstellationId, Error, FeatureId, ObservationId, UnitId};
use thiserror::Error;
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no transaction is active")]
    NotInTransaction,

    #[error("a transaction is already active on this session")]
    TransactionActive,

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("injected fault: {0}")]
    Injected(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::StorageFailure(err.to_string())
    }
}

/// Unit of measure as referenced by an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub id: UnitId,
    pub symbol: String,
}

/// The payload row an observation was unfolded from: one batch per
/// insert call, rows numbered from zero within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowOrigin {
    pub batch: String,
    pub row: u32,
}

impl RowOrigin {
    pub fn new(batch: impl Into<String>, row: u32) -> Self {
        RowOrigin {
            batch: batch.into(),
            row,
        }
    }
}

/// Observation handed to [`ObservationStore::append_observation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub constellation: ConstellationId,
    pub feature: FeatureId,
    pub origin: RowOrigin,
    pub phenomenon_time: TimeValue,
    pub result_time: DateTime<FixedOffset>,
    /// Definition URI of the field the value came from.
    pub definition: String,
    pub value: TypedValue,
    pub unit: Option<UnitRef>,
}

/// Observation as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedObservation {
    pub id: ObservationId,
    pub constellation: ConstellationId,
    pub feature: FeatureId,
    pub origin: RowOrigin,
    pub phenomenon_time: TimeValue,
    pub result_time: DateTime<FixedOffset>,
    pub definition: String,
    pub value: TypedValue,
    pub unit: Option<UnitRef>,
}

impl PersistedObservation {
    pub(crate) fn from_new(id: ObservationId, new: NewObservation) -> Self {
        PersistedObservation {
            id,
            constellation: new.constellation,
            feature: new.feature,
            origin: new.origin,
            phenomenon_time: new.phenomenon_time,
            result_time: new.result_time,
            definition: new.definition,
            value: new.value,
            unit: new.unit,
        }
    }
}

/// Transaction and buffer control.
pub trait StorageSession {
    fn begin_transaction(&mut self) -> StoreResult<()>;

    /// Commit, writing any rows still buffered.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discard the transaction and the buffer. No-op without a transaction.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Write buffered rows into the open transaction without committing.
    fn flush(&mut self) -> StoreResult<()>;

    /// Drop the in-process buffer.
    fn clear(&mut self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;
}

pub trait ConstellationStore {
    fn find_constellation(
        &mut self,
        key: &ConstellationKey,
    ) -> StoreResult<Option<ObservationConstellation>>;

    fn insert_constellation(
        &mut self,
        key: &ConstellationKey,
        observation_type: ObservationType,
    ) -> StoreResult<ObservationConstellation>;

    fn set_observation_type(
        &mut self,
        id: ConstellationId,
        observation_type: ObservationType,
    ) -> StoreResult<()>;
}

pub trait ProcedureRegistry {
    /// Returns `true` when the pair was not registered before.
    fn register_procedure(&mut self, procedure: &str, offering: &str) -> StoreResult<bool>;

    fn offerings_for_procedure(&mut self, procedure: &str) -> StoreResult<Vec<String>>;
}

pub trait FeatureResolver {
    /// Find a feature by identifier, creating it when unknown.
    fn resolve_feature(&mut self, descriptor: &FeatureDescriptor) -> StoreResult<FeatureId>;

    fn feature_identifier(&mut self, id: FeatureId) -> StoreResult<Option<String>>;

    fn declare_related_feature(
        &mut self,
        offering: &str,
        feature: FeatureId,
        role: Option<&str>,
    ) -> StoreResult<bool>;

    fn related_features(&mut self, offering: &str) -> StoreResult<Vec<FeatureId>>;

    /// Returns `true` when the edge was created.
    fn ensure_feature_relation(&mut self, feature: FeatureId, related: FeatureId)
        -> StoreResult<bool>;

    fn feature_relations(&mut self, feature: FeatureId) -> StoreResult<Vec<FeatureId>>;
}

pub trait UnitInterner {
    fn intern_or_create(&mut self, symbol: &str) -> StoreResult<UnitRef>;
}

pub trait TemplateStore {
    fn insert_template(&mut self, template: &ResultTemplate) -> StoreResult<()>;

    fn template_by_id(&mut self, identifier: &str) -> StoreResult<Option<ResultTemplate>>;

    fn template_for(
        &mut self,
        offering: &str,
        observed_property: &str,
    ) -> StoreResult<Option<ResultTemplate>>;

    fn list_templates(&mut self) -> StoreResult<Vec<ResultTemplate>>;
}

pub trait ObservationStore {
    /// Buffer one observation. Visible to reads after flush or commit.
    fn append_observation(&mut self, observation: NewObservation) -> StoreResult<()>;

    /// Observations of a constellation in storage order.
    fn observations(
        &mut self,
        constellation: ConstellationId,
        feature: Option<FeatureId>,
    ) -> StoreResult<Vec<PersistedObservation>>;

    fn observation_count(&mut self) -> StoreResult<u64>;
}

/// Everything the ingestion pipeline needs from one session.
pub trait Store:
    StorageSession
    + ConstellationStore
    + ProcedureRegistry
    + FeatureResolver
    + UnitInterner
    + TemplateStore
    + ObservationStore
{
}

impl<T> Store for T where
    T: StorageSession
        + ConstellationStore
        + ProcedureRegistry
        + FeatureResolver
        + UnitInterner
        + TemplateStore
        + ObservationStore
{
}

/// Session factory.
pub trait Database: Send + Sync {
    type Session: Store;

    fn open_session(&self) -> StoreResult<Self::Session>;

    fn backend_name(&self) -> &'static str;
}

/// Run `f` inside one transaction.
///
/// Commits once when `f` succeeds. Rolls back when `f` or the commit fails,
/// then surfaces the original error.
pub fn in_transaction<S, T, F>(session: &mut S, f: F) -> sos_common::Result<T>
where
    S: StorageSession + ?Sized,
    F: FnOnce(&mut S) -> sos_common::Result<T>,
{
    session.begin_transaction()?;
    let outcome = f(session).and_then(|value| {
        session.commit()?;
        Ok(value)
    });
    if outcome.is_err() && session.in_transaction() {
        if let Err(e) = session.rollback() {
            warn!(error = %e, "rollback failed");
        }
    }
    outcome
}
