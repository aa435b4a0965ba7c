//! In-memory backend.
//!
//! Each transaction works on a private copy of the committed tables and
//! publishes it on commit, so a rollback leaves no trace. Transactions are
//! serialized by a gate shared by all sessions of one database. Counters and
//! injectable faults make flush and commit behavior observable in tests.

use super::{
    ConstellationStore, Database, FeatureResolver, NewObservation, ObservationStore,
    PersistedObservation, ProcedureRegistry, StorageSession, StoreError, StoreResult,
    TemplateStore, UnitInterner, UnitRef,
};
use crate::model::{
    ConstellationKey, EncodingRule, FeatureDescriptor, FeatureRef, ObservationConstellation,
    ObservationType, ResultSchema, ResultTemplate,
};
use serde::Serialize;
use sos_common::{ConstellationId, FeatureId, ObservationId, TemplateId, UnitId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Operation counters of a [`MemoryDatabase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub transactions_begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub flushes: u64,
    pub clears: u64,
    pub rows_flushed: u64,
}

/// Faults to inject, counted per transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail the append with this zero-based index.
    pub fail_append_at: Option<usize>,
    /// Fail the flush with this one-based number.
    pub fail_flush_at: Option<usize>,
    pub fail_commit: bool,
}

#[derive(Debug, Clone)]
struct TemplateRow {
    identifier: TemplateId,
    schema: ResultSchema,
    encoding: EncodingRule,
    constellation: ConstellationId,
    feature: FeatureId,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: u64,
    constellations: BTreeMap<ConstellationId, ObservationConstellation>,
    procedures: BTreeSet<(String, String)>,
    features: BTreeMap<FeatureId, FeatureDescriptor>,
    related: BTreeMap<(String, FeatureId), Option<String>>,
    relations: BTreeSet<(FeatureId, FeatureId)>,
    units: BTreeMap<UnitId, String>,
    templates: Vec<TemplateRow>,
    observations: Vec<PersistedObservation>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn find_constellation(&self, key: &ConstellationKey) -> Option<&ObservationConstellation> {
        self.constellations.values().find(|c| &c.key == key)
    }

    fn hydrate(&self, row: &TemplateRow) -> StoreResult<ResultTemplate> {
        let constellation = self.constellations.get(&row.constellation).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "template {} references missing constellation {}",
                row.identifier, row.constellation
            ))
        })?;
        let feature = self.features.get(&row.feature).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "template {} references missing feature {}",
                row.identifier, row.feature
            ))
        })?;
        Ok(ResultTemplate {
            identifier: row.identifier.clone(),
            result_structure: row.schema.clone(),
            result_encoding: row.encoding.clone(),
            constellation: constellation.clone(),
            feature_of_interest: FeatureRef {
                id: row.feature,
                identifier: feature.identifier.clone(),
            },
        })
    }

    fn template_where(
        &self,
        pred: impl Fn(&TemplateRow, &ObservationConstellation) -> bool,
    ) -> StoreResult<Option<ResultTemplate>> {
        for row in &self.templates {
            if let Some(c) = self.constellations.get(&row.constellation) {
                if pred(row, c) {
                    return self.hydrate(row).map(Some);
                }
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: Mutex<Tables>,
    busy: Mutex<bool>,
    released: Condvar,
    faults: Mutex<FaultPlan>,
    stats: Mutex<StoreStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
}

/// Shared in-memory database. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        *self
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        *self
            .shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = plan;
    }

    pub fn clear_faults(&self) {
        self.set_faults(FaultPlan::default());
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            shared: Arc::clone(&self.shared),
            working: None,
            pending: Vec::new(),
            appended: 0,
            flushes: 0,
        }
    }
}

impl Database for MemoryDatabase {
    type Session = MemorySession;

    fn open_session(&self) -> StoreResult<MemorySession> {
        Ok(self.session())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

pub struct MemorySession {
    shared: Arc<Shared>,
    working: Option<Tables>,
    pending: Vec<NewObservation>,
    appended: usize,
    flushes: usize,
}

impl MemorySession {
    fn read<T>(&self, f: impl FnOnce(&Tables) -> StoreResult<T>) -> StoreResult<T> {
        match &self.working {
            Some(tables) => f(tables),
            None => f(&*lock(&self.shared.committed)?),
        }
    }

    fn tables_mut(&mut self) -> StoreResult<&mut Tables> {
        self.working.as_mut().ok_or(StoreError::NotInTransaction)
    }

    fn faults(&self) -> StoreResult<FaultPlan> {
        Ok(lock(&self.shared.faults)?.clone())
    }

    fn count(&self, f: impl FnOnce(&mut StoreStats)) {
        f(&mut self
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner));
    }

    fn acquire_gate(&self) -> StoreResult<()> {
        let mut busy = lock(&self.shared.busy)?;
        while *busy {
            busy = self
                .shared
                .released
                .wait(busy)
                .map_err(|_| StoreError::Backend("memory store gate poisoned".to_string()))?;
        }
        *busy = true;
        Ok(())
    }

    fn release_gate(&self) {
        let mut busy = self
            .shared
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *busy = false;
        self.shared.released.notify_one();
    }

    fn write_pending(&mut self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut self.pending);
        let written = pending.len();
        let tables = self.working.as_mut().ok_or(StoreError::NotInTransaction)?;
        for observation in pending {
            let id = ObservationId(tables.next_id());
            tables
                .observations
                .push(PersistedObservation::from_new(id, observation));
        }
        Ok(written)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.working.take().is_some() {
            self.release_gate();
        }
    }
}

impl StorageSession for MemorySession {
    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.working.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.acquire_gate()?;
        let snapshot = match lock(&self.shared.committed) {
            Ok(committed) => committed.clone(),
            Err(e) => {
                self.release_gate();
                return Err(e);
            }
        };
        self.working = Some(snapshot);
        self.pending.clear();
        self.appended = 0;
        self.flushes = 0;
        self.count(|s| s.transactions_begun += 1);
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.working.is_none() {
            return Err(StoreError::NotInTransaction);
        }
        if self.faults()?.fail_commit {
            return Err(StoreError::Injected("commit".to_string()));
        }
        self.write_pending()?;
        let tables = self.working.take().ok_or(StoreError::NotInTransaction)?;
        let published = lock(&self.shared.committed).map(|mut committed| *committed = tables);
        self.release_gate();
        published?;
        self.count(|s| s.commits += 1);
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.pending.clear();
        if self.working.take().is_some() {
            self.release_gate();
            self.count(|s| s.rollbacks += 1);
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.working.is_none() {
            return Err(StoreError::NotInTransaction);
        }
        self.flushes += 1;
        if self.faults()?.fail_flush_at == Some(self.flushes) {
            return Err(StoreError::Injected(format!("flush #{}", self.flushes)));
        }
        let written = self.write_pending()? as u64;
        self.count(|s| {
            s.flushes += 1;
            s.rows_flushed += written;
        });
        Ok(())
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.pending.clear();
        self.count(|s| s.clears += 1);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.working.is_some()
    }
}

impl ConstellationStore for MemorySession {
    fn find_constellation(
        &mut self,
        key: &ConstellationKey,
    ) -> StoreResult<Option<ObservationConstellation>> {
        self.read(|t| Ok(t.find_constellation(key).cloned()))
    }

    fn insert_constellation(
        &mut self,
        key: &ConstellationKey,
        observation_type: ObservationType,
    ) -> StoreResult<ObservationConstellation> {
        let tables = self.tables_mut()?;
        if tables.find_constellation(key).is_some() {
            return Err(StoreError::Constraint(format!("constellation {}", key)));
        }
        let constellation = ObservationConstellation {
            id: ConstellationId(tables.next_id()),
            key: key.clone(),
            observation_type,
        };
        tables
            .constellations
            .insert(constellation.id, constellation.clone());
        Ok(constellation)
    }

    fn set_observation_type(
        &mut self,
        id: ConstellationId,
        observation_type: ObservationType,
    ) -> StoreResult<()> {
        let constellation = self
            .tables_mut()?
            .constellations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("no constellation {}", id)))?;
        constellation.observation_type = observation_type;
        Ok(())
    }
}

impl ProcedureRegistry for MemorySession {
    fn register_procedure(&mut self, procedure: &str, offering: &str) -> StoreResult<bool> {
        Ok(self
            .tables_mut()?
            .procedures
            .insert((procedure.to_string(), offering.to_string())))
    }

    fn offerings_for_procedure(&mut self, procedure: &str) -> StoreResult<Vec<String>> {
        self.read(|t| {
            Ok(t.procedures
                .iter()
                .filter(|(p, _)| p == procedure)
                .map(|(_, o)| o.clone())
                .collect())
        })
    }
}

impl FeatureResolver for MemorySession {
    fn resolve_feature(&mut self, descriptor: &FeatureDescriptor) -> StoreResult<FeatureId> {
        let tables = self.tables_mut()?;
        let existing = tables
            .features
            .iter()
            .find(|(_, f)| f.identifier == descriptor.identifier)
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = FeatureId(tables.next_id());
        tables.features.insert(id, descriptor.clone());
        Ok(id)
    }

    fn feature_identifier(&mut self, id: FeatureId) -> StoreResult<Option<String>> {
        self.read(|t| Ok(t.features.get(&id).map(|f| f.identifier.clone())))
    }

    fn declare_related_feature(
        &mut self,
        offering: &str,
        feature: FeatureId,
        role: Option<&str>,
    ) -> StoreResult<bool> {
        let tables = self.tables_mut()?;
        let key = (offering.to_string(), feature);
        if tables.related.contains_key(&key) {
            return Ok(false);
        }
        tables.related.insert(key, role.map(str::to_string));
        Ok(true)
    }

    fn related_features(&mut self, offering: &str) -> StoreResult<Vec<FeatureId>> {
        self.read(|t| {
            Ok(t.related
                .keys()
                .filter(|(o, _)| o == offering)
                .map(|(_, f)| *f)
                .collect())
        })
    }

    fn ensure_feature_relation(
        &mut self,
        feature: FeatureId,
        related: FeatureId,
    ) -> StoreResult<bool> {
        Ok(self.tables_mut()?.relations.insert((feature, related)))
    }

    fn feature_relations(&mut self, feature: FeatureId) -> StoreResult<Vec<FeatureId>> {
        self.read(|t| {
            Ok(t.relations
                .iter()
                .filter(|(f, _)| *f == feature)
                .map(|(_, r)| *r)
                .collect())
        })
    }
}

impl UnitInterner for MemorySession {
    fn intern_or_create(&mut self, symbol: &str) -> StoreResult<UnitRef> {
        let tables = self.tables_mut()?;
        let existing = tables
            .units
            .iter()
            .find(|(_, s)| s.as_str() == symbol)
            .map(|(id, _)| *id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = UnitId(tables.next_id());
                tables.units.insert(id, symbol.to_string());
                id
            }
        };
        Ok(UnitRef {
            id,
            symbol: symbol.to_string(),
        })
    }
}

impl TemplateStore for MemorySession {
    fn insert_template(&mut self, template: &ResultTemplate) -> StoreResult<()> {
        let tables = self.tables_mut()?;
        let key = &template.constellation.key;
        for row in &tables.templates {
            if row.identifier == template.identifier {
                return Err(StoreError::Constraint(format!(
                    "template identifier {}",
                    template.identifier
                )));
            }
            let same_pair = tables.constellations.get(&row.constellation).is_some_and(|c| {
                c.key.offering == key.offering && c.key.observed_property == key.observed_property
            });
            if same_pair {
                return Err(StoreError::Constraint(format!(
                    "template for offering={}, observedProperty={}",
                    key.offering, key.observed_property
                )));
            }
        }
        tables.templates.push(TemplateRow {
            identifier: template.identifier.clone(),
            schema: template.result_structure.clone(),
            encoding: template.result_encoding.clone(),
            constellation: template.constellation.id,
            feature: template.feature_of_interest.id,
        });
        Ok(())
    }

    fn template_by_id(&mut self, identifier: &str) -> StoreResult<Option<ResultTemplate>> {
        self.read(|t| t.template_where(|row, _| row.identifier.as_str() == identifier))
    }

    fn template_for(
        &mut self,
        offering: &str,
        observed_property: &str,
    ) -> StoreResult<Option<ResultTemplate>> {
        self.read(|t| {
            t.template_where(|_, c| {
                c.key.offering == offering && c.key.observed_property == observed_property
            })
        })
    }

    fn list_templates(&mut self) -> StoreResult<Vec<ResultTemplate>> {
        self.read(|t| t.templates.iter().map(|row| t.hydrate(row)).collect())
    }
}

impl ObservationStore for MemorySession {
    fn append_observation(&mut self, observation: NewObservation) -> StoreResult<()> {
        if self.working.is_none() {
            return Err(StoreError::NotInTransaction);
        }
        let index = self.appended;
        if self.faults()?.fail_append_at == Some(index) {
            return Err(StoreError::Injected(format!("append #{}", index)));
        }
        self.appended += 1;
        self.pending.push(observation);
        Ok(())
    }

    fn observations(
        &mut self,
        constellation: ConstellationId,
        feature: Option<FeatureId>,
    ) -> StoreResult<Vec<PersistedObservation>> {
        self.read(|t| {
            Ok(t.observations
                .iter()
                .filter(|o| o.constellation == constellation)
                .filter(|o| feature.map_or(true, |f| o.feature == f))
                .cloned()
                .collect())
        })
    }

    fn observation_count(&mut self) -> StoreResult<u64> {
        self.read(|t| Ok(t.observations.len() as u64))
    }
}
