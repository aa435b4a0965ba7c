//! Batched, transactional persistence of unfolded observations.
//!
//! Rows are appended to the session buffer and flushed every
//! `flush_threshold` rows to bound memory. Flushing never commits: the
//! whole batch commits once, or rolls back entirely.

use crate::store::{
    in_transaction, NewObservation, ObservationStore, RowOrigin, StorageSession, UnitInterner,
    UnitRef,
};
use crate::unfold::UnfoldedObservation;
use serde::Serialize;
use sos_common::{ConstellationId, Error, FeatureId, Result};
use sos_config::DEFAULT_FLUSH_THRESHOLD;
use std::collections::HashMap;
use tracing::debug;

/// What a persisted batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub persisted: usize,
    pub flushes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchPersister {
    flush_threshold: usize,
}

impl Default for BatchPersister {
    fn default() -> Self {
        BatchPersister::new(DEFAULT_FLUSH_THRESHOLD)
    }
}

impl BatchPersister {
    /// A threshold of zero is treated as one.
    pub fn new(flush_threshold: usize) -> Self {
        BatchPersister {
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Persist `rows` in a transaction of their own.
    pub fn persist_all<S>(
        &self,
        session: &mut S,
        rows: &[UnfoldedObservation],
        constellation: ConstellationId,
        feature: FeatureId,
    ) -> Result<PersistReport>
    where
        S: StorageSession + ObservationStore + UnitInterner + ?Sized,
    {
        in_transaction(session, |s| self.append_rows(s, rows, constellation, feature))
    }

    /// Append `rows` to an already open transaction. Every call opens a new
    /// batch, so rows of different calls never share a [`RowOrigin`].
    pub fn append_rows<S>(
        &self,
        session: &mut S,
        rows: &[UnfoldedObservation],
        constellation: ConstellationId,
        feature: FeatureId,
    ) -> Result<PersistReport>
    where
        S: StorageSession + ObservationStore + UnitInterner + ?Sized,
    {
        let total = rows.len();
        let batch = new_batch_id();
        let mut units: HashMap<&str, UnitRef> = HashMap::new();
        let mut report = PersistReport::default();

        for (index, row) in rows.iter().enumerate() {
            let unit = match row.unit.as_deref() {
                Some(symbol) => Some(match units.get(symbol) {
                    Some(unit) => unit.clone(),
                    None => {
                        let unit = session
                            .intern_or_create(symbol)
                            .map_err(|e| row_failure(index, total, e))?;
                        units.insert(symbol, unit.clone());
                        unit
                    }
                }),
                None => None,
            };
            let row_index = u32::try_from(row.row).map_err(|_| {
                Error::invalid("resultValues", format!("row {} is out of range", row.row))
            })?;
            session
                .append_observation(NewObservation {
                    constellation,
                    feature,
                    origin: RowOrigin::new(batch.as_str(), row_index),
                    phenomenon_time: row.phenomenon_time.clone(),
                    result_time: row.result_time,
                    definition: row.definition.clone(),
                    value: row.value.clone(),
                    unit,
                })
                .map_err(|e| row_failure(index, total, e))?;
            report.persisted += 1;

            if report.persisted % self.flush_threshold == 0 {
                session
                    .flush()
                    .map_err(|e| row_failure(index, total, e))?;
                session.clear()?;
                report.flushes += 1;
                debug!("Saved {}/{} observations", report.persisted, total);
            }
        }
        Ok(report)
    }
}

fn new_batch_id() -> String {
    format!("batch-{}", uuid::Uuid::new_v4().simple())
}

fn row_failure(index: usize, total: usize, err: impl std::fmt::Display) -> Error {
    Error::StorageFailure(format!(
        "observation {} of {} could not be stored: {}",
        index + 1,
        total,
        err
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::parse_instant;
    use crate::model::{TimeValue, TypedValue};
    use crate::store::{FaultPlan, MemoryDatabase};

    fn rows(n: usize) -> Vec<UnfoldedObservation> {
        let at = parse_instant("2012-11-19T00:00:00Z").unwrap();
        (0..n)
            .map(|i| UnfoldedObservation {
                row: i,
                phenomenon_time: TimeValue::instant(at),
                result_time: at,
                definition: "urn:temp".into(),
                value: TypedValue::Quantity(i as f64),
                unit: Some("Cel".into()),
            })
            .collect()
    }

    #[test]
    fn test_flush_cadence() {
        for (n, flushes) in [(49, 0), (50, 1), (51, 1), (120, 2)] {
            let db = MemoryDatabase::new();
            let mut session = db.session();
            let report = BatchPersister::new(50)
                .persist_all(&mut session, &rows(n), ConstellationId(1), FeatureId(2))
                .unwrap();
            assert_eq!(report.persisted, n);
            assert_eq!(report.flushes, flushes);
            assert_eq!(session.observation_count().unwrap(), n as u64);
            assert_eq!(db.stats().commits, 1);
            assert_eq!(db.stats().flushes, flushes as u64);
        }
    }

    #[test]
    fn test_units_interned_once() {
        let db = MemoryDatabase::new();
        let mut session = db.session();
        BatchPersister::default()
            .persist_all(&mut session, &rows(3), ConstellationId(1), FeatureId(2))
            .unwrap();
        let stored = session.observations(ConstellationId(1), None).unwrap();
        assert!(stored.iter().all(|o| o.unit == stored[0].unit));
    }

    #[test]
    fn test_failure_mid_batch_persists_nothing() {
        let db = MemoryDatabase::new();
        db.set_faults(FaultPlan {
            fail_append_at: Some(75),
            ..FaultPlan::default()
        });
        let mut session = db.session();
        let err = BatchPersister::new(50)
            .persist_all(&mut session, &rows(120), ConstellationId(1), FeatureId(2))
            .unwrap_err();
        assert_eq!(err.code(), 60);
        assert!(err.to_string().contains("observation 76 of 120"));
        assert_eq!(session.observation_count().unwrap(), 0);
        assert_eq!(db.stats().commits, 0);
        assert_eq!(db.stats().rollbacks, 1);
    }

    #[test]
    fn test_row_origin_kept_per_call() {
        let db = MemoryDatabase::new();
        let mut session = db.session();
        let persister = BatchPersister::default();
        persister
            .persist_all(&mut session, &rows(2), ConstellationId(1), FeatureId(2))
            .unwrap();
        persister
            .persist_all(&mut session, &rows(2), ConstellationId(1), FeatureId(2))
            .unwrap();

        let stored = session.observations(ConstellationId(1), None).unwrap();
        let rows: Vec<u32> = stored.iter().map(|o| o.origin.row).collect();
        assert_eq!(rows, vec![0, 1, 0, 1]);
        assert_eq!(stored[0].origin.batch, stored[1].origin.batch);
        assert_ne!(stored[1].origin.batch, stored[2].origin.batch);
        assert!(stored[0].origin.batch.starts_with("batch-"));
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        assert_eq!(BatchPersister::new(0).flush_threshold(), 1);
    }
}
