//! Observation-type consistency of (procedure, observedProperty, offering).
//!
//! A constellation is created with a concrete type, or promoted exactly once
//! from the undefined sentinel. After that every request must name the same
//! type. Resolution runs inside the caller's transaction so a later failure
//! rolls a creation or promotion back with everything else.

use crate::model::{ConstellationKey, ObservationConstellation, ObservationType};
use crate::store::{ConstellationStore, FeatureResolver, ProcedureRegistry};
use serde::Serialize;
use sos_common::{Error, FeatureId, Result};
use tracing::{debug, info};

/// What resolving a constellation did to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Created,
    Promoted { from: ObservationType },
    Unchanged,
}

impl Transition {
    pub fn label(&self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::Promoted { .. } => "promoted",
            Transition::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub constellation: ObservationConstellation,
    pub transition: Transition,
}

#[derive(Debug, Clone, Default)]
pub struct ConstellationValidator {
    require_registered_procedure: bool,
}

impl ConstellationValidator {
    pub fn new(require_registered_procedure: bool) -> Self {
        ConstellationValidator {
            require_registered_procedure,
        }
    }

    /// Find the constellation for `key`, creating or promoting it as needed.
    pub fn resolve_or_create<S>(
        &self,
        session: &mut S,
        key: &ConstellationKey,
        requested: ObservationType,
    ) -> Result<Resolution>
    where
        S: ConstellationStore + ProcedureRegistry + ?Sized,
    {
        if !requested.is_concrete() {
            return Err(Error::invalid(
                "observationType",
                "a concrete observation type is required",
            ));
        }
        self.check_procedure(session, key)?;

        let Some(existing) = session.find_constellation(key)? else {
            let constellation = session.insert_constellation(key, requested)?;
            session.register_procedure(&key.procedure, &key.offering)?;
            info!(constellation = %constellation.id, %key, observation_type = %requested, "constellation created");
            return Ok(Resolution {
                constellation,
                transition: Transition::Created,
            });
        };

        match existing.observation_type {
            ObservationType::Undefined => {
                session.set_observation_type(existing.id, requested)?;
                info!(constellation = %existing.id, %key, observation_type = %requested, "constellation promoted");
                Ok(Resolution {
                    constellation: ObservationConstellation {
                        observation_type: requested,
                        ..existing
                    },
                    transition: Transition::Promoted {
                        from: ObservationType::Undefined,
                    },
                })
            }
            current if current == requested => {
                debug!(constellation = %existing.id, "constellation matches");
                Ok(Resolution {
                    constellation: existing,
                    transition: Transition::Unchanged,
                })
            }
            current => Err(Error::ObservationTypeConflict {
                procedure: key.procedure.clone(),
                observed_property: key.observed_property.clone(),
                offering: key.offering.clone(),
                existing: current.to_string(),
                requested: requested.to_string(),
            }),
        }
    }

    fn check_procedure<S>(&self, session: &mut S, key: &ConstellationKey) -> Result<()>
    where
        S: ProcedureRegistry + ?Sized,
    {
        if !self.require_registered_procedure {
            return Ok(());
        }
        let offerings = session.offerings_for_procedure(&key.procedure)?;
        if offerings.iter().any(|o| o == &key.offering) {
            Ok(())
        } else {
            Err(Error::invalid(
                "procedure",
                format!(
                    "procedure '{}' is not registered for offering '{}'",
                    key.procedure, key.offering
                ),
            ))
        }
    }

    /// Link `feature` to every related feature declared for `offering`.
    ///
    /// Returns the number of edges created; repeating the call creates none.
    pub fn propagate_related_features<S>(
        &self,
        session: &mut S,
        offering: &str,
        feature: FeatureId,
    ) -> Result<usize>
    where
        S: FeatureResolver + ?Sized,
    {
        let mut created = 0;
        for related in session.related_features(offering)? {
            if related != feature && session.ensure_feature_relation(feature, related)? {
                created += 1;
            }
        }
        if created > 0 {
            debug!(%feature, offering, created, "related features linked");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureDescriptor;
    use crate::store::{MemoryDatabase, StorageSession};

    fn key() -> ConstellationKey {
        ConstellationKey::new("urn:proc:1", "temp", "O1")
    }

    #[test]
    fn test_create_then_unchanged() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        let v = ConstellationValidator::default();

        let first = v
            .resolve_or_create(&mut s, &key(), ObservationType::Measurement)
            .unwrap();
        assert_eq!(first.transition, Transition::Created);
        let second = v
            .resolve_or_create(&mut s, &key(), ObservationType::Measurement)
            .unwrap();
        assert_eq!(second.transition, Transition::Unchanged);
        assert_eq!(first.constellation.id, second.constellation.id);
        assert_eq!(s.offerings_for_procedure("urn:proc:1").unwrap(), vec!["O1"]);
    }

    #[test]
    fn test_promotion_from_sentinel() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        s.insert_constellation(&key(), ObservationType::Undefined)
            .unwrap();

        let r = ConstellationValidator::default()
            .resolve_or_create(&mut s, &key(), ObservationType::CountObservation)
            .unwrap();
        assert_eq!(
            r.transition,
            Transition::Promoted {
                from: ObservationType::Undefined
            }
        );
        assert_eq!(
            s.find_constellation(&key()).unwrap().unwrap().observation_type,
            ObservationType::CountObservation
        );
    }

    #[test]
    fn test_conflict_names_existing_type_and_leaves_it() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        let v = ConstellationValidator::default();
        v.resolve_or_create(&mut s, &key(), ObservationType::Measurement)
            .unwrap();

        let err = v
            .resolve_or_create(&mut s, &key(), ObservationType::CountObservation)
            .unwrap_err();
        assert_eq!(err.code(), 30);
        assert!(err.to_string().contains("Measurement"));
        assert_eq!(
            s.find_constellation(&key()).unwrap().unwrap().observation_type,
            ObservationType::Measurement
        );
    }

    #[test]
    fn test_sentinel_request_rejected() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        let err = ConstellationValidator::default()
            .resolve_or_create(&mut s, &key(), ObservationType::Undefined)
            .unwrap_err();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_registered_procedure_required() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        let v = ConstellationValidator::new(true);

        let err = v
            .resolve_or_create(&mut s, &key(), ObservationType::Measurement)
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));

        s.register_procedure("urn:proc:1", "O1").unwrap();
        assert!(v
            .resolve_or_create(&mut s, &key(), ObservationType::Measurement)
            .is_ok());
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let db = MemoryDatabase::new();
        let mut s = db.session();
        s.begin_transaction().unwrap();
        let station = s.resolve_feature(&FeatureDescriptor::new("station")).unwrap();
        let river = s.resolve_feature(&FeatureDescriptor::new("river")).unwrap();
        let lake = s.resolve_feature(&FeatureDescriptor::new("lake")).unwrap();
        s.declare_related_feature("O1", river, Some("parent")).unwrap();
        s.declare_related_feature("O1", lake, None).unwrap();
        s.declare_related_feature("O1", station, None).unwrap();

        let v = ConstellationValidator::default();
        assert_eq!(v.propagate_related_features(&mut s, "O1", station).unwrap(), 2);
        let edges = s.feature_relations(station).unwrap();
        assert_eq!(v.propagate_related_features(&mut s, "O1", station).unwrap(), 0);
        assert_eq!(s.feature_relations(station).unwrap(), edges);
        assert_eq!(edges.len(), 2);
    }
}
