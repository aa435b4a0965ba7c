//! End-to-end ingestion tests against the in-memory backend.
//!
//! These tests drive `SosService` the way a request handler would and use
//! the store counters and fault plan to observe flush and transaction
//! behavior.

use chrono::{Duration, TimeZone, Utc};
use sos_common::Error;
use sos_config::ServiceSettings;
use sos_core::model::schema::{Field, FieldKind};
use sos_core::model::{
    ConstellationKey, EncodingRule, FeatureDescriptor, ObservationType, ResultSchema, TypedValue,
};
use sos_core::request::{GetResultRequest, InsertResultRequest};
use sos_core::store::{
    ConstellationStore, Database, FaultPlan, FeatureResolver, MemoryDatabase, ObservationStore,
    StorageSession,
};
use sos_core::{
    ConstellationValidator, IngestPhase, ResultCodec, SosService, TemplateRegistration,
    Transition,
};

const TEMPERATURE: &str = "http://sweet.jpl.nasa.gov/2.0/atmoThermo.owl#Temperature";

fn service() -> SosService<MemoryDatabase> {
    SosService::new(MemoryDatabase::new(), &ServiceSettings::default())
}

fn temperature_schema() -> ResultSchema {
    ResultSchema::new(vec![
        Field::phenomenon_time(),
        Field::value("temperature", FieldKind::Quantity, TEMPERATURE).with_unit("Cel"),
    ])
    .unwrap()
}

fn registration(offering: &str, property: &str, observation_type: ObservationType) -> TemplateRegistration {
    TemplateRegistration {
        identifier: None,
        key: ConstellationKey::new("urn:ogc:object:Sensor:thermometer-1", property, offering),
        observation_type,
        schema: temperature_schema(),
        encoding: EncodingRule::new(",", ";").unwrap(),
        feature: FeatureDescriptor::new("urn:station:elbe-7"),
    }
}

fn register(service: &SosService<MemoryDatabase>, offering: &str) -> String {
    service
        .register(&registration(offering, "P1", ObservationType::Measurement))
        .unwrap()
        .template
        .identifier
        .to_string()
}

/// `rows` blocks one minute apart, without a count prefix.
fn payload(rows: usize) -> String {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    (0..rows)
        .map(|i| {
            let at = start + Duration::minutes(i as i64);
            format!("{},{}.5", at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true), i)
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn stored(db: &MemoryDatabase) -> u64 {
    db.open_session().unwrap().observation_count().unwrap()
}

// ============================================================================
// Example scenarios
// ============================================================================

#[test]
fn two_row_payload_with_count_prefix_decodes() {
    let rows = ResultCodec::default()
        .decode(
            "2;2012-11-19T00:00:00Z,5.2;2012-11-19T00:10:00Z,5.4",
            &EncodingRule::new(",", ";").unwrap(),
            &temperature_schema(),
        )
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].phenomenon_time.as_ref().unwrap().to_token(),
        "2012-11-19T00:00:00Z"
    );
    assert_eq!(rows[0].values, vec![TypedValue::Quantity(5.2)]);
    assert_eq!(
        rows[1].phenomenon_time.as_ref().unwrap().to_token(),
        "2012-11-19T00:10:00Z"
    );
    assert_eq!(rows[1].values, vec![TypedValue::Quantity(5.4)]);
}

#[test]
fn conflicting_type_for_same_pair_names_existing_type() {
    let service = service();
    service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap();

    let err = service
        .register(&registration("O1", "P1", ObservationType::CountObservation))
        .unwrap_err();
    assert!(matches!(err, Error::ObservationTypeConflict { .. }));
    assert_eq!(err.code(), 30);
    assert!(err.to_string().contains("Measurement"));
}

#[test]
fn short_block_fails_with_block_index_and_persists_nothing() {
    let service = service();
    let mut wide = registration("O1", "P1", ObservationType::Measurement);
    wide.schema = ResultSchema::new(vec![
        Field::phenomenon_time(),
        Field::value("a", FieldKind::Quantity, "urn:a"),
        Field::value("b", FieldKind::Quantity, "urn:b"),
        Field::value("c", FieldKind::Quantity, "urn:c"),
    ])
    .unwrap();
    let id = service.register(&wide).unwrap().template.identifier.to_string();

    let err = service
        .insert_result(&InsertResultRequest::new(
            &id,
            "2024-03-01T00:00:00Z,1,2,3;2024-03-01T00:01:00Z,1,2",
        ))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameterValue { .. }));
    assert!(err.to_string().contains("block 1"), "{}", err);
    assert_eq!(stored(service.database()), 0);
}

#[test]
fn hundred_twenty_rows_flush_twice_and_commit_once() {
    let service = service();
    let id = register(&service, "O1");
    let before = service.database().stats();

    let summary = service
        .insert_result(&InsertResultRequest::new(&id, payload(120)))
        .unwrap();
    let after = service.database().stats();

    assert_eq!(summary.observations_persisted, 120);
    assert_eq!(summary.flushes, 2);
    assert_eq!(after.flushes - before.flushes, 2);
    assert_eq!(after.commits - before.commits, 1);
    assert_eq!(after.rollbacks, before.rollbacks);
    assert_eq!(stored(service.database()), 120);
}

// ============================================================================
// Flush transparency
// ============================================================================

#[test]
fn row_counts_around_flush_threshold_are_preserved() {
    for rows in [49usize, 50, 51] {
        let service = service();
        let id = register(&service, "O1");
        let summary = service
            .insert_result(&InsertResultRequest::new(&id, payload(rows)))
            .unwrap();

        assert_eq!(summary.rows_decoded, rows);
        assert_eq!(summary.observations_persisted, rows);
        assert_eq!(summary.flushes, rows / 50);
        assert_eq!(stored(service.database()), rows as u64, "{} rows", rows);
    }
}

#[test]
fn configured_threshold_drives_flush_count() {
    let mut settings = ServiceSettings::default();
    settings.ingest.flush_threshold = 10;
    let service = SosService::new(MemoryDatabase::new(), &settings);
    let id = register(&service, "O1");

    let summary = service
        .insert_result(&InsertResultRequest::new(&id, payload(35)))
        .unwrap();
    assert_eq!(service.flush_threshold(), 10);
    assert_eq!(summary.flushes, 3);
    assert_eq!(stored(service.database()), 35);
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn failure_after_a_flush_leaves_zero_rows() {
    let service = service();
    let id = register(&service, "O1");
    service.database().set_faults(FaultPlan {
        fail_append_at: Some(75),
        ..Default::default()
    });

    let err = service
        .insert_result(&InsertResultRequest::new(&id, payload(120)))
        .unwrap_err();
    assert!(matches!(err, Error::StorageFailure(_)));
    assert_eq!(stored(service.database()), 0);

    service.database().clear_faults();
    service
        .insert_result(&InsertResultRequest::new(&id, payload(120)))
        .unwrap();
    assert_eq!(stored(service.database()), 120);
}

#[test]
fn failing_flush_and_commit_roll_back() {
    for plan in [
        FaultPlan {
            fail_flush_at: Some(2),
            ..Default::default()
        },
        FaultPlan {
            fail_commit: true,
            ..Default::default()
        },
    ] {
        let service = service();
        let id = register(&service, "O1");
        let before = service.database().stats();
        service.database().set_faults(plan.clone());

        assert!(service
            .insert_result(&InsertResultRequest::new(&id, payload(120)))
            .is_err());
        assert_eq!(stored(service.database()), 0, "{:?}", plan);
        assert_eq!(service.database().stats().rollbacks - before.rollbacks, 1);
    }
}

// ============================================================================
// Constellations
// ============================================================================

#[test]
fn promotion_is_undone_when_the_transaction_fails() {
    let db = MemoryDatabase::new();
    let key = ConstellationKey::new("urn:ogc:object:Sensor:thermometer-1", "P1", "O1");
    {
        let mut session = db.open_session().unwrap();
        session.begin_transaction().unwrap();
        session
            .insert_constellation(&key, ObservationType::Undefined)
            .unwrap();
        session.commit().unwrap();
    }

    let service = SosService::new(db.clone(), &ServiceSettings::default());
    db.set_faults(FaultPlan {
        fail_commit: true,
        ..Default::default()
    });
    assert!(service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .is_err());
    let stored_type = db
        .open_session()
        .unwrap()
        .find_constellation(&key)
        .unwrap()
        .unwrap()
        .observation_type;
    assert_eq!(stored_type, ObservationType::Undefined);

    db.clear_faults();
    let registered = service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap();
    assert_eq!(
        registered.transition,
        Transition::Promoted {
            from: ObservationType::Undefined
        }
    );
    assert_eq!(
        registered.template.constellation.observation_type,
        ObservationType::Measurement
    );
}

#[test]
fn conflicting_resolution_keeps_stored_type() {
    let db = MemoryDatabase::new();
    let validator = ConstellationValidator::default();
    let key = ConstellationKey::new("urn:proc", "P1", "O1");
    let mut session = db.open_session().unwrap();
    session.begin_transaction().unwrap();
    validator
        .resolve_or_create(&mut session, &key, ObservationType::TruthObservation)
        .unwrap();

    for requested in [ObservationType::Measurement, ObservationType::TextObservation] {
        assert!(validator
            .resolve_or_create(&mut session, &key, requested)
            .is_err());
    }
    let constellation = session.find_constellation(&key).unwrap().unwrap();
    assert_eq!(constellation.observation_type, ObservationType::TruthObservation);
    session.rollback().unwrap();
}

#[test]
fn related_feature_propagation_is_idempotent() {
    let db = MemoryDatabase::new();
    let validator = ConstellationValidator::default();
    let mut session = db.open_session().unwrap();
    session.begin_transaction().unwrap();
    let station = session
        .resolve_feature(&FeatureDescriptor::new("urn:station:elbe-7"))
        .unwrap();
    for parent in ["urn:river:elbe", "urn:basin:north-sea"] {
        let id = session
            .resolve_feature(&FeatureDescriptor::new(parent))
            .unwrap();
        session
            .declare_related_feature("O1", id, Some("parent"))
            .unwrap();
    }

    let first = validator
        .propagate_related_features(&mut session, "O1", station)
        .unwrap();
    let edges = session.feature_relations(station).unwrap();
    let second = validator
        .propagate_related_features(&mut session, "O1", station)
        .unwrap();

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(session.feature_relations(station).unwrap(), edges);
    session.commit().unwrap();
}

#[test]
fn declared_related_features_link_new_templates() {
    let service = service();
    assert!(service
        .declare_related_feature("O1", &FeatureDescriptor::new("urn:river:elbe"), Some("parent"))
        .unwrap());
    let registered = service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap();
    assert_eq!(registered.related_links, 1);
}

#[test]
fn unregistered_procedure_rejected_when_required() {
    let mut settings = ServiceSettings::default();
    settings.ingest.require_registered_procedure = true;
    let service = SosService::new(MemoryDatabase::new(), &settings);

    let err = service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameterValue { ref parameter, .. } if parameter == "procedure"));

    service
        .register_procedure("urn:ogc:object:Sensor:thermometer-1", "O1")
        .unwrap();
    service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap();
}

// ============================================================================
// Templates
// ============================================================================

#[test]
fn templates_are_found_by_identifier_and_pair() {
    let service = service();
    let id = register(&service, "O1");
    register(&service, "O2");

    let by_pair = service.get_result_template_for("O1", "P1").unwrap();
    assert_eq!(by_pair.identifier.to_string(), id);
    assert_eq!(service.get_result_template(&id).unwrap(), by_pair);
    assert_eq!(service.list_templates().unwrap().len(), 2);
    assert!(matches!(
        service.get_result_template_for("O3", "P1"),
        Err(Error::TemplateNotFound(_))
    ));
}

#[test]
fn duplicate_pair_is_rejected() {
    let service = service();
    register(&service, "O1");
    let err = service
        .register(&registration("O1", "P1", ObservationType::Measurement))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateTemplate { .. }));
    assert_eq!(service.list_templates().unwrap().len(), 1);
}

#[test]
fn nested_record_template_cannot_ingest() {
    let service = service();
    let mut nested = registration("O1", "P1", ObservationType::ComplexObservation);
    nested.schema = ResultSchema {
        fields: vec![
            Field::phenomenon_time(),
            Field::value(
                "wind",
                FieldKind::Record {
                    fields: vec![Field::value("speed", FieldKind::Quantity, "urn:speed")],
                },
                "urn:wind",
            ),
        ],
    };
    let id = service.register(&nested).unwrap().template.identifier.to_string();

    let err = service
        .insert_result(&InsertResultRequest::new(&id, "2024-03-01T00:00:00Z,1"))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedShape(_)));
    assert_eq!(stored(service.database()), 0);
}

// ============================================================================
// Retrieval
// ============================================================================

#[test]
fn inserted_rows_come_back_in_order() {
    let service = service();
    let id = register(&service, "O1");
    service
        .insert_result(&InsertResultRequest::new(&id, payload(3)))
        .unwrap();
    service
        .insert_result(&InsertResultRequest::new(&id, "2024-03-02T00:00:00Z,noData"))
        .unwrap();

    let result = service
        .get_result(&GetResultRequest {
            template: id,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(result.rows, 3);
    assert_eq!(
        result.result_values,
        "3;2024-03-01T00:00:00Z,0.5;2024-03-01T00:01:00Z,1.5;2024-03-01T00:02:00Z,2.5"
    );
}

#[test]
fn insert_summary_reports_committed_pipeline() {
    let service = service();
    let id = register(&service, "O1");
    let summary = service
        .insert_result(&InsertResultRequest::new(&id, payload(2)))
        .unwrap();

    assert_eq!(summary.phase, IngestPhase::Committed);
    assert!(summary.phase.is_terminal());
    assert_eq!(summary.constellation, Transition::Unchanged);
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["observationsPersisted"], 2);
    assert_eq!(json["phase"], "committed");
}

// ============================================================================
// Concurrency
// ============================================================================

// MemoryDatabase runs one transaction at a time, so this checks totals under
// parallel callers. Lock overlap is covered in locks.rs.
#[test]
fn parallel_callers_on_separate_offerings_keep_totals() {
    let service = service();
    let offerings = ["O1", "O2", "O3", "O4"];
    let ids: Vec<String> = offerings.iter().map(|o| register(&service, o)).collect();

    std::thread::scope(|scope| {
        for id in &ids {
            let service = &service;
            scope.spawn(move || {
                for _ in 0..3 {
                    service
                        .insert_result(&InsertResultRequest::new(id, payload(60)))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(stored(service.database()), 4 * 3 * 60);
    for id in ids {
        let result = service
            .get_result(&GetResultRequest {
                template: id,
                ..Default::default()
            })
            .unwrap();
        // every call is its own batch, even with repeated times
        assert_eq!(result.rows, 3 * 60);
    }
}

#[test]
fn concurrent_first_registrations_agree_on_type() {
    let service = service();
    let outcomes: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = [ObservationType::Measurement, ObservationType::CountObservation]
            .into_iter()
            .enumerate()
            .map(|(i, observation_type)| {
                let service = &service;
                scope.spawn(move || {
                    let mut request = registration("O1", "P1", observation_type);
                    request.feature = FeatureDescriptor::new(format!("urn:station:{}", i));
                    service.register(&request).is_ok()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(service.list_templates().unwrap().len(), 1);
}
