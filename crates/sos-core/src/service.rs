//! The ingestion service: template registration, result insertion and
//! result retrieval over one [`Database`].
//!
//! Insert-result runs a fixed pipeline per call:
//!
//! ```text
//! Idle -> Decoding -> Validating -> Persisting -> Committed
//!           \------------\--------------\------> RolledBack
//! ```
//!
//! Decoding touches no storage. Validation (constellation resolution and
//! related-feature propagation) and persistence share one transaction held
//! under the constellation's lock, so a failure anywhere after decoding
//! leaves storage exactly as it was.

use crate::codec::{DecodedRow, ResultCodec};
use crate::constellation::{ConstellationValidator, Transition};
use crate::locks::KeyedLocks;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::model::time::parse_instant;
use crate::model::{
    ConstellationKey, FeatureDescriptor, ResultTemplate, ResultTime, TimeValue, TypedValue,
};
use crate::persist::BatchPersister;
use crate::request::{
    GetResultRequest, GetResultResponse, InsertResultRequest, RegisterTemplateRequest,
    RegisterTemplateResponse,
};
use crate::store::{
    in_transaction, Database, FeatureResolver, ObservationStore, PersistedObservation,
    ProcedureRegistry, RowOrigin,
};
use crate::template::{Registered, TemplateRegistration, TemplateRegistry};
use crate::unfold::{MultiRowObservation, ObservationUnfolder, UnfoldedObservation};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use sos_common::{Error, Result, TemplateId};
use sos_config::{EncodingDefaults, ServiceSettings};
use std::cell::Cell;

/// Pipeline phase of one insert-result call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    Idle,
    Decoding,
    Validating,
    Persisting,
    Committed,
    RolledBack,
}

impl IngestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, IngestPhase::Committed | IngestPhase::RolledBack)
    }
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestPhase::Idle => "idle",
            IngestPhase::Decoding => "decoding",
            IngestPhase::Validating => "validating",
            IngestPhase::Persisting => "persisting",
            IngestPhase::Committed => "committed",
            IngestPhase::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Earliest start and latest end of the persisted phenomenon times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeExtent {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeExtent {
    fn of<'a>(times: impl IntoIterator<Item = &'a TimeValue>) -> Option<Self> {
        times.into_iter().fold(None, |extent, time| {
            Some(match extent {
                None => TimeExtent {
                    start: time.start(),
                    end: time.end(),
                },
                Some(TimeExtent { start, end }) => TimeExtent {
                    start: start.min(time.start()),
                    end: end.max(time.end()),
                },
            })
        })
    }
}

/// Outcome of a committed insert-result call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResultSummary {
    pub template: TemplateId,
    pub rows_decoded: usize,
    pub observations_persisted: usize,
    pub flushes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phenomenon_time: Option<TimeExtent>,
    pub constellation: Transition,
    pub phase: IngestPhase,
}

/// Logs phase changes of one pipeline run.
struct PhaseTracer<'a> {
    log: &'a LogContext,
    template: &'a str,
    phase: Cell<IngestPhase>,
}

impl<'a> PhaseTracer<'a> {
    fn new(log: &'a LogContext, template: &'a str) -> Self {
        PhaseTracer {
            log,
            template,
            phase: Cell::new(IngestPhase::Idle),
        }
    }

    fn enter(&self, next: IngestPhase, stage: Stage) {
        let from = self.phase.replace(next);
        log_event!(
            self.log,
            DEBUG,
            event_names::INGEST_PHASE,
            stage,
            format!("{} -> {}", from, next),
            template = self.template
        );
    }

    fn current(&self) -> IngestPhase {
        self.phase.get()
    }

    /// Record the outcome and pass the error through.
    fn fail(&self, err: Error) -> Error {
        let failed_in = self.phase.replace(IngestPhase::RolledBack);
        log_event!(
            self.log,
            WARN,
            event_names::INGEST_ROLLED_BACK,
            Stage::Rollback,
            format!("insert-result failed while {}: {}", failed_in, err),
            template = self.template,
            code = err.code()
        );
        err
    }
}

/// Sensor observation ingestion over a storage backend.
pub struct SosService<D: Database> {
    db: D,
    codec: ResultCodec,
    registry: TemplateRegistry,
    validator: ConstellationValidator,
    unfolder: ObservationUnfolder,
    persister: BatchPersister,
    locks: KeyedLocks<ConstellationKey>,
    encoding_defaults: EncodingDefaults,
    log: LogContext,
}

impl<D: Database> SosService<D> {
    pub fn new(db: D, settings: &ServiceSettings) -> Self {
        let validator = ConstellationValidator::new(settings.ingest.require_registered_procedure);
        SosService {
            db,
            codec: ResultCodec::new(settings.ingest.no_data_value.clone()),
            registry: TemplateRegistry::new(validator.clone()),
            validator,
            unfolder: ObservationUnfolder,
            persister: BatchPersister::new(settings.ingest.flush_threshold),
            locks: KeyedLocks::new(),
            encoding_defaults: settings.encoding_defaults.clone(),
            log: LogContext::for_run(),
        }
    }

    /// Replace the correlation ids attached to log events.
    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = log;
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn flush_threshold(&self) -> usize {
        self.persister.flush_threshold()
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Register a template from a request document.
    pub fn register_template(
        &self,
        request: RegisterTemplateRequest,
    ) -> Result<RegisterTemplateResponse> {
        let registration = request
            .into_registration(&self.encoding_defaults)
            .map_err(|e| self.rejected(e))?;
        let registered = self.register(&registration)?;
        Ok(response_for(&registered))
    }

    /// Register a validated template.
    ///
    /// Constellation resolution, feature resolution, propagation and the
    /// template row commit together or not at all.
    pub fn register(&self, registration: &TemplateRegistration) -> Result<Registered> {
        registration.validate().map_err(|e| self.rejected(e))?;

        let registered = self
            .locks
            .with_lock(&registration.key, || {
                let mut session = self.db.open_session()?;
                in_transaction(&mut session, |s| self.registry.register(s, registration))
            })
            .map_err(|e| self.rejected(e))?;

        log_event!(
            self.log,
            INFO,
            event_names::TEMPLATE_REGISTERED,
            Stage::Register,
            format!(
                "registered {} for {}",
                registered.template.identifier, registration.key
            ),
            template = registered.template.identifier.as_str(),
            constellation = registered.transition.label(),
            related_links = registered.related_links
        );
        Ok(registered)
    }

    fn rejected(&self, err: Error) -> Error {
        log_event!(
            self.log,
            WARN,
            event_names::TEMPLATE_REJECTED,
            Stage::Register,
            format!("template registration rejected: {}", err),
            code = err.code()
        );
        err
    }

    pub fn get_result_template(&self, identifier: &str) -> Result<ResultTemplate> {
        let mut session = self.db.open_session()?;
        self.registry.lookup(&mut session, identifier)
    }

    pub fn get_result_template_for(
        &self,
        offering: &str,
        observed_property: &str,
    ) -> Result<ResultTemplate> {
        let mut session = self.db.open_session()?;
        self.registry
            .lookup_by_pair(&mut session, offering, observed_property)
    }

    /// Templates in registration order.
    pub fn list_templates(&self) -> Result<Vec<ResultTemplate>> {
        let mut session = self.db.open_session()?;
        self.registry.list(&mut session)
    }

    // ------------------------------------------------------------------
    // Offering bookkeeping
    // ------------------------------------------------------------------

    /// Register `procedure` for `offering`. Returns `false` if already known.
    pub fn register_procedure(&self, procedure: &str, offering: &str) -> Result<bool> {
        for (name, value) in [("procedure", procedure), ("offering", offering)] {
            if value.trim().is_empty() {
                return Err(Error::MissingParameter(name.to_string()));
            }
        }
        let mut session = self.db.open_session()?;
        in_transaction(&mut session, |s| {
            Ok(s.register_procedure(procedure, offering)?)
        })
    }

    /// Declare a related feature for `offering`.
    ///
    /// Templates registered and results inserted afterwards link their
    /// feature of interest to it.
    pub fn declare_related_feature(
        &self,
        offering: &str,
        feature: &FeatureDescriptor,
        role: Option<&str>,
    ) -> Result<bool> {
        for (name, value) in [("offering", offering), ("feature", &feature.identifier)] {
            if value.trim().is_empty() {
                return Err(Error::MissingParameter(name.to_string()));
            }
        }
        let mut session = self.db.open_session()?;
        in_transaction(&mut session, |s| {
            let id = s.resolve_feature(feature)?;
            Ok(s.declare_related_feature(offering, id, role)?)
        })
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Decode, validate and persist one encoded result.
    pub fn insert_result(&self, request: &InsertResultRequest) -> Result<InsertResultSummary> {
        request.validate()?;
        let tracer = PhaseTracer::new(&self.log, &request.template);

        let template = self
            .get_result_template(&request.template)
            .map_err(|e| tracer.fail(e))?;
        log_event!(
            self.log,
            DEBUG,
            event_names::INGEST_STARTED,
            Stage::Lookup,
            format!("ingesting {} bytes", request.result_values.len()),
            template = template.identifier.as_str()
        );

        tracer.enter(IngestPhase::Decoding, Stage::Decode);
        let (rows_decoded, observations) = self
            .decode_and_unfold(&template, &request.result_values)
            .map_err(|e| tracer.fail(e))?;

        tracer.enter(IngestPhase::Validating, Stage::Validate);
        let key = &template.constellation.key;
        let (transition, report) = self
            .locks
            .with_lock(key, || {
                let mut session = self.db.open_session()?;
                in_transaction(&mut session, |s| {
                    let resolution = self.validator.resolve_or_create(
                        s,
                        key,
                        template.constellation.observation_type,
                    )?;
                    self.validator.propagate_related_features(
                        s,
                        &key.offering,
                        template.feature_of_interest.id,
                    )?;

                    tracer.enter(IngestPhase::Persisting, Stage::Persist);
                    let report = self.persister.append_rows(
                        s,
                        &observations,
                        resolution.constellation.id,
                        template.feature_of_interest.id,
                    )?;
                    Ok((resolution.transition, report))
                })
            })
            .map_err(|e| tracer.fail(e))?;

        tracer.enter(IngestPhase::Committed, Stage::Commit);
        log_event!(
            self.log,
            INFO,
            event_names::INGEST_COMMITTED,
            Stage::Commit,
            format!(
                "committed {} observations from {} rows",
                report.persisted, rows_decoded
            ),
            template = template.identifier.as_str(),
            flushes = report.flushes
        );

        Ok(InsertResultSummary {
            template: template.identifier,
            rows_decoded,
            observations_persisted: report.persisted,
            flushes: report.flushes,
            phenomenon_time: TimeExtent::of(observations.iter().map(|o| &o.phenomenon_time)),
            constellation: transition,
            phase: tracer.current(),
        })
    }

    fn decode_and_unfold(
        &self,
        template: &ResultTemplate,
        payload: &str,
    ) -> Result<(usize, Vec<UnfoldedObservation>)> {
        let schema = &template.result_structure;
        ObservationUnfolder::ensure_flat(schema)?;
        let rows = self
            .codec
            .decode(payload, &template.result_encoding, schema)?;
        let observations = self.unfolder.unfold(&MultiRowObservation {
            schema,
            rows: &rows,
            context_time: Utc::now().fixed_offset(),
        })?;
        Ok((rows.len(), observations))
    }

    /// Re-encode the stored observations of a template.
    pub fn get_result(&self, request: &GetResultRequest) -> Result<GetResultResponse> {
        if request.template.trim().is_empty() {
            return Err(Error::MissingParameter("template".to_string()));
        }
        let from = parse_bound("from", request.from.as_deref())?;
        let to = parse_bound("to", request.to.as_deref())?;

        let mut session = self.db.open_session()?;
        let template = self.registry.lookup(&mut session, &request.template)?;
        let stored = session.observations(
            template.constellation.id,
            Some(template.feature_of_interest.id),
        )?;
        let selected: Vec<PersistedObservation> = stored
            .into_iter()
            .filter(|o| o.phenomenon_time.overlaps(from, to))
            .collect();

        let rows = regroup(&template, &selected);
        let result_values =
            self.codec
                .encode(&rows, &template.result_encoding, &template.result_structure)?;

        log_event!(
            self.log,
            DEBUG,
            event_names::RESULT_RETRIEVED,
            Stage::Retrieve,
            format!("{} observations in {} rows", selected.len(), rows.len()),
            template = template.identifier.as_str()
        );
        Ok(GetResultResponse {
            template: template.identifier,
            rows: rows.len(),
            result_encoding: template.result_encoding,
            result_values,
        })
    }
}

fn response_for(registered: &Registered) -> RegisterTemplateResponse {
    let template = &registered.template;
    let key = &template.constellation.key;
    RegisterTemplateResponse {
        accepted_template: template.identifier.clone(),
        offering: key.offering.clone(),
        observed_property: key.observed_property.clone(),
        procedure: key.procedure.clone(),
        observation_type: template.constellation.observation_type.to_string(),
        constellation: registered.transition.label().to_string(),
        related_links: registered.related_links,
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<FixedOffset>>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(token) => parse_instant(token)
            .map(Some)
            .map_err(|e| Error::invalid(name, e.to_string())),
    }
}

/// Rebuild rows from single-value observations.
///
/// Observations unfolded from the same payload row share a [`RowOrigin`] and
/// are stored next to each other; each run of them forms one row. A value
/// lands in the first empty slot whose field definition matches. Slots
/// nobody filled stay absent.
fn regroup(template: &ResultTemplate, observations: &[PersistedObservation]) -> Vec<DecodedRow> {
    let definitions: Vec<&str> = template
        .result_structure
        .value_fields()
        .map(|f| f.definition.as_str())
        .collect();
    let mut rows: Vec<DecodedRow> = Vec::new();
    let mut current: Option<&RowOrigin> = None;

    for observation in observations {
        if !definitions.contains(&observation.definition.as_str()) {
            tracing::debug!(
                definition = %observation.definition,
                "observation matches no field of the template"
            );
            continue;
        }
        if current != Some(&observation.origin) {
            current = Some(&observation.origin);
            rows.push(DecodedRow {
                phenomenon_time: Some(observation.phenomenon_time.clone()),
                result_time: Some(ResultTime::At(observation.result_time)),
                values: vec![TypedValue::NoData; definitions.len()],
            });
        }
        let Some(row) = rows.last_mut() else {
            continue;
        };
        let slot = definitions
            .iter()
            .zip(&row.values)
            .position(|(d, v)| *d == observation.definition && v.is_no_data());
        match slot {
            Some(slot) => row.values[slot] = observation.value.clone(),
            None => tracing::debug!(
                definition = %observation.definition,
                row = observation.origin.row,
                "duplicate value for a field of one row"
            ),
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{Field, FieldKind};
    use crate::model::{EncodingRule, ObservationType};
    use crate::store::MemoryDatabase;

    fn service() -> SosService<MemoryDatabase> {
        SosService::new(MemoryDatabase::new(), &ServiceSettings::default())
    }

    fn registration(offering: &str) -> TemplateRegistration {
        TemplateRegistration {
            identifier: None,
            key: ConstellationKey::new("urn:proc:1", "temp", offering),
            observation_type: ObservationType::Measurement,
            schema: crate::model::ResultSchema::new(vec![
                Field::phenomenon_time(),
                Field::value("temp", FieldKind::Quantity, "urn:temp").with_unit("Cel"),
                Field::value("hum", FieldKind::Quantity, "urn:hum").with_unit("%"),
            ])
            .unwrap(),
            encoding: EncodingRule::new(",", ";").unwrap(),
            feature: FeatureDescriptor::new("station-7"),
        }
    }

    #[test]
    fn test_insert_then_get_result() {
        let service = service();
        let registered = service.register(&registration("O1")).unwrap();
        let id = registered.template.identifier.to_string();

        let summary = service
            .insert_result(&InsertResultRequest::new(
                &id,
                "2;2026-01-01T00:00:00Z,1.5,40;2026-01-01T01:00:00Z,noData,41",
            ))
            .unwrap();
        assert_eq!(summary.rows_decoded, 2);
        assert_eq!(summary.observations_persisted, 3);
        assert_eq!(summary.phase, IngestPhase::Committed);
        assert_eq!(summary.constellation, Transition::Unchanged);
        let extent = summary.phenomenon_time.unwrap();
        assert_eq!(extent.start, parse_instant("2026-01-01T00:00:00Z").unwrap());
        assert_eq!(extent.end, parse_instant("2026-01-01T01:00:00Z").unwrap());

        let result = service
            .get_result(&GetResultRequest {
                template: id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.rows, 2);
        assert_eq!(
            result.result_values,
            "2;2026-01-01T00:00:00Z,1.5,40;2026-01-01T01:00:00Z,noData,41"
        );
    }

    #[test]
    fn test_get_result_time_filter() {
        let service = service();
        let id = service
            .register(&registration("O1"))
            .unwrap()
            .template
            .identifier
            .to_string();
        service
            .insert_result(&InsertResultRequest::new(
                &id,
                "2026-01-01T00:00:00Z,1,2;2026-01-02T00:00:00Z,3,4",
            ))
            .unwrap();

        let result = service
            .get_result(&GetResultRequest {
                template: id,
                from: Some("2026-01-01T12:00:00Z".into()),
                to: None,
            })
            .unwrap();
        assert_eq!(result.rows, 1);
        assert_eq!(result.result_values, "1;2026-01-02T00:00:00Z,3,4");
    }

    #[test]
    fn test_get_result_bad_bound() {
        let service = service();
        let err = service
            .get_result(&GetResultRequest {
                template: "t".into(),
                from: Some("yesterday".into()),
                to: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue { ref parameter, .. } if parameter == "from"));
    }

    #[test]
    fn test_unknown_template_is_not_found() {
        let service = service();
        let err = service
            .insert_result(&InsertResultRequest::new("missing", "1,2"))
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
    }

    #[test]
    fn test_decode_failure_leaves_storage_untouched() {
        let service = service();
        let id = service
            .register(&registration("O1"))
            .unwrap()
            .template
            .identifier
            .to_string();
        let before = service.database().stats();

        let err = service
            .insert_result(&InsertResultRequest::new(
                &id,
                "2026-01-01T00:00:00Z,1,2;2026-01-02T00:00:00Z,warm,4",
            ))
            .unwrap_err();
        assert_eq!(err.code(), 11);
        assert!(err.to_string().contains("block 1"));
        assert_eq!(service.database().stats().transactions_begun, before.transactions_begun);
    }

    #[test]
    fn test_rows_with_identical_times_keep_their_values() {
        let service = service();
        let id = service
            .register(&registration("O1"))
            .unwrap()
            .template
            .identifier
            .to_string();
        // Two rows with identical times keep their own values.
        service
            .insert_result(&InsertResultRequest::new(
                &id,
                "2026-01-01T00:00:00Z,1,2;2026-01-01T00:00:00Z,3,4",
            ))
            .unwrap();
        let result = service
            .get_result(&GetResultRequest {
                template: id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            result.result_values,
            "2;2026-01-01T00:00:00Z,1,2;2026-01-01T00:00:00Z,3,4"
        );
    }

    #[test]
    fn test_gap_in_row_not_filled_from_next_row_with_same_times() {
        let service = service();
        let id = service
            .register(&registration("O1"))
            .unwrap()
            .template
            .identifier
            .to_string();
        let payload = "2;2026-01-01T00:00:00Z,noData,41;2026-01-01T00:00:00Z,3,4";
        service
            .insert_result(&InsertResultRequest::new(&id, payload))
            .unwrap();

        let result = service
            .get_result(&GetResultRequest {
                template: id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.rows, 2);
        assert_eq!(result.result_values, payload);
    }

    #[test]
    fn test_separate_inserts_with_same_times_stay_separate_rows() {
        let service = service();
        let id = service
            .register(&registration("O1"))
            .unwrap()
            .template
            .identifier
            .to_string();
        for payload in ["1;2026-01-01T00:00:00Z,noData,41", "1;2026-01-01T00:00:00Z,3,noData"] {
            service
                .insert_result(&InsertResultRequest::new(&id, payload))
                .unwrap();
        }

        let result = service
            .get_result(&GetResultRequest {
                template: id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            result.result_values,
            "2;2026-01-01T00:00:00Z,noData,41;2026-01-01T00:00:00Z,3,noData"
        );
    }

    #[test]
    fn test_blank_procedure_registration_rejected() {
        let service = service();
        assert!(matches!(
            service.register_procedure(" ", "O1"),
            Err(Error::MissingParameter(_))
        ));
        assert!(service.register_procedure("urn:proc:1", "O1").unwrap());
        assert!(!service.register_procedure("urn:proc:1", "O1").unwrap());
    }
}
