//! SQLite backend.
//!
//! One connection per session. Transactions start with `BEGIN IMMEDIATE`
//! so competing writers wait on the busy timeout instead of failing at
//! commit. Buffered observations are inserted on flush and on commit.

use super::{
    ConstellationStore, Database, FeatureResolver, NewObservation, ObservationStore,
    PersistedObservation, ProcedureRegistry, RowOrigin, StorageSession, StoreError, StoreResult,
    TemplateStore, UnitInterner, UnitRef,
};
use crate::model::time::{format_instant, parse_instant};
use crate::model::{
    ConstellationKey, FeatureDescriptor, FeatureRef, ObservationConstellation, ObservationType,
    ResultTemplate, TimeValue,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use sos_common::{ConstellationId, FeatureId, ObservationId, TemplateId, UnitId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const SQLITE_SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS observation_constellation (
  id INTEGER PRIMARY KEY,
  procedure TEXT NOT NULL,
  observable_property TEXT NOT NULL,
  offering TEXT NOT NULL,
  observation_type TEXT NOT NULL,
  UNIQUE (procedure, observable_property, offering)
);
CREATE TABLE IF NOT EXISTS procedure_offering (
  procedure TEXT NOT NULL,
  offering TEXT NOT NULL,
  PRIMARY KEY (procedure, offering)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS feature_of_interest (
  id INTEGER PRIMARY KEY,
  identifier TEXT NOT NULL UNIQUE,
  name TEXT,
  sampled_feature TEXT
);
CREATE TABLE IF NOT EXISTS offering_related_feature (
  offering TEXT NOT NULL,
  feature_id INTEGER NOT NULL REFERENCES feature_of_interest (id),
  role TEXT,
  PRIMARY KEY (offering, feature_id)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS feature_relation (
  feature_id INTEGER NOT NULL REFERENCES feature_of_interest (id),
  related_id INTEGER NOT NULL REFERENCES feature_of_interest (id),
  PRIMARY KEY (feature_id, related_id)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS unit (
  id INTEGER PRIMARY KEY,
  symbol TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS result_template (
  identifier TEXT PRIMARY KEY,
  constellation_id INTEGER NOT NULL REFERENCES observation_constellation (id),
  offering TEXT NOT NULL,
  observable_property TEXT NOT NULL,
  feature_id INTEGER NOT NULL REFERENCES feature_of_interest (id),
  result_structure TEXT NOT NULL,
  result_encoding TEXT NOT NULL,
  UNIQUE (offering, observable_property)
);
CREATE TABLE IF NOT EXISTS observation (
  id INTEGER PRIMARY KEY,
  constellation_id INTEGER NOT NULL REFERENCES observation_constellation (id),
  feature_id INTEGER NOT NULL REFERENCES feature_of_interest (id),
  batch TEXT NOT NULL,
  row_index INTEGER NOT NULL,
  phenomenon_time TEXT NOT NULL,
  result_time TEXT NOT NULL,
  definition TEXT NOT NULL,
  value TEXT NOT NULL,
  unit_id INTEGER REFERENCES unit (id)
);
CREATE INDEX IF NOT EXISTS observation_by_constellation
  ON observation (constellation_id, feature_id, id);
";

const TEMPLATE_SELECT: &str = "
SELECT t.identifier, t.result_structure, t.result_encoding,
       c.id, c.procedure, c.observable_property, c.offering, c.observation_type,
       f.id, f.identifier
FROM result_template t
JOIN observation_constellation c ON c.id = t.constellation_id
JOIN feature_of_interest f ON f.id = t.feature_id";

const INSERT_OBSERVATION: &str = "INSERT INTO observation (
  constellation_id, feature_id, batch, row_index, phenomenon_time, result_time, definition,
  value, unit_id
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                StoreError::Constraint(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{}: {}", what, err))
}

fn sql_id(id: u64) -> i64 {
    id as i64
}

/// SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteDatabase {
    /// Open (creating when needed) the database and its schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let db = SqliteDatabase { path, busy_timeout };
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version={};", SQLITE_SCHEMA_VERSION))?;
        debug!(path = %db.path.display(), "sqlite store ready");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            ",
        )?;
        Ok(conn)
    }
}

impl Database for SqliteDatabase {
    type Session = SqliteSession;

    fn open_session(&self) -> StoreResult<SqliteSession> {
        Ok(SqliteSession {
            conn: self.connect()?,
            in_tx: false,
            pending: Vec::new(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

pub struct SqliteSession {
    conn: Connection,
    in_tx: bool,
    pending: Vec<NewObservation>,
}

struct RawTemplate {
    identifier: String,
    structure: String,
    encoding: String,
    constellation_id: i64,
    procedure: String,
    observed_property: String,
    offering: String,
    observation_type: String,
    feature_id: i64,
    feature_identifier: String,
}

impl RawTemplate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawTemplate {
            identifier: row.get(0)?,
            structure: row.get(1)?,
            encoding: row.get(2)?,
            constellation_id: row.get(3)?,
            procedure: row.get(4)?,
            observed_property: row.get(5)?,
            offering: row.get(6)?,
            observation_type: row.get(7)?,
            feature_id: row.get(8)?,
            feature_identifier: row.get(9)?,
        })
    }

    fn hydrate(self) -> StoreResult<ResultTemplate> {
        Ok(ResultTemplate {
            result_structure: serde_json::from_str(&self.structure)
                .map_err(|e| corrupt("result_structure", e))?,
            result_encoding: serde_json::from_str(&self.encoding)
                .map_err(|e| corrupt("result_encoding", e))?,
            constellation: ObservationConstellation {
                id: ConstellationId(self.constellation_id as u64),
                key: ConstellationKey::new(self.procedure, self.observed_property, self.offering),
                observation_type: self
                    .observation_type
                    .parse()
                    .map_err(|e| corrupt("observation_type", e))?,
            },
            feature_of_interest: FeatureRef {
                id: FeatureId(self.feature_id as u64),
                identifier: self.feature_identifier,
            },
            identifier: TemplateId(self.identifier),
        })
    }
}

struct RawObservation {
    id: i64,
    constellation_id: i64,
    feature_id: i64,
    batch: String,
    row_index: i64,
    phenomenon_time: String,
    result_time: String,
    definition: String,
    value: String,
    unit_id: Option<i64>,
    unit_symbol: Option<String>,
}

impl RawObservation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawObservation {
            id: row.get(0)?,
            constellation_id: row.get(1)?,
            feature_id: row.get(2)?,
            batch: row.get(3)?,
            row_index: row.get(4)?,
            phenomenon_time: row.get(5)?,
            result_time: row.get(6)?,
            definition: row.get(7)?,
            value: row.get(8)?,
            unit_id: row.get(9)?,
            unit_symbol: row.get(10)?,
        })
    }

    fn hydrate(self) -> StoreResult<PersistedObservation> {
        Ok(PersistedObservation {
            id: ObservationId(self.id as u64),
            constellation: ConstellationId(self.constellation_id as u64),
            feature: FeatureId(self.feature_id as u64),
            origin: RowOrigin::new(
                self.batch,
                u32::try_from(self.row_index).map_err(|e| corrupt("row_index", e))?,
            ),
            phenomenon_time: TimeValue::parse(&self.phenomenon_time)
                .map_err(|e| corrupt("phenomenon_time", e))?,
            result_time: parse_instant(&self.result_time).map_err(|e| corrupt("result_time", e))?,
            definition: self.definition,
            value: serde_json::from_str(&self.value).map_err(|e| corrupt("value", e))?,
            unit: self.unit_id.zip(self.unit_symbol).map(|(id, symbol)| UnitRef {
                id: UnitId(id as u64),
                symbol,
            }),
        })
    }
}

impl SqliteSession {
    fn require_tx(&self) -> StoreResult<()> {
        if self.in_tx {
            Ok(())
        } else {
            Err(StoreError::NotInTransaction)
        }
    }

    fn write_pending(&mut self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut self.pending);
        let mut stmt = self.conn.prepare_cached(INSERT_OBSERVATION)?;
        for observation in &pending {
            let value = serde_json::to_string(&observation.value)
                .map_err(|e| StoreError::Backend(format!("cannot serialize value: {}", e)))?;
            stmt.execute(params![
                sql_id(observation.constellation.0),
                sql_id(observation.feature.0),
                observation.origin.batch,
                observation.origin.row,
                observation.phenomenon_time.to_token(),
                format_instant(&observation.result_time),
                observation.definition,
                value,
                observation.unit.as_ref().map(|u| sql_id(u.id.0)),
            ])?;
        }
        Ok(pending.len())
    }

    fn query_templates(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<ResultTemplate>> {
        let sql = format!("{} {}", TEMPLATE_SELECT, filter);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params, RawTemplate::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawTemplate::hydrate).collect()
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.in_tx {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl StorageSession for SqliteSession {
    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.in_tx {
            return Err(StoreError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_tx = true;
        self.pending.clear();
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.require_tx()?;
        self.write_pending()?;
        self.conn.execute_batch("COMMIT")?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.pending.clear();
        if self.in_tx {
            self.in_tx = false;
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.require_tx()?;
        self.write_pending()?;
        Ok(())
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.pending.clear();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}

impl ConstellationStore for SqliteSession {
    fn find_constellation(
        &mut self,
        key: &ConstellationKey,
    ) -> StoreResult<Option<ObservationConstellation>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, observation_type FROM observation_constellation
                 WHERE procedure = ?1 AND observable_property = ?2 AND offering = ?3",
                params![key.procedure, key.observed_property, key.offering],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        found
            .map(|(id, observation_type)| {
                Ok(ObservationConstellation {
                    id: ConstellationId(id as u64),
                    key: key.clone(),
                    observation_type: observation_type
                        .parse()
                        .map_err(|e| corrupt("observation_type", e))?,
                })
            })
            .transpose()
    }

    fn insert_constellation(
        &mut self,
        key: &ConstellationKey,
        observation_type: ObservationType,
    ) -> StoreResult<ObservationConstellation> {
        self.require_tx()?;
        self.conn.execute(
            "INSERT INTO observation_constellation
             (procedure, observable_property, offering, observation_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.procedure,
                key.observed_property,
                key.offering,
                observation_type.name()
            ],
        )?;
        Ok(ObservationConstellation {
            id: ConstellationId(self.conn.last_insert_rowid() as u64),
            key: key.clone(),
            observation_type,
        })
    }

    fn set_observation_type(
        &mut self,
        id: ConstellationId,
        observation_type: ObservationType,
    ) -> StoreResult<()> {
        self.require_tx()?;
        let changed = self.conn.execute(
            "UPDATE observation_constellation SET observation_type = ?1 WHERE id = ?2",
            params![observation_type.name(), sql_id(id.0)],
        )?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!("no constellation {}", id)));
        }
        Ok(())
    }
}

impl ProcedureRegistry for SqliteSession {
    fn register_procedure(&mut self, procedure: &str, offering: &str) -> StoreResult<bool> {
        self.require_tx()?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO procedure_offering (procedure, offering) VALUES (?1, ?2)",
            params![procedure, offering],
        )?;
        Ok(inserted > 0)
    }

    fn offerings_for_procedure(&mut self, procedure: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT offering FROM procedure_offering WHERE procedure = ?1 ORDER BY offering",
        )?;
        let offerings = stmt
            .query_map(params![procedure], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(offerings)
    }
}

impl FeatureResolver for SqliteSession {
    fn resolve_feature(&mut self, descriptor: &FeatureDescriptor) -> StoreResult<FeatureId> {
        self.require_tx()?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM feature_of_interest WHERE identifier = ?1",
                params![descriptor.identifier],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(FeatureId(id as u64));
        }
        self.conn.execute(
            "INSERT INTO feature_of_interest (identifier, name, sampled_feature) VALUES (?1, ?2, ?3)",
            params![
                descriptor.identifier,
                descriptor.name,
                descriptor.sampled_feature
            ],
        )?;
        Ok(FeatureId(self.conn.last_insert_rowid() as u64))
    }

    fn feature_identifier(&mut self, id: FeatureId) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT identifier FROM feature_of_interest WHERE id = ?1",
                params![sql_id(id.0)],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn declare_related_feature(
        &mut self,
        offering: &str,
        feature: FeatureId,
        role: Option<&str>,
    ) -> StoreResult<bool> {
        self.require_tx()?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO offering_related_feature (offering, feature_id, role)
             VALUES (?1, ?2, ?3)",
            params![offering, sql_id(feature.0), role],
        )?;
        Ok(inserted > 0)
    }

    fn related_features(&mut self, offering: &str) -> StoreResult<Vec<FeatureId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT feature_id FROM offering_related_feature WHERE offering = ?1 ORDER BY feature_id",
        )?;
        let ids = stmt
            .query_map(params![offering], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(|id| FeatureId(id as u64)).collect())
    }

    fn ensure_feature_relation(
        &mut self,
        feature: FeatureId,
        related: FeatureId,
    ) -> StoreResult<bool> {
        self.require_tx()?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO feature_relation (feature_id, related_id) VALUES (?1, ?2)",
            params![sql_id(feature.0), sql_id(related.0)],
        )?;
        Ok(inserted > 0)
    }

    fn feature_relations(&mut self, feature: FeatureId) -> StoreResult<Vec<FeatureId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT related_id FROM feature_relation WHERE feature_id = ?1 ORDER BY related_id",
        )?;
        let ids = stmt
            .query_map(params![sql_id(feature.0)], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(|id| FeatureId(id as u64)).collect())
    }
}

impl UnitInterner for SqliteSession {
    fn intern_or_create(&mut self, symbol: &str) -> StoreResult<UnitRef> {
        self.require_tx()?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM unit WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                self.conn
                    .execute("INSERT INTO unit (symbol) VALUES (?1)", params![symbol])?;
                self.conn.last_insert_rowid()
            }
        };
        Ok(UnitRef {
            id: UnitId(id as u64),
            symbol: symbol.to_string(),
        })
    }
}

impl TemplateStore for SqliteSession {
    fn insert_template(&mut self, template: &ResultTemplate) -> StoreResult<()> {
        self.require_tx()?;
        let structure = serde_json::to_string(&template.result_structure)
            .map_err(|e| StoreError::Backend(format!("cannot serialize structure: {}", e)))?;
        let encoding = serde_json::to_string(&template.result_encoding)
            .map_err(|e| StoreError::Backend(format!("cannot serialize encoding: {}", e)))?;
        let key = &template.constellation.key;
        self.conn.execute(
            "INSERT INTO result_template (
               identifier, constellation_id, offering, observable_property, feature_id,
               result_structure, result_encoding
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                template.identifier.as_str(),
                sql_id(template.constellation.id.0),
                key.offering,
                key.observed_property,
                sql_id(template.feature_of_interest.id.0),
                structure,
                encoding,
            ],
        )?;
        Ok(())
    }

    fn template_by_id(&mut self, identifier: &str) -> StoreResult<Option<ResultTemplate>> {
        Ok(self
            .query_templates("WHERE t.identifier = ?1", params![identifier])?
            .into_iter()
            .next())
    }

    fn template_for(
        &mut self,
        offering: &str,
        observed_property: &str,
    ) -> StoreResult<Option<ResultTemplate>> {
        Ok(self
            .query_templates(
                "WHERE t.offering = ?1 AND t.observable_property = ?2",
                params![offering, observed_property],
            )?
            .into_iter()
            .next())
    }

    fn list_templates(&mut self) -> StoreResult<Vec<ResultTemplate>> {
        self.query_templates("ORDER BY t.rowid", params![])
    }
}

impl ObservationStore for SqliteSession {
    fn append_observation(&mut self, observation: NewObservation) -> StoreResult<()> {
        self.require_tx()?;
        self.pending.push(observation);
        Ok(())
    }

    fn observations(
        &mut self,
        constellation: ConstellationId,
        feature: Option<FeatureId>,
    ) -> StoreResult<Vec<PersistedObservation>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT o.id, o.constellation_id, o.feature_id, o.batch, o.row_index,
                    o.phenomenon_time, o.result_time, o.definition, o.value, o.unit_id, u.symbol
             FROM observation o
             LEFT JOIN unit u ON u.id = o.unit_id
             WHERE o.constellation_id = ?1 AND (?2 IS NULL OR o.feature_id = ?2)
             ORDER BY o.id",
        )?;
        let raw = stmt
            .query_map(
                params![sql_id(constellation.0), feature.map(|f| sql_id(f.0))],
                RawObservation::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawObservation::hydrate).collect()
    }

    fn observation_count(&mut self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observation", params![], |row| row.get(0))?;
        Ok(count as u64)
    }
}
