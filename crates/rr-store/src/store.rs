use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rr_core::core::{AnnotatorId, SchemaError, UnitId, UnitKey};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{AnnotatorRecord, DraftRecord, StoredUnit, UpsertOutcome};

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS unannotated (
    unit_id TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS in_progress (
    annotator TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    document TEXT NOT NULL,
    seq INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (annotator, unit_id)
);

CREATE TABLE IF NOT EXISTS drafts (
    id TEXT PRIMARY KEY,
    annotator TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    document TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_drafts_unit ON drafts(annotator, unit_id, saved_at);

CREATE TABLE IF NOT EXISTS annotators (
    name TEXT PRIMARY KEY,
    units TEXT NOT NULL,
    unit_index INTEGER NOT NULL DEFAULT 0
);
"#;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid key {0:?}: must be a non-empty name without path separators")]
    InvalidKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("background task failed: {0}")]
    Join(String),
}

/// Document store holding templates, working copies, drafts and assignments.
///
/// Implementations are blocking; async callers go through
/// [`crate::gateway::PersistenceGateway`], which moves calls onto the blocking pool.
pub trait DocumentStore: Send + Sync {
    fn init(&self) -> Result<(), StoreError>;

    fn find_template(&self, unit: &UnitId) -> Result<Option<Value>, StoreError>;
    fn upsert_template(&self, unit: &UnitId, document: &Value) -> Result<UpsertOutcome, StoreError>;
    fn list_templates(&self) -> Result<Vec<UnitId>, StoreError>;

    fn find_in_progress(&self, key: &UnitKey) -> Result<Option<StoredUnit>, StoreError>;
    /// Writes the working copy unless the stored one carries a sequence
    /// number at least as high as `unit.seq`.
    fn upsert_in_progress(&self, unit: &StoredUnit) -> Result<UpsertOutcome, StoreError>;
    fn list_in_progress(&self) -> Result<Vec<StoredUnit>, StoreError>;

    fn insert_draft(&self, draft: &DraftRecord) -> Result<(), StoreError>;
    fn latest_draft(&self, key: &UnitKey) -> Result<Option<DraftRecord>, StoreError>;

    fn find_annotator(&self, name: &AnnotatorId) -> Result<Option<AnnotatorRecord>, StoreError>;
    fn upsert_annotator(&self, record: &AnnotatorRecord) -> Result<(), StoreError>;
    fn list_annotators(&self) -> Result<Vec<AnnotatorRecord>, StoreError>;
    fn set_unit_index(&self, name: &AnnotatorId, index: usize) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SqliteDocumentStore
// ---------------------------------------------------------------------------

pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        conn.execute_batch(SCHEMA_SQL)?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn find_template(&self, unit: &UnitId) -> Result<Option<Value>, StoreError> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT document FROM unannotated WHERE unit_id = ?1",
                params![unit.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(StoreError::from)
    }

    fn upsert_template(&self, unit: &UnitId, document: &Value) -> Result<UpsertOutcome, StoreError> {
        let conn = self.lock_conn();
        let existed = conn
            .query_row(
                "SELECT 1 FROM unannotated WHERE unit_id = ?1",
                params![unit.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        conn.execute(
            "INSERT INTO unannotated (unit_id, document, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(unit_id) DO UPDATE SET
                 document = excluded.document,
                 updated_at = excluded.updated_at",
            params![
                unit.as_str(),
                serde_json::to_string(document)?,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(if existed {
            UpsertOutcome::updated()
        } else {
            UpsertOutcome::inserted()
        })
    }

    fn list_templates(&self) -> Result<Vec<UnitId>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT unit_id FROM unannotated ORDER BY unit_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0).map(UnitId::new))?;
        let units = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn find_in_progress(&self, key: &UnitKey) -> Result<Option<StoredUnit>, StoreError> {
        let conn = self.lock_conn();
        let unit = conn
            .query_row(
                "SELECT annotator, unit_id, document, seq, updated_at
                 FROM in_progress
                 WHERE annotator = ?1 AND unit_id = ?2",
                params![key.annotator.as_str(), key.unit.as_str()],
                stored_unit_from_row,
            )
            .optional()?;
        Ok(unit)
    }

    fn upsert_in_progress(&self, unit: &StoredUnit) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let stored_seq: Option<i64> = tx
            .query_row(
                "SELECT seq FROM in_progress WHERE annotator = ?1 AND unit_id = ?2",
                params![unit.key.annotator.as_str(), unit.key.unit.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let seq = seq_to_sql(unit.seq);
        let document = serde_json::to_string(&unit.document)?;
        let updated_at = format_timestamp(&unit.updated_at);

        let outcome = match stored_seq {
            Some(stored) if stored >= seq => UpsertOutcome::discarded(),
            Some(_) => {
                tx.execute(
                    "UPDATE in_progress SET document = ?3, seq = ?4, updated_at = ?5
                     WHERE annotator = ?1 AND unit_id = ?2",
                    params![
                        unit.key.annotator.as_str(),
                        unit.key.unit.as_str(),
                        document,
                        seq,
                        updated_at,
                    ],
                )?;
                UpsertOutcome::updated()
            }
            None => {
                tx.execute(
                    "INSERT INTO in_progress (annotator, unit_id, document, seq, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        unit.key.annotator.as_str(),
                        unit.key.unit.as_str(),
                        document,
                        seq,
                        updated_at,
                    ],
                )?;
                UpsertOutcome::inserted()
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn list_in_progress(&self) -> Result<Vec<StoredUnit>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT annotator, unit_id, document, seq, updated_at
             FROM in_progress
             ORDER BY annotator ASC, unit_id ASC",
        )?;
        let rows = stmt.query_map([], stored_unit_from_row)?;
        let units = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn insert_draft(&self, draft: &DraftRecord) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO drafts (id, annotator, unit_id, document, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                draft.id.to_string(),
                draft.key.annotator.as_str(),
                draft.key.unit.as_str(),
                serde_json::to_string(&draft.document)?,
                format_timestamp(&draft.saved_at),
            ],
        )?;
        Ok(())
    }

    fn latest_draft(&self, key: &UnitKey) -> Result<Option<DraftRecord>, StoreError> {
        let conn = self.lock_conn();
        let draft = conn
            .query_row(
                "SELECT id, annotator, unit_id, document, saved_at
                 FROM drafts
                 WHERE annotator = ?1 AND unit_id = ?2
                 ORDER BY saved_at DESC, rowid DESC
                 LIMIT 1",
                params![key.annotator.as_str(), key.unit.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let annotator: String = row.get(1)?;
                    let unit: String = row.get(2)?;
                    let document: String = row.get(3)?;
                    let saved_at: String = row.get(4)?;

                    Ok(DraftRecord {
                        id: parse_uuid(0, &id)?,
                        key: UnitKey::new(AnnotatorId::new(annotator), UnitId::new(unit)),
                        document: parse_document(3, &document)?,
                        saved_at: parse_datetime_utc(4, &saved_at)?,
                    })
                },
            )
            .optional()?;
        Ok(draft)
    }

    fn find_annotator(&self, name: &AnnotatorId) -> Result<Option<AnnotatorRecord>, StoreError> {
        let conn = self.lock_conn();
        let record = conn
            .query_row(
                "SELECT name, units, unit_index FROM annotators WHERE name = ?1",
                params![name.as_str()],
                annotator_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert_annotator(&self, record: &AnnotatorRecord) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO annotators (name, units, unit_index) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                 units = excluded.units,
                 unit_index = excluded.unit_index",
            params![
                record.name.as_str(),
                serde_json::to_string(&record.units)?,
                index_to_sql(record.unit_index),
            ],
        )?;
        Ok(())
    }

    fn list_annotators(&self) -> Result<Vec<AnnotatorRecord>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT name, units, unit_index FROM annotators ORDER BY name ASC")?;
        let rows = stmt.query_map([], annotator_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn set_unit_index(&self, name: &AnnotatorId, index: usize) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE annotators SET unit_index = ?2 WHERE name = ?1",
            params![name.as_str(), index_to_sql(index)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("annotator {name}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn stored_unit_from_row(row: &Row<'_>) -> rusqlite::Result<StoredUnit> {
    let annotator: String = row.get(0)?;
    let unit: String = row.get(1)?;
    let document: String = row.get(2)?;
    let seq: i64 = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(StoredUnit {
        key: UnitKey::new(AnnotatorId::new(annotator), UnitId::new(unit)),
        document: parse_document(2, &document)?,
        seq: u64::try_from(seq).unwrap_or(0),
        updated_at: parse_datetime_utc(4, &updated_at)?,
    })
}

fn annotator_from_row(row: &Row<'_>) -> rusqlite::Result<AnnotatorRecord> {
    let name: String = row.get(0)?;
    let units: String = row.get(1)?;
    let unit_index: i64 = row.get(2)?;

    let units: Vec<UnitId> = serde_json::from_str(&units)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?;

    Ok(AnnotatorRecord {
        name: AnnotatorId::new(name),
        units,
        unit_index: usize::try_from(unit_index).unwrap_or(0),
    })
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn seq_to_sql(seq: u64) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

fn index_to_sql(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

fn parse_document(column: usize, value: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| sql_text_parse_error(column, "uuid", value))
}

fn parse_datetime_utc(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| sql_text_parse_error(column, "datetime", value))
}

fn sql_text_parse_error(column: usize, field: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid {field}: {value}"),
        )),
    )
}
