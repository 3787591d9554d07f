//! Authoritative SQLite store of records, vectors and sync bookkeeping.
//!
//! Vector ids are allocated densely from 0 inside the writing transaction,
//! so the `vectors` table always holds ids `0..count`.

use crate::error::{Result, StoreError};
use crate::model::{
    from_sql_local, from_sql_time, to_sql_local, to_sql_time, Provenance, Record, RecordFields,
    SourceRegistration, StoreKind, StoredUnit, UnitMetadata, UnitProgress, UnitStatus,
};
use crate::schema::{META_SCHEMA_VERSION, META_STORE_TYPE, SCHEMA_SQL, SCHEMA_VERSION};
use chrono::Utc;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use roost_vector::{decode_f32_le, encode_f32_le, VectorId};
use std::path::{Path, PathBuf};

const UNIT_COLUMNS: &str = "source_path, unit, recorded_at, recorded_at_local, timezone, serial, \
     gps_lat, gps_lon, sample_rate, channels, bit_depth, duration_seconds, temperature_c, \
     battery_voltage, gain, firmware";

const REGISTRATION_COLUMNS: &str =
    "source_path, high_watermark, content_checksum, records_imported, units_seen, last_synced_at";

const RECORD_COLUMNS: &str = "r.id, r.source_file, r.segment_start, r.segment_end, r.timezone, \
     r.label, r.local_label, r.score, r.created_at, r.vector_id, r.source_path, r.source_record_id";

/// A vector row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub vector_id: VectorId,
    pub content_hash: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
}

/// Record store backed by one SQLite database.
pub struct RecordStore {
    conn: Connection,
    path: PathBuf,
    kind: StoreKind,
    read_only: bool,
}

impl RecordStore {
    /// Opens the database for writing, creating it as `kind` if missing.
    ///
    /// Fails with `SchemaVersionMismatch` if the file was written by a
    /// different schema version.
    pub fn open(path: impl AsRef<Path>, kind: StoreKind) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let created = match read_metadata(&conn)? {
            None => {
                conn.execute_batch(SCHEMA_SQL)?;
                write_metadata(&conn, META_STORE_TYPE, kind.as_str())?;
                true
            }
            Some((found_kind, version)) => {
                if version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaVersionMismatch {
                        found: version,
                        expected: SCHEMA_VERSION,
                    });
                }
                if found_kind != kind {
                    return Err(StoreError::KindMismatch {
                        expected: kind.to_string(),
                        found: found_kind.to_string(),
                    });
                }
                conn.execute_batch(SCHEMA_SQL)?;
                false
            }
        };

        let mut store = Self {
            conn,
            path: path.to_path_buf(),
            kind,
            read_only: false,
        };
        if created {
            store.set_schema_version(SCHEMA_VERSION)?;
            tracing::info!(path = %path.display(), kind = %kind, "created record store");
        }
        Ok(store)
    }

    /// Opens an existing database for reading. Works on any schema version.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no database at {}", path.display()),
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let (kind, _) = read_metadata(&conn)?.ok_or_else(|| {
            StoreError::InvalidData(format!("{} has no store metadata", path.display()))
        })?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            kind,
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn schema_version(&self) -> Result<u32> {
        let (_, version) = read_metadata(&self.conn)?
            .ok_or_else(|| StoreError::InvalidData("missing store metadata".into()))?;
        Ok(version)
    }

    /// Records the schema version this database follows. Writable opens
    /// refuse any version other than [`SCHEMA_VERSION`] from then on.
    pub fn set_schema_version(&mut self, version: u32) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        write_metadata(&self.conn, META_SCHEMA_VERSION, &version.to_string())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Starts a write transaction. Taken immediately so a second writer
    /// fails here rather than at commit.
    pub fn begin(&mut self) -> Result<WriteTxn<'_>> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(WriteTxn {
            tx,
            staged: Vec::new(),
        })
    }

    pub fn record(&self, id: i64) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], RecordRow::read)
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    /// Records with `id > after_id`, ascending, at most `limit`.
    pub fn records_after(&self, after_id: i64, limit: usize) -> Result<Vec<Record>> {
        Ok(self
            .records_with_hash_after(after_id, limit)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    /// Like [`records_after`](Self::records_after), paired with the content
    /// hash of each record's vector.
    pub fn records_with_hash_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<(Record, Option<String>)>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}, v.content_hash FROM records r \
             LEFT JOIN vectors v ON v.vector_id = r.vector_id \
             WHERE r.id > ?1 ORDER BY r.id LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![after_id, limit as i64], |row| {
            Ok((RecordRow::read(row)?, row.get::<_, Option<String>>(12)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (record, hash) = row?;
            out.push((record.into_record()?, hash));
        }
        Ok(out)
    }

    pub fn record_by_provenance(
        &self,
        source_path: &Path,
        source_record_id: i64,
    ) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r \
             WHERE r.source_path = ?1 AND r.source_record_id = ?2"
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![path_text(source_path), source_record_id],
                RecordRow::read,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    /// Records referencing `vector_id`, ascending by id.
    pub fn records_for_vector(&self, vector_id: VectorId) -> Result<Vec<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.vector_id = ?1 ORDER BY r.id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![vector_id as i64], RecordRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }

    pub fn vector(&self, vector_id: VectorId) -> Result<Option<StoredVector>> {
        let row = self
            .conn
            .query_row(
                "SELECT vector_id, content_hash, blob, dimension FROM vectors WHERE vector_id = ?1",
                params![vector_id as i64],
                VectorRow::read,
            )
            .optional()?;
        row.map(VectorRow::into_stored).transpose()
    }

    /// Vectors with `vector_id >= from`, ascending, at most `limit`.
    pub fn vectors_from(&self, from: VectorId, limit: usize) -> Result<Vec<StoredVector>> {
        let mut stmt = self.conn.prepare(
            "SELECT vector_id, content_hash, blob, dimension FROM vectors \
             WHERE vector_id >= ?1 ORDER BY vector_id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![from as i64, limit as i64], VectorRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_stored()?);
        }
        Ok(out)
    }

    /// Every vector, ascending by id. Input for index rebuilds.
    pub fn all_vectors_ordered(&self) -> Result<Vec<(VectorId, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT vector_id, blob FROM vectors ORDER BY vector_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            out.push((id as VectorId, decode_f32_le(&blob)?));
        }
        Ok(out)
    }

    pub fn vector_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn record_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Highest record id, 0 for an empty store.
    pub fn max_record_id(&self) -> Result<i64> {
        let n: Option<i64> = self
            .conn
            .query_row("SELECT MAX(id) FROM records", [], |row| row.get(0))?;
        Ok(n.unwrap_or(0))
    }

    /// Record count per label, most frequent first.
    pub fn label_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT label, COUNT(*) AS n FROM records GROUP BY label ORDER BY n DESC, label",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (label, n) = row?;
            out.push((label, n as u64));
        }
        Ok(out)
    }

    pub fn source_registration(&self, source_path: &Path) -> Result<Option<SourceRegistration>> {
        read_source_registration(&self.conn, source_path)
    }

    pub fn source_registrations(&self) -> Result<Vec<SourceRegistration>> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM source_registrations ORDER BY source_path");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], RegistrationRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_registration()?);
        }
        Ok(out)
    }

    /// Metadata of a unit ingested into this store.
    pub fn unit(&self, unit: &str) -> Result<Option<UnitMetadata>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM units WHERE source_path = '' AND unit = ?1");
        let row = self
            .conn
            .query_row(&sql, params![unit], UnitRow::read)
            .optional()?;
        Ok(row.map(UnitRow::into_stored).transpose()?.map(|u| u.metadata))
    }

    /// Every unit row, local ones first, then by source and name.
    pub fn units(&self) -> Result<Vec<StoredUnit>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM units ORDER BY source_path, unit");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], UnitRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_stored()?);
        }
        Ok(out)
    }

    pub fn unit_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM units", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// `candidates` that have no local unit row yet, order preserved.
    pub fn missing_units<'a>(&self, candidates: &'a [String]) -> Result<Vec<&'a str>> {
        let mut stmt = self
            .conn
            .prepare("SELECT unit FROM units WHERE source_path = ''")?;
        let known = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<std::collections::HashSet<_>>>()?;
        Ok(candidates
            .iter()
            .filter(|c| !known.contains(c.as_str()))
            .map(String::as_str)
            .collect())
    }

    /// Gives every local unit without a processing status a `pending` one.
    /// Returns how many were repaired.
    pub fn repair_orphaned_units(&mut self) -> Result<u64> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let n = self.conn.execute(
            "INSERT INTO processing_status (unit, status) \
             SELECT unit, 'pending' FROM units \
             WHERE source_path = '' AND unit NOT IN (SELECT unit FROM processing_status)",
            [],
        )?;
        if n > 0 {
            tracing::warn!(path = %self.path.display(), repaired = n, "units without status repaired");
        }
        Ok(n as u64)
    }

    /// Marks a unit as started. Committed on its own so a crash mid-unit
    /// leaves the unit visibly in `processing`.
    pub fn mark_processing(&mut self, unit: &str) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.conn.execute(
            "INSERT INTO processing_status (unit, status, started_at, completed_at, error_message) \
             VALUES (?1, 'processing', ?2, NULL, NULL) \
             ON CONFLICT(unit) DO UPDATE SET status = 'processing', started_at = excluded.started_at, \
             completed_at = NULL, error_message = NULL",
            params![unit, to_sql_time(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn mark_failed(&mut self, unit: &str, error_message: &str) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.conn.execute(
            "INSERT INTO processing_status (unit, status, started_at, completed_at, error_message) \
             VALUES (?1, 'failed', NULL, ?2, ?3) \
             ON CONFLICT(unit) DO UPDATE SET status = 'failed', completed_at = excluded.completed_at, \
             error_message = excluded.error_message",
            params![unit, to_sql_time(&Utc::now()), error_message],
        )?;
        Ok(())
    }

    /// Units whose rows have been committed.
    pub fn completed_units(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT unit FROM processing_status WHERE status = 'completed' ORDER BY unit",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unit_progress(&self, unit: &str) -> Result<Option<UnitProgress>> {
        let row = self
            .conn
            .query_row(
                "SELECT unit, status, started_at, completed_at, error_message \
                 FROM processing_status WHERE unit = ?1",
                params![unit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((unit, status, started_at, completed_at, error_message)) = row else {
            return Ok(None);
        };
        Ok(Some(UnitProgress {
            unit,
            status: UnitStatus::parse(&status)?,
            started_at: started_at.as_deref().map(from_sql_time).transpose()?,
            completed_at: completed_at.as_deref().map(from_sql_time).transpose()?,
            error_message,
        }))
    }
}

/// One write transaction.
///
/// Index inserts for vectors added in the transaction are staged here and
/// handed back by [`commit`](Self::commit); dropping the transaction rolls
/// everything back, staged inserts included.
pub struct WriteTxn<'a> {
    tx: Transaction<'a>,
    staged: Vec<(VectorId, Vec<f32>)>,
}

impl<'a> WriteTxn<'a> {
    pub fn find_vector_by_hash(&self, content_hash: &str) -> Result<Option<StoredVector>> {
        let row = self
            .tx
            .query_row(
                "SELECT vector_id, content_hash, blob, dimension FROM vectors WHERE content_hash = ?1",
                params![content_hash],
                VectorRow::read,
            )
            .optional()?;
        row.map(VectorRow::into_stored).transpose()
    }

    /// Returns the id stored under `content_hash`, allocating the next id
    /// if the hash is new. The flag is true when a row was inserted.
    pub fn register_vector_if_absent(
        &mut self,
        content_hash: &str,
        vector: &[f32],
    ) -> Result<(VectorId, bool)> {
        let existing: Option<i64> = self
            .tx
            .query_row(
                "SELECT vector_id FROM vectors WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id as VectorId, false));
        }

        let next: i64 = self.tx.query_row(
            "SELECT COALESCE(MAX(vector_id) + 1, 0) FROM vectors",
            [],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT INTO vectors (vector_id, content_hash, blob, dimension) VALUES (?1, ?2, ?3, ?4)",
            params![next, content_hash, encode_f32_le(vector), vector.len() as i64],
        )?;
        Ok((next as VectorId, true))
    }

    /// Dimension shared by every stored vector, `None` while there are none.
    pub fn vector_dimension(&self) -> Result<Option<usize>> {
        let dim: Option<i64> = self
            .tx
            .query_row("SELECT dimension FROM vectors WHERE vector_id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    /// Inserts a record and returns its id.
    pub fn register_record(
        &mut self,
        fields: &RecordFields,
        vector_id: Option<VectorId>,
        provenance: Option<&Provenance>,
    ) -> Result<i64> {
        self.tx.execute(
            "INSERT INTO records (source_file, segment_start, segment_end, timezone, label, \
             local_label, score, created_at, vector_id, source_path, source_record_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                fields.source_file,
                to_sql_time(&fields.segment_start),
                to_sql_time(&fields.segment_end),
                fields.timezone,
                fields.label,
                fields.local_label,
                fields.score,
                to_sql_time(&Utc::now()),
                vector_id.map(|v| v as i64),
                provenance.map(|p| path_text(&p.source_path)),
                provenance.map(|p| p.source_record_id),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Inserts or replaces a unit row. `source_path` is `None` for units
    /// ingested into this store, which also get a `pending` status if they
    /// have none.
    pub fn register_unit(&mut self, meta: &UnitMetadata, source_path: Option<&Path>) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO units ({UNIT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        );
        self.tx.execute(
            &sql,
            params![
                source_path.map(path_text).unwrap_or_default(),
                meta.unit,
                to_sql_time(&meta.recorded_at),
                to_sql_local(&meta.recorded_at_local),
                meta.timezone,
                meta.serial,
                meta.gps_lat,
                meta.gps_lon,
                meta.sample_rate,
                meta.channels,
                meta.bit_depth,
                meta.duration_seconds,
                meta.temperature_c,
                meta.battery_voltage,
                meta.gain,
                meta.firmware,
            ],
        )?;
        if source_path.is_none() {
            self.tx.execute(
                "INSERT OR IGNORE INTO processing_status (unit, status) VALUES (?1, 'pending')",
                params![meta.unit],
            )?;
        }
        Ok(())
    }

    pub fn source_registration(&self, source_path: &Path) -> Result<Option<SourceRegistration>> {
        read_source_registration(&self.tx, source_path)
    }

    pub fn upsert_source_registration(&mut self, reg: &SourceRegistration) -> Result<()> {
        self.tx.execute(
            "INSERT INTO source_registrations \
             (source_path, high_watermark, content_checksum, records_imported, units_seen, last_synced_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(source_path) DO UPDATE SET \
             high_watermark = excluded.high_watermark, \
             content_checksum = excluded.content_checksum, \
             records_imported = excluded.records_imported, \
             units_seen = excluded.units_seen, \
             last_synced_at = excluded.last_synced_at",
            params![
                path_text(&reg.source_path),
                reg.high_watermark,
                reg.content_checksum,
                reg.records_imported as i64,
                reg.units_seen as i64,
                to_sql_time(&reg.last_synced_at),
            ],
        )?;
        Ok(())
    }

    /// Marks `unit` completed as part of this transaction.
    pub fn mark_completed(&mut self, unit: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO processing_status (unit, status, started_at, completed_at, error_message) \
             VALUES (?1, 'completed', NULL, ?2, NULL) \
             ON CONFLICT(unit) DO UPDATE SET status = 'completed', \
             completed_at = excluded.completed_at, error_message = NULL",
            params![unit, to_sql_time(&Utc::now())],
        )?;
        Ok(())
    }

    pub(crate) fn stage_index_insert(&mut self, vector_id: VectorId, vector: Vec<f32>) {
        self.staged.push((vector_id, vector));
    }

    /// Index inserts waiting for commit.
    pub fn staged(&self) -> &[(VectorId, Vec<f32>)] {
        &self.staged
    }

    /// Commits and returns the staged index inserts, ascending by id.
    pub fn commit(self) -> Result<Vec<(VectorId, Vec<f32>)>> {
        let WriteTxn { tx, staged } = self;
        tx.commit()?;
        Ok(staged)
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn read_metadata(conn: &Connection) -> Result<Option<(StoreKind, u32)>> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'store_metadata'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Ok(None);
    }

    let get = |key: &str| -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    };

    let (Some(kind), Some(version)) = (get(META_STORE_TYPE)?, get(META_SCHEMA_VERSION)?) else {
        return Ok(None);
    };
    let version = version
        .parse::<u32>()
        .map_err(|e| StoreError::InvalidData(format!("schema_version {version:?}: {e}")))?;
    Ok(Some((StoreKind::parse(&kind)?, version)))
}

fn write_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn read_source_registration(
    conn: &Connection,
    source_path: &Path,
) -> Result<Option<SourceRegistration>> {
    let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM source_registrations WHERE source_path = ?1");
    let row = conn
        .query_row(
            &sql,
            params![path_text(source_path)],
            RegistrationRow::read,
        )
        .optional()?;
    row.map(RegistrationRow::into_registration).transpose()
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

struct RecordRow {
    id: i64,
    source_file: String,
    segment_start: String,
    segment_end: String,
    timezone: String,
    label: String,
    local_label: Option<String>,
    score: f64,
    created_at: String,
    vector_id: Option<i64>,
    source_path: Option<String>,
    source_record_id: Option<i64>,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_file: row.get(1)?,
            segment_start: row.get(2)?,
            segment_end: row.get(3)?,
            timezone: row.get(4)?,
            label: row.get(5)?,
            local_label: row.get(6)?,
            score: row.get(7)?,
            created_at: row.get(8)?,
            vector_id: row.get(9)?,
            source_path: row.get(10)?,
            source_record_id: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<Record> {
        let provenance = match (self.source_path, self.source_record_id) {
            (Some(path), Some(id)) => Some(Provenance {
                source_path: PathBuf::from(path),
                source_record_id: id,
            }),
            _ => None,
        };
        Ok(Record {
            id: self.id,
            fields: RecordFields {
                source_file: self.source_file,
                segment_start: from_sql_time(&self.segment_start)?,
                segment_end: from_sql_time(&self.segment_end)?,
                timezone: self.timezone,
                label: self.label,
                local_label: self.local_label,
                score: self.score,
            },
            created_at: from_sql_time(&self.created_at)?,
            vector_id: self.vector_id.map(|v| v as VectorId),
            provenance,
        })
    }
}

struct VectorRow {
    vector_id: i64,
    content_hash: String,
    blob: Vec<u8>,
    dimension: i64,
}

impl VectorRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            vector_id: row.get(0)?,
            content_hash: row.get(1)?,
            blob: row.get(2)?,
            dimension: row.get(3)?,
        })
    }

    fn into_stored(self) -> Result<StoredVector> {
        Ok(StoredVector {
            vector_id: self.vector_id as VectorId,
            content_hash: self.content_hash,
            dimension: self.dimension as usize,
            vector: decode_f32_le(&self.blob)?,
        })
    }
}

struct RegistrationRow {
    source_path: String,
    high_watermark: i64,
    content_checksum: String,
    records_imported: i64,
    units_seen: i64,
    last_synced_at: String,
}

impl RegistrationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_path: row.get(0)?,
            high_watermark: row.get(1)?,
            content_checksum: row.get(2)?,
            records_imported: row.get(3)?,
            units_seen: row.get(4)?,
            last_synced_at: row.get(5)?,
        })
    }

    fn into_registration(self) -> Result<SourceRegistration> {
        Ok(SourceRegistration {
            source_path: PathBuf::from(self.source_path),
            high_watermark: self.high_watermark,
            content_checksum: self.content_checksum,
            records_imported: self.records_imported as u64,
            units_seen: self.units_seen as u64,
            last_synced_at: from_sql_time(&self.last_synced_at)?,
        })
    }
}

struct UnitRow {
    source_path: String,
    unit: String,
    recorded_at: String,
    recorded_at_local: String,
    timezone: String,
    serial: Option<String>,
    gps_lat: Option<f64>,
    gps_lon: Option<f64>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    bit_depth: Option<u16>,
    duration_seconds: Option<f64>,
    temperature_c: Option<f64>,
    battery_voltage: Option<f64>,
    gain: Option<String>,
    firmware: Option<String>,
}

impl UnitRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_path: row.get(0)?,
            unit: row.get(1)?,
            recorded_at: row.get(2)?,
            recorded_at_local: row.get(3)?,
            timezone: row.get(4)?,
            serial: row.get(5)?,
            gps_lat: row.get(6)?,
            gps_lon: row.get(7)?,
            sample_rate: row.get(8)?,
            channels: row.get(9)?,
            bit_depth: row.get(10)?,
            duration_seconds: row.get(11)?,
            temperature_c: row.get(12)?,
            battery_voltage: row.get(13)?,
            gain: row.get(14)?,
            firmware: row.get(15)?,
        })
    }

    fn into_stored(self) -> Result<StoredUnit> {
        let source_path = (!self.source_path.is_empty()).then(|| PathBuf::from(self.source_path));
        Ok(StoredUnit {
            metadata: UnitMetadata {
                unit: self.unit,
                recorded_at: from_sql_time(&self.recorded_at)?,
                recorded_at_local: from_sql_local(&self.recorded_at_local)?,
                timezone: self.timezone,
                serial: self.serial,
                gps_lat: self.gps_lat,
                gps_lon: self.gps_lon,
                sample_rate: self.sample_rate,
                channels: self.channels,
                bit_depth: self.bit_depth,
                duration_seconds: self.duration_seconds,
                temperature_c: self.temperature_c,
                battery_voltage: self.battery_voltage,
                gain: self.gain,
                firmware: self.firmware,
            },
            source_path,
        })
    }
}
