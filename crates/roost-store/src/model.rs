//! Row types stored in a record store.

use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use roost_vector::VectorId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Role of a store within a directory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Co-located with raw input files.
    Session,
    /// Merges the stores below it.
    Aggregate,
}

impl StoreKind {
    /// Database file that marks a directory as holding this kind of store.
    pub fn db_file(self) -> &'static str {
        match self {
            StoreKind::Session => "roost_session.db",
            StoreKind::Aggregate => "roost_aggregate.db",
        }
    }

    /// Directory holding the vector index next to the database.
    pub fn index_dir(self) -> &'static str {
        match self {
            StoreKind::Session => "roost_session.idx",
            StoreKind::Aggregate => "roost_aggregate.idx",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Session => "session",
            StoreKind::Aggregate => "aggregate",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "session" => Ok(StoreKind::Session),
            "aggregate" => Ok(StoreKind::Aggregate),
            other => Err(StoreError::InvalidData(format!("unknown store type: {other}"))),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of one detection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    /// Input file the segment was cut from, relative to the session directory.
    pub source_file: String,
    pub segment_start: DateTime<Utc>,
    pub segment_end: DateTime<Utc>,
    /// IANA name of the zone the recording was made in.
    pub timezone: String,
    /// Scientific label assigned by the classifier.
    pub label: String,
    /// Localized label, when a translation exists.
    pub local_label: Option<String>,
    pub score: f64,
}

/// Origin of an aggregate record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Source store directory relative to the aggregate (`.` for a session
    /// sharing the aggregate's directory). Absolute only for sources outside
    /// the aggregate tree. See [`Store::resolve_source`](crate::Store::resolve_source).
    pub source_path: PathBuf,
    /// Record id inside the source store.
    pub source_record_id: i64,
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub fields: RecordFields,
    pub created_at: DateTime<Utc>,
    pub vector_id: Option<VectorId>,
    pub provenance: Option<Provenance>,
}

/// Recording-level metadata of one input unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// Input file name, the same key used by `RecordFields::source_file`.
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    /// Wall-clock start time in `timezone`.
    pub recorded_at_local: NaiveDateTime,
    pub timezone: String,
    /// Recorder serial number.
    pub serial: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bit_depth: Option<u16>,
    pub duration_seconds: Option<f64>,
    pub temperature_c: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub gain: Option<String>,
    pub firmware: Option<String>,
}

impl UnitMetadata {
    /// Metadata with only the required fields set.
    pub fn new(
        unit: impl Into<String>,
        recorded_at: DateTime<Utc>,
        recorded_at_local: NaiveDateTime,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            recorded_at,
            recorded_at_local,
            timezone: timezone.into(),
            serial: None,
            gps_lat: None,
            gps_lon: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
            duration_seconds: None,
            temperature_c: None,
            battery_voltage: None,
            gain: None,
            firmware: None,
        }
    }
}

/// A unit row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUnit {
    pub metadata: UnitMetadata,
    /// Source store the unit was synced from, in the same form as
    /// [`Provenance::source_path`]. `None` for units ingested here.
    pub source_path: Option<PathBuf>,
}

/// Sync bookkeeping for one source, kept in the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistration {
    /// Registration key, in the same form as [`Provenance::source_path`].
    pub source_path: PathBuf,
    /// Highest source record id imported so far (0 when none).
    pub high_watermark: i64,
    /// Chained digest over everything imported from the source.
    pub content_checksum: String,
    pub records_imported: u64,
    /// Unit rows the source held at the last import.
    pub units_seen: u64,
    pub last_synced_at: DateTime<Utc>,
}

/// Lifecycle of an ingestion unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Processing => "processing",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(UnitStatus::Pending),
            "processing" => Ok(UnitStatus::Processing),
            "completed" => Ok(UnitStatus::Completed),
            "failed" => Ok(UnitStatus::Failed),
            other => Err(StoreError::InvalidData(format!("unknown unit status: {other}"))),
        }
    }
}

/// Processing state of one ingestion unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub unit: String,
    pub status: UnitStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

pub(crate) fn to_sql_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn from_sql_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub(crate) fn to_sql_local(t: &NaiveDateTime) -> String {
    t.format(LOCAL_TIME_FORMAT).to_string()
}

pub(crate) fn from_sql_local(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, LOCAL_TIME_FORMAT)
        .map_err(|e| StoreError::InvalidData(format!("bad local time {s:?}: {e}")))
}
