//! SQLite schema shared by session and aggregate stores.

/// Bumped whenever a table or column changes meaning.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) const META_STORE_TYPE: &str = "store_type";
pub(crate) const META_SCHEMA_VERSION: &str = "schema_version";

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vectors (
    vector_id INTEGER PRIMARY KEY,
    content_hash TEXT NOT NULL UNIQUE,
    blob BLOB NOT NULL,
    dimension INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_file TEXT NOT NULL,
    segment_start TEXT NOT NULL,
    segment_end TEXT NOT NULL,
    timezone TEXT NOT NULL,
    label TEXT NOT NULL,
    local_label TEXT,
    score REAL NOT NULL,
    created_at TEXT NOT NULL,
    vector_id INTEGER REFERENCES vectors(vector_id),
    source_path TEXT,
    source_record_id INTEGER,
    UNIQUE (source_path, source_record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_segment_start ON records(segment_start);
CREATE INDEX IF NOT EXISTS idx_records_label ON records(label);
CREATE INDEX IF NOT EXISTS idx_records_source_file ON records(source_file);
CREATE INDEX IF NOT EXISTS idx_records_vector_id ON records(vector_id);

CREATE TABLE IF NOT EXISTS source_registrations (
    source_path TEXT PRIMARY KEY,
    high_watermark INTEGER NOT NULL DEFAULT 0,
    content_checksum TEXT NOT NULL DEFAULT '',
    records_imported INTEGER NOT NULL DEFAULT 0,
    units_seen INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS units (
    source_path TEXT NOT NULL DEFAULT '',
    unit TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    recorded_at_local TEXT NOT NULL,
    timezone TEXT NOT NULL,
    serial TEXT,
    gps_lat REAL,
    gps_lon REAL,
    sample_rate INTEGER,
    channels INTEGER,
    bit_depth INTEGER,
    duration_seconds REAL,
    temperature_c REAL,
    battery_voltage REAL,
    gain TEXT,
    firmware TEXT,
    PRIMARY KEY (source_path, unit)
);

CREATE TABLE IF NOT EXISTS processing_status (
    unit TEXT PRIMARY KEY,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT
);
"#;
