//! On-disk formats for the index directory.
//!
//! Snapshot (`graph.snap`):
//! - magic: 4 bytes `RSNP`
//! - version: u32 (little-endian)
//! - payload_len: u64 (little-endian)
//! - payload: bincode `Snapshot`
//! - crc32c: u32 over payload (little-endian)
//!
//! Insert log (`inserts.log`), a sequence of frames:
//! - len: u32 (little-endian)
//! - payload: bincode `LogEntry`
//! - crc32c: u32 over payload (little-endian)

use crate::graph::Graph;
use crate::{HnswError, Result};
use bytes::{BufMut, BytesMut};
use roost_vector::{DistanceFunction, VectorId};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const SNAPSHOT_FILE: &str = "graph.snap";
pub const INSERT_LOG_FILE: &str = "inserts.log";

const SNAPSHOT_MAGIC: &[u8; 4] = b"RSNP";
const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_HEADER_LEN: usize = 4 + 4 + 8;
const FRAME_OVERHEAD: usize = 4 + 4;

/// Serialized graph plus the parameters needed to interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub dimensions: usize,
    pub distance: DistanceFunction,
    pub graph: Graph,
}

/// One logged insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LogEntry {
    pub id: VectorId,
    pub vector: Vec<f32>,
}

fn corrupt(reason: impl Into<String>) -> HnswError {
    HnswError::Corrupt {
        reason: reason.into(),
    }
}

/// Writes the snapshot atomically: temp file, fsync, rename, fsync dir.
pub(crate) fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> Result<()> {
    let payload = bincode::serialize(snapshot)?;
    let crc = crc32c::crc32c(&payload);

    let mut buf = BytesMut::with_capacity(SNAPSHOT_HEADER_LEN + payload.len() + 4);
    buf.put_slice(SNAPSHOT_MAGIC);
    buf.put_u32_le(SNAPSHOT_VERSION);
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(&payload);
    buf.put_u32_le(crc);

    let final_path = dir.join(SNAPSHOT_FILE);
    let temp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, &final_path)?;
    sync_dir(dir)?;
    Ok(())
}

/// Reads the snapshot if one exists.
pub(crate) fn read_snapshot(dir: &Path) -> Result<Option<Snapshot>> {
    let data = match fs::read(dir.join(SNAPSHOT_FILE)) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if data.len() < SNAPSHOT_HEADER_LEN + 4 {
        return Err(corrupt(format!("snapshot too short ({} bytes)", data.len())));
    }
    if &data[0..4] != SNAPSHOT_MAGIC {
        return Err(corrupt("bad snapshot magic"));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != SNAPSHOT_VERSION {
        return Err(corrupt(format!("unsupported snapshot version {}", version)));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[8..16]);
    let payload_len = usize::try_from(u64::from_le_bytes(len_bytes))
        .map_err(|_| corrupt("snapshot length does not fit in memory"))?;
    let expected_len = SNAPSHOT_HEADER_LEN
        .checked_add(payload_len)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| corrupt("snapshot length overflows"))?;

    if data.len() != expected_len {
        return Err(corrupt("snapshot length does not match header"));
    }
    let payload = &data[SNAPSHOT_HEADER_LEN..SNAPSHOT_HEADER_LEN + payload_len];
    let stored = read_u32_le(&data[SNAPSHOT_HEADER_LEN + payload_len..]);
    let computed = crc32c::crc32c(payload);
    if stored != computed {
        return Err(corrupt(format!(
            "snapshot CRC mismatch: expected {:#x}, got {:#x}",
            stored, computed
        )));
    }

    let snapshot = bincode::deserialize(payload)?;
    Ok(Some(snapshot))
}

pub(crate) fn remove_snapshot(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(SNAPSHOT_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Encodes one log frame.
pub(crate) fn encode_entry(entry: &LogEntry, buf: &mut BytesMut) -> Result<()> {
    let payload = bincode::serialize(entry)?;
    buf.reserve(payload.len() + FRAME_OVERHEAD);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    buf.put_u32_le(crc32c::crc32c(&payload));
    Ok(())
}

#[derive(Debug, PartialEq)]
enum FrameError {
    /// Frame runs past the end of the buffer.
    Incomplete,
    /// Frame is complete but fails its checksum or does not decode.
    Invalid(String),
}

fn decode_entry(data: &[u8]) -> std::result::Result<(LogEntry, usize), FrameError> {
    if data.len() < 4 {
        return Err(FrameError::Incomplete);
    }
    let len = read_u32_le(data) as usize;
    let total = len + FRAME_OVERHEAD;
    if data.len() < total {
        return Err(FrameError::Incomplete);
    }

    let payload = &data[4..4 + len];
    let stored = read_u32_le(&data[4 + len..]);
    let computed = crc32c::crc32c(payload);
    if stored != computed {
        return Err(FrameError::Invalid(format!(
            "CRC mismatch: expected {:#x}, got {:#x}",
            stored, computed
        )));
    }

    let entry =
        bincode::deserialize(payload).map_err(|e| FrameError::Invalid(e.to_string()))?;
    Ok((entry, total))
}

/// Outcome of scanning the insert log.
#[derive(Debug)]
pub(crate) struct LogScan {
    pub entries: Vec<LogEntry>,
    /// Length of the valid prefix in bytes.
    pub valid_len: u64,
    pub file_len: u64,
}

/// Scans a log buffer frame by frame.
///
/// A frame that runs past the end, or a bad final frame, is a torn append
/// and ends the valid prefix. A bad frame followed by more data is
/// corruption.
fn scan_frames(buffer: &[u8]) -> Result<LogScan> {
    let mut offset = 0usize;
    let mut entries = Vec::new();

    while offset < buffer.len() {
        match decode_entry(&buffer[offset..]) {
            Ok((entry, size)) => {
                entries.push(entry);
                offset += size;
            }
            Err(FrameError::Incomplete) => break,
            Err(FrameError::Invalid(reason)) => {
                let len = read_u32_le(&buffer[offset..]) as usize;
                let frame_end = offset + len + FRAME_OVERHEAD;
                if frame_end == buffer.len() {
                    break;
                }
                return Err(corrupt(format!(
                    "insert log frame at offset {}: {}",
                    offset, reason
                )));
            }
        }
    }

    Ok(LogScan {
        entries,
        valid_len: offset as u64,
        file_len: buffer.len() as u64,
    })
}

/// Reads the insert log, optionally truncating a torn tail in place.
pub(crate) fn recover_log(dir: &Path, truncate_tail: bool) -> Result<LogScan> {
    let path = dir.join(INSERT_LOG_FILE);
    let buffer = match fs::read(&path) {
        Ok(buffer) => buffer,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let scan = scan_frames(&buffer)?;
    if truncate_tail && scan.valid_len < scan.file_len {
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(scan.valid_len)?;
        file.sync_all()?;
    }
    Ok(scan)
}

/// Append handle on the insert log.
pub(crate) struct InsertLog {
    file: File,
}

impl InsertLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(INSERT_LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Appends entries as one write, then fsyncs.
    pub fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        let mut buf = BytesMut::new();
        for entry in entries {
            encode_entry(entry, &mut buf)?;
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Drops every logged entry.
    pub fn reset(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()
    }
}

fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
